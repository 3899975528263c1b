//! Locator scoping against a gridded coefficient layer.

use geo::polygon;
use nrf_reference::{
    load_scoped, InMemoryReferenceStore, LayerKind, LocatorScope, Query, ReferenceStore, Scope,
    ScopeStrategy, Source,
};
use nrf_spatial::overlay::intersect;
use nrf_spatial::{Boundary, Crs, Feature, FeatureSet, GridSize, Tolerance};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
    Feature::from_polygon(polygon![
        (x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)
    ])
}

fn bng(features: Vec<Feature>) -> FeatureSet {
    FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(features)
}

/// Two catchments side by side, each subdivided into a 10 x 10 grid of
/// coefficient cells.
fn seeded_store() -> InMemoryReferenceStore {
    let store = InMemoryReferenceStore::default();
    store.publish_layer(
        &Source::Layer(LayerKind::NnCatchments),
        &bng(vec![
            rect(0.0, 0.0, 1_000.0, 1_000.0).with_attr("N2K_Site_N", "West"),
            rect(1_000.0, 0.0, 2_000.0, 1_000.0).with_attr("N2K_Site_N", "East"),
        ]),
    );
    let mut cells = Vec::new();
    for i in 0..20 {
        for j in 0..10 {
            let (x, y) = (i as f64 * 100.0, j as f64 * 100.0);
            cells.push(rect(x, y, x + 100.0, y + 100.0).with_attr("cell", format!("{i}/{j}")));
        }
    }
    store.publish_layer(&Source::Coefficients, &bng(cells));
    store
}

fn boundary(x0: f64, y0: f64, x1: f64, y1: f64) -> Boundary {
    Boundary::prepare(
        bng(vec![rect(x0, y0, x1, y1)]),
        Crs::BRITISH_NATIONAL_GRID,
        GridSize::default(),
    )
    .unwrap()
}

fn clipped_area(set: &FeatureSet, boundary: &Boundary) -> f64 {
    let area = boundary.dissolved();
    set.iter()
        .map(|f| {
            use geo::Area;
            intersect(&f.geometry, &area, boundary.grid()).unsigned_area()
        })
        .sum()
}

#[tokio::test]
async fn boundary_inside_one_catchment_loads_a_strict_subset() {
    let store = seeded_store();
    let boundary = boundary(120.0, 130.0, 480.0, 390.0);
    let scope = LocatorScope::new(Query::layer(LayerKind::NnCatchments))
        .resolve(&boundary, &store)
        .await
        .unwrap();
    assert!(matches!(scope, Scope::Bounded { matched: 1, .. }));

    let scoped = load_scoped(&store, Query::features(Source::Coefficients), &scope)
        .await
        .unwrap()
        .into_features()
        .unwrap();
    let full = store
        .execute(&Query::features(Source::Coefficients))
        .await
        .unwrap()
        .into_features()
        .unwrap();

    assert!(!scoped.is_empty());
    assert!(scoped.len() < full.len());

    let tolerance = Tolerance::new(0.001, 0.0);
    let expected = clipped_area(&full, &boundary);
    assert!(tolerance.matches(clipped_area(&scoped, &boundary), expected));
    assert!((expected - 360.0 * 260.0).abs() < 1e-6);
}

#[tokio::test]
async fn boundary_outside_every_catchment_issues_no_large_query() {
    let store = seeded_store();
    let boundary = boundary(5_000.0, 5_000.0, 5_100.0, 5_100.0);
    let scope = LocatorScope::new(Query::layer(LayerKind::NnCatchments))
        .resolve(&boundary, &store)
        .await
        .unwrap();
    assert_eq!(scope, Scope::Empty);

    let loaded = load_scoped(&store, Query::features(Source::Coefficients), &scope)
        .await
        .unwrap();
    assert!(loaded.is_skipped());
    assert_eq!(store.queries_for(&Source::Coefficients), 0);
}
