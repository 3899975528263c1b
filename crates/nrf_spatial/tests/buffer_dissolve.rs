//! Dissolved buffering of multi-part boundaries.

use geo::{polygon, Area, MultiPolygon};
use nrf_spatial::{buffer, Crs, Feature, FeatureSet, GridSize};

fn square(x: f64, y: f64, size: f64) -> Feature {
    Feature::from_polygon(polygon![
        (x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size), (x: x, y: y)
    ])
}

#[test]
fn overlapping_buffers_dissolve_into_one_feature() {
    let grid = GridSize::default();
    let boundary = FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(vec![
        square(0.0, 0.0, 10.0).with_attr("id", 1),
        square(110.0, 0.0, 10.0).with_attr("id", 2),
    ]);

    let separate = buffer(&boundary, 250.0, false, grid).unwrap();
    let dissolved = buffer(&boundary, 250.0, true, grid).unwrap();

    assert_eq!(separate.len(), 2);
    assert_eq!(dissolved.len(), 1);
    assert!(dissolved.features[0].attributes.is_empty());
    assert_eq!(dissolved.features[0].geometry.0.len(), 1);

    let separate_area = separate.total_area().unwrap();
    let dissolved_area = dissolved.total_area().unwrap();
    assert!(dissolved_area < separate_area);
    // Each buffer is far larger than the overlap, so the union exceeds either.
    assert!(dissolved_area > separate.area_of(0).unwrap());
}

#[test]
fn distant_parts_stay_separate_polygons_in_one_feature() {
    let boundary = FeatureSet::new(Crs::BRITISH_NATIONAL_GRID)
        .with_features(vec![square(0.0, 0.0, 10.0), square(5_000.0, 0.0, 10.0)]);
    let dissolved = buffer(&boundary, 250.0, true, GridSize::default()).unwrap();
    assert_eq!(dissolved.len(), 1);
    let geometry: &MultiPolygon<f64> = &dissolved.features[0].geometry;
    assert_eq!(geometry.0.len(), 2);
    let single = buffer(
        &FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(vec![square(0.0, 0.0, 10.0)]),
        250.0,
        false,
        GridSize::default(),
    )
    .unwrap();
    let expected = 2.0 * single.total_area().unwrap();
    assert!((geometry.unsigned_area() - expected).abs() / expected < 1e-5);
}
