//! Nutrient unit end to end against an in-memory reference store.

use geo::polygon;
use serde_json::json;

use nrf_assessments::nutrient::IMPACT_SUMMARY;
use nrf_assessments::{adapt, unit_for, AssessmentError, AssessmentRecords, AssessmentSettings};
use nrf_protocol::{AssessmentType, JobMetadata};
use nrf_reference::{InMemoryReferenceStore, LayerKind, Row, Source};
use nrf_spatial::{Boundary, Crs, Feature, FeatureSet, GridSize};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
    Feature::from_polygon(polygon![
        (x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)
    ])
}

fn bng(features: Vec<Feature>) -> FeatureSet {
    FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(features)
}

fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
    values
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

/// One catchment split into two coefficient cells, with every other layer
/// covering the whole area.
fn seeded_store() -> InMemoryReferenceStore {
    let store = InMemoryReferenceStore::default();
    store.publish_layer(
        &Source::Layer(LayerKind::NnCatchments),
        &bng(vec![rect(0.0, 0.0, 1_000.0, 1_000.0).with_attr("N2K_Site_N", "Solent")]),
    );
    store.publish_layer(
        &Source::Coefficients,
        &bng(vec![
            rect(0.0, 0.0, 500.0, 1_000.0)
                .with_attr("lu_curr_n_coeff", 10.0)
                .with_attr("n_resi_coeff", 20.0)
                .with_attr("lu_curr_p_coeff", 1.0)
                .with_attr("p_resi_coeff", 2.0),
            rect(500.0, 0.0, 1_000.0, 1_000.0)
                .with_attr("lu_curr_n_coeff", 15.0)
                .with_attr("n_resi_coeff", 20.0)
                .with_attr("lu_curr_p_coeff", 1.0)
                .with_attr("p_resi_coeff", 2.0),
        ]),
    );
    store.publish_layer(
        &Source::Layer(LayerKind::WwtwCatchments),
        &bng(vec![rect(0.0, 0.0, 2_000.0, 2_000.0).with_attr("WwTw_ID", 7)]),
    );
    store.publish_layer(
        &Source::Layer(LayerKind::LpaBoundaries),
        &bng(vec![rect(0.0, 0.0, 2_000.0, 2_000.0).with_attr("NAME", "Testshire")]),
    );
    store.publish_layer(
        &Source::Layer(LayerKind::Subcatchments),
        &bng(vec![rect(0.0, 0.0, 2_000.0, 2_000.0).with_attr("OPCAT_NAME", "Upper Test")]),
    );
    store.publish_lookup(
        "rates_lookup",
        rows(vec![json!({
            "nn_catchment": "Solent",
            "occupancy_rate": 2.4,
            "water_usage_L_per_person_day": 110.0
        })]),
    );
    store.publish_lookup(
        "wwtw_lookup",
        rows(vec![
            json!({
                "wwtw_code": 7,
                "wwtw_name": "Testford",
                "wwtw_subcatchment": "Test",
                "nitrogen_conc_2025_2030_mg_L": 10.0,
                "nitrogen_conc_2030_onwards_mg_L": 8.0,
                "phosphorus_conc_2025_2030_mg_L": 1.0,
                "phosphorus_conc_2030_onwards_mg_L": 0.5
            }),
            json!({
                "wwtw_code": 141,
                "wwtw_name": "Package Treatment Plant default",
                "nitrogen_conc_2025_2030_mg_L": 27.0,
                "nitrogen_conc_2030_onwards_mg_L": 27.0,
                "phosphorus_conc_2025_2030_mg_L": 7.0,
                "phosphorus_conc_2030_onwards_mg_L": 7.0
            }),
        ]),
    );
    store
}

fn development(feature: Feature) -> Feature {
    feature
        .with_attr("id", "job-1")
        .with_attr("name", "Riverside")
        .with_attr("dwelling_category", "house")
        .with_attr("source", "web_submission")
        .with_attr("dwellings", 10)
}

fn boundary(features: Vec<Feature>) -> Boundary {
    Boundary::prepare(bng(features), Crs::BRITISH_NATIONAL_GRID, GridSize::default()).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn development_across_two_cells_gets_land_use_and_wastewater() {
    let store = seeded_store();
    let boundary = boundary(vec![
        development(rect(400.0, 100.0, 600.0, 200.0)),
        development(rect(5_000.0, 5_000.0, 5_100.0, 5_100.0)),
    ]);
    let unit = unit_for(AssessmentType::Nutrient, &AssessmentSettings::default());
    let tables = unit
        .run(&boundary, &JobMetadata::new("job-1"), &store)
        .await
        .unwrap();
    assert_eq!(tables[IMPACT_SUMMARY].num_rows(), 1);

    let AssessmentRecords::Nutrient(results) = adapt(AssessmentType::Nutrient, &tables).unwrap() else {
        panic!("expected nutrient records");
    };
    let result = &results[0];
    assert_eq!(result.rlb_id, 1);
    assert_eq!(result.development.name, "Riverside");
    assert!(close(result.development.area_ha, 2.0));
    assert_eq!(result.spatial.wwtw_id, 7);
    assert_eq!(result.spatial.lpa_name, "Testshire");
    assert_eq!(result.spatial.dev_subcatchment.as_deref(), Some("Upper Test"));
    assert_eq!(result.spatial.nn_catchment.as_deref(), Some("Solent"));
    assert!(close(result.spatial.area_in_nn_catchment_ha.unwrap(), 2.0));

    assert!(close(result.land_use.nitrogen_kg_yr.unwrap(), 15.0));
    assert!(close(result.land_use.phosphorus_kg_yr.unwrap(), 2.0));
    assert!(close(result.land_use.nitrogen_post_suds_kg_yr.unwrap(), 11.25));
    assert!(close(result.land_use.phosphorus_post_suds_kg_yr.unwrap(), 1.5));

    let wastewater = result.wastewater.as_ref().unwrap();
    assert!(close(wastewater.daily_water_usage_l.unwrap(), 2_640.0));
    assert!(close(wastewater.nitrogen_temp_kg_yr.unwrap(), 8.68));
    assert!(close(wastewater.nitrogen_perm_kg_yr.unwrap(), 6.94));
    assert!(close(wastewater.phosphorus_temp_kg_yr.unwrap(), 0.87));
    assert!(close(wastewater.phosphorus_perm_kg_yr.unwrap(), 0.43));

    assert!(close(result.total.nitrogen_total_kg_yr, 21.83));
    assert!(close(result.total.phosphorus_total_kg_yr, 2.32));
}

#[tokio::test]
async fn boundary_outside_every_catchment_skips_coefficients() {
    let store = seeded_store();
    let boundary = boundary(vec![development(rect(5_000.0, 5_000.0, 5_100.0, 5_100.0))]);
    let unit = unit_for(AssessmentType::Nutrient, &AssessmentSettings::default());
    let tables = unit
        .run(&boundary, &JobMetadata::new("job-2"), &store)
        .await
        .unwrap();

    let summary = &tables[IMPACT_SUMMARY];
    assert_eq!(summary.num_rows(), 0);
    assert!(summary.schema().field_with_name("n_total").is_ok());
    assert_eq!(store.queries_for(&Source::Coefficients), 0);
    assert_eq!(store.queries_for(&Source::Layer(LayerKind::NnCatchments)), 1);
}

#[tokio::test]
async fn boundary_without_required_attribute_is_rejected() {
    let store = seeded_store();
    let boundary = boundary(vec![rect(400.0, 100.0, 600.0, 200.0).with_attr("id", "job-3")]);
    let unit = unit_for(AssessmentType::Nutrient, &AssessmentSettings::default());
    let err = unit
        .run(&boundary, &JobMetadata::new("job-3"), &store)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AssessmentError::MissingAttribute { layer: "boundary", attribute: "dwelling_category" }
    ));
}
