//! Intake loop against in-memory queue, store and sink.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geo::polygon;
use serde_json::json;
use tempfile::TempDir;

use nrf_assessments::{AssessmentRecords, AssessmentSettings};
use nrf_logging::capture::LogCapture;
use nrf_protocol::IntakeConfig;
use nrf_reference::{InMemoryReferenceStore, LayerKind, Row, Source};
use nrf_spatial::{Crs, Feature, FeatureSet};
use nrf_worker::{
    FileResultSink, InMemoryJobQueue, InputError, InputStore, IntakeLoop, JobQueue, JobState,
    LocalInputStore, MemoryResultSink, Pipeline, ResultSink, ShutdownOutcome,
};

const BOUNDARY: &str = r#"{
    "type": "FeatureCollection",
    "crs": {"type": "name", "properties": {"name": "EPSG:27700"}},
    "features": [{
        "type": "Feature",
        "properties": {"parcel": "P1"},
        "geometry": {"type": "Polygon", "coordinates": [[[400,100],[600,100],[600,200],[400,200],[400,100]]]}
    }]
}"#;

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

fn seeded_store() -> InMemoryReferenceStore {
    let store = InMemoryReferenceStore::default();
    store.publish_layer(
        &Source::Layer(LayerKind::NnCatchments),
        &bng(vec![rect(0.0, 0.0, 1_000.0, 1_000.0).with_attr("N2K_Site_N", "Solent")]),
    );
    store.publish_layer(
        &Source::Coefficients,
        &bng(vec![rect(0.0, 0.0, 1_000.0, 1_000.0)
            .with_attr("lu_curr_n_coeff", 10.0)
            .with_attr("n_resi_coeff", 20.0)
            .with_attr("lu_curr_p_coeff", 1.0)
            .with_attr("p_resi_coeff", 2.0)]),
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
        rows(vec![json!({
            "wwtw_code": 7,
            "wwtw_name": "Testford",
            "wwtw_subcatchment": "Test",
            "nitrogen_conc_2025_2030_mg_L": 10.0,
            "nitrogen_conc_2030_onwards_mg_L": 8.0,
            "phosphorus_conc_2025_2030_mg_L": 1.0,
            "phosphorus_conc_2030_onwards_mg_L": 0.5
        })]),
    );
    store
}

/// Serves the boundary after a delay, keeping a job in flight.
struct SlowInput {
    delay: Duration,
}

#[async_trait]
impl InputStore for SlowInput {
    async fn fetch(&self, _key: &str) -> Result<Vec<u8>, InputError> {
        tokio::time::sleep(self.delay).await;
        Ok(BOUNDARY.as_bytes().to_vec())
    }
}

fn gcn_store_without_zone_attribute() -> InMemoryReferenceStore {
    let store = InMemoryReferenceStore::default();
    store.publish_layer(
        &Source::Layer(LayerKind::GcnRiskZones),
        &bng(vec![rect(0.0, 0.0, 1_000.0, 1_000.0).with_attr("zone", "Red")]),
    );
    store.publish_layer(
        &Source::Layer(LayerKind::GcnPonds),
        &bng(vec![rect(450.0, 120.0, 460.0, 130.0)]),
    );
    store
}

fn job_body(job_id: &str, input_key: &str) -> String {
    job_body_for(job_id, input_key, "nutrient")
}

fn job_body_for(job_id: &str, input_key: &str, assessment_type: &str) -> String {
    json!({
        "job_id": job_id,
        "s3_input_key": input_key,
        "developer_email": "dev@example.com",
        "submitted_at": "2025-03-01T09:30:00Z",
        "development_name": "Riverside",
        "dwelling_type": "house",
        "number_of_dwellings": 10,
        "assessment_type": assessment_type
    })
    .to_string()
}

struct Harness {
    _inputs: TempDir,
    queue: Arc<InMemoryJobQueue>,
    sink: Arc<MemoryResultSink>,
    intake: IntakeLoop,
}

fn harness_with_sink(sink: Arc<dyn ResultSink>, memory: Arc<MemoryResultSink>) -> Harness {
    let inputs = TempDir::new().unwrap();
    std::fs::write(inputs.path().join("site.geojson"), BOUNDARY).unwrap();
    let input = Arc::new(LocalInputStore::new(inputs.path()));
    build_harness(inputs, input, seeded_store(), sink, memory, IntakeConfig::default())
}

fn build_harness(
    inputs: TempDir,
    input: Arc<dyn InputStore>,
    store: InMemoryReferenceStore,
    sink: Arc<dyn ResultSink>,
    memory: Arc<MemoryResultSink>,
    config: IntakeConfig,
) -> Harness {
    let queue = Arc::new(InMemoryJobQueue::new());
    let pipeline = Pipeline::new(
        input,
        Arc::new(store),
        sink,
        AssessmentSettings::default(),
        Crs::BRITISH_NATIONAL_GRID,
    );
    let intake = IntakeLoop::new(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        Arc::new(pipeline),
        config,
    );
    Harness {
        _inputs: inputs,
        queue,
        sink: memory,
        intake,
    }
}

/// Harness whose input fetch takes `delay`, with the given grace period.
fn slow_harness(delay: Duration, grace_seconds: u64) -> Harness {
    let sink = Arc::new(MemoryResultSink::new());
    let config = IntakeConfig {
        graceful_shutdown_seconds: grace_seconds,
        ..IntakeConfig::default()
    };
    build_harness(
        TempDir::new().unwrap(),
        Arc::new(SlowInput { delay }),
        seeded_store(),
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        sink,
        config,
    )
}

fn harness() -> Harness {
    let sink = Arc::new(MemoryResultSink::new());
    harness_with_sink(Arc::clone(&sink) as Arc<dyn ResultSink>, sink)
}

#[tokio::test]
async fn successful_job_is_persisted_then_deleted() {
    let h = harness();
    h.queue.send(job_body("job-1", "site.geojson"));

    let states = h.intake.poll_once().await.unwrap();
    assert_eq!(states, vec![JobState::Committed]);
    assert_eq!(h.queue.deletes().len(), 1);
    assert_eq!(h.queue.depth(), 0);

    let persisted = h.sink.persisted();
    assert_eq!(persisted.len(), 1);
    let outcome = &persisted[0];
    assert_eq!(outcome.job.job_id, "job-1");
    let AssessmentRecords::Nutrient(results) = &outcome.records else {
        panic!("expected nutrient records");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].development.id, "job-1");
    assert_eq!(results[0].development.dwellings, 10);
    assert_eq!(results[0].spatial.lpa_name, "Testshire");
    assert!(outcome
        .reference_versions
        .contains_key(&Source::Layer(LayerKind::NnCatchments).name()));
}

#[tokio::test]
async fn failing_job_is_never_deleted() {
    let h = harness();
    h.queue.send(job_body("job-2", "missing.geojson"));

    let states = h.intake.poll_once().await.unwrap();
    assert_eq!(states, vec![JobState::Abandoned]);
    assert!(h.queue.deletes().is_empty());
    assert!(h.sink.persisted().is_empty());
    assert_eq!(h.queue.depth(), 1);
}

#[tokio::test]
async fn sink_failure_leaves_message_on_queue() {
    let failing = Arc::new(MemoryResultSink::failing("disk full"));
    let h = harness_with_sink(Arc::clone(&failing) as Arc<dyn ResultSink>, failing);
    h.queue.send(job_body("job-3", "site.geojson"));

    let states = h.intake.poll_once().await.unwrap();
    assert_eq!(states, vec![JobState::Abandoned]);
    assert!(h.queue.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn message_missing_assessment_type_stays_leased_until_timeout() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let h = harness();
    let mut body: serde_json::Value = serde_json::from_str(&job_body("job-4", "site.geojson")).unwrap();
    body.as_object_mut().unwrap().remove("assessment_type");
    let attributes = BTreeMap::from([("correlation_id".to_string(), "corr-e2e3".to_string())]);
    h.queue.send_with_attributes(body.to_string(), attributes);

    let states = h.intake.poll_once().await.unwrap();
    assert_eq!(states, vec![JobState::Abandoned]);
    assert!(h.queue.deletes().is_empty());

    let logs = capture.contents();
    assert!(logs.contains("ERROR"), "{logs}");
    assert!(logs.contains("corr-e2e3"), "{logs}");
    assert!(logs.contains("assessment_type"), "{logs}");

    let visibility = IntakeConfig::default().visibility_timeout();
    let leased = h.queue.receive(1, Duration::ZERO, visibility).await.unwrap();
    assert!(leased.is_empty(), "message must stay invisible while leased");

    tokio::time::advance(visibility).await;
    let redelivered = h.queue.receive(1, Duration::ZERO, visibility).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].receive_count, 2);
}

#[tokio::test]
async fn file_sink_writes_results_for_committed_job() {
    let out = TempDir::new().unwrap();
    let file_sink: Arc<dyn ResultSink> = Arc::new(FileResultSink::new(out.path()));
    let h = harness_with_sink(file_sink, Arc::new(MemoryResultSink::new()));
    h.queue.send(job_body("job-5", "site.geojson"));

    assert_eq!(h.intake.poll_once().await.unwrap(), vec![JobState::Committed]);
    assert!(out.path().join("job-5.json").exists());
    assert!(out.path().join("job-5_impact_summary.parquet").exists());
}

#[tokio::test(start_paused = true)]
async fn idle_loop_shuts_down_gracefully() {
    let h = harness();
    let handle = h.intake.spawn();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.shutdown().await, ShutdownOutcome::Graceful);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_job_finishing_within_grace() {
    let h = slow_harness(Duration::from_secs(5), 30);
    h.queue.send(job_body("job-6", "site.geojson"));
    let queue = Arc::clone(&h.queue);
    let sink = Arc::clone(&h.sink);

    let handle = h.intake.spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(sink.persisted().is_empty(), "job should still be fetching input");

    assert_eq!(handle.shutdown().await, ShutdownOutcome::Graceful);
    assert_eq!(queue.deletes().len(), 1);
    assert_eq!(sink.persisted().len(), 1);
    assert_eq!(queue.depth(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_job_outliving_grace() {
    let h = slow_harness(Duration::from_secs(120), 5);
    h.queue.send(job_body("job-7", "site.geojson"));
    let queue = Arc::clone(&h.queue);
    let sink = Arc::clone(&h.sink);

    let handle = h.intake.spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(handle.shutdown().await, ShutdownOutcome::Aborted);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(queue.deletes().is_empty());
    assert!(sink.persisted().is_empty());
    assert_eq!(queue.depth(), 1);
}

#[tokio::test]
async fn calculation_failure_is_logged_with_kind_and_left_on_queue() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let inputs = TempDir::new().unwrap();
    std::fs::write(inputs.path().join("site.geojson"), BOUNDARY).unwrap();
    let input = Arc::new(LocalInputStore::new(inputs.path()));
    let sink = Arc::new(MemoryResultSink::new());
    let h = build_harness(
        inputs,
        input,
        gcn_store_without_zone_attribute(),
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        sink,
        IntakeConfig::default(),
    );
    let attributes = BTreeMap::from([("correlation_id".to_string(), "corr-gcn-8".to_string())]);
    h.queue
        .send_with_attributes(job_body_for("job-8", "site.geojson", "gcn"), attributes);

    let states = h.intake.poll_once().await.unwrap();
    assert_eq!(states, vec![JobState::Abandoned]);
    assert!(h.queue.deletes().is_empty());
    assert!(h.sink.persisted().is_empty());
    assert_eq!(h.queue.depth(), 1);

    let logs = capture.contents();
    let failure = logs
        .lines()
        .find(|line| line.contains("job failed"))
        .unwrap_or_else(|| panic!("no failure line in {logs}"));
    assert!(failure.contains("ERROR"), "{failure}");
    assert!(failure.contains("correlation_id=corr-gcn-8"), "{failure}");
    assert!(failure.contains("kind=infrastructure"), "{failure}");
    assert!(failure.contains("'RZ'"), "{failure}");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_written_after_each_poll() {
    let dir = TempDir::new().unwrap();
    let heartbeat = dir.path().join("heartbeat");
    let h = harness();
    let intake = h.intake.with_heartbeat(Some(heartbeat.clone()));

    assert!(intake.poll_once().await.unwrap().is_empty());
    let stamp = std::fs::read_to_string(&heartbeat).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok(), "{stamp}");
}
