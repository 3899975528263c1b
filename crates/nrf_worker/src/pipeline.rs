//! One job, start to finish: fetch, prepare, assess, adapt, persist.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use nrf_assessments::{adapt, unit_for, AssessmentSettings};
use nrf_protocol::defaults::WEB_SUBMISSION_SOURCE;
use nrf_protocol::ImpactAssessmentJob;
use nrf_reference::{JobSession, ReferenceStore};
use nrf_spatial::{Boundary, Crs, FeatureSet};

use crate::error::JobError;
use crate::input::{decode_boundary, InputStore};
use crate::sink::{JobOutcome, ResultSink};

pub struct Pipeline {
    input: Arc<dyn InputStore>,
    store: Arc<dyn ReferenceStore>,
    sink: Arc<dyn ResultSink>,
    settings: AssessmentSettings,
    target: Crs,
}

impl Pipeline {
    pub fn new(
        input: Arc<dyn InputStore>,
        store: Arc<dyn ReferenceStore>,
        sink: Arc<dyn ResultSink>,
        settings: AssessmentSettings,
        target: Crs,
    ) -> Self {
        Self {
            input,
            store,
            sink,
            settings,
            target,
        }
    }

    /// Run `job` and persist its results. The sink is called exactly once on
    /// success and never on failure.
    pub async fn run(&self, job: &ImpactAssessmentJob) -> Result<JobOutcome, JobError> {
        let bytes = self.input.fetch(&job.s3_input_key).await?;
        let mut raw = decode_boundary(&job.s3_input_key, &bytes)?;
        debug!(features = raw.len(), key = %job.s3_input_key, "decoded boundary");
        attach_job_attributes(&mut raw, job);

        let boundary = Boundary::prepare(raw, self.target, self.settings.grid)?;

        let session = JobSession::new(Arc::clone(&self.store));
        let unit = unit_for(job.assessment_type, &self.settings);
        let tables = unit
            .run(&boundary, &job.assessment_metadata(), &session)
            .await?;
        let records = adapt(job.assessment_type, &tables)?;

        let outcome = JobOutcome {
            job: job.clone(),
            records,
            tables,
            reference_versions: session.pins().await,
        };
        self.sink.persist(&outcome).await?;

        info!(
            assessment_type = %job.assessment_type,
            features = boundary.len(),
            records = outcome.records.len(),
            "assessment complete"
        );
        Ok(outcome)
    }
}

/// Stamp every boundary feature with the development details from the job.
/// Job values replace same-named properties from the uploaded file.
fn attach_job_attributes(set: &mut FeatureSet, job: &ImpactAssessmentJob) {
    for feature in &mut set.features {
        let attrs = &mut feature.attributes;
        attrs.insert("id".into(), Value::from(job.job_id.clone()));
        attrs.insert("name".into(), Value::from(job.development_name.clone()));
        attrs.insert(
            "dwelling_category".into(),
            Value::from(job.dwelling_type.clone()),
        );
        attrs.insert("source".into(), Value::from(WEB_SUBMISSION_SOURCE));
        attrs.insert("dwellings".into(), Value::from(job.number_of_dwellings));
    }
}
