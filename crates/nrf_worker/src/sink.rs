//! Result persistence.
//!
//! `FileResultSink` writes one Parquet file per named table and then the
//! `{job_id}.json` result document. Each file is staged as `.{name}.tmp` and
//! committed by rename, so a redelivered job replaces its earlier output
//! without readers ever seeing a partial file. The JSON document is written
//! last and lists the tables with their digests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tracing::{debug, info};

use nrf_assessments::{AssessmentRecords, NamedTables};
use nrf_protocol::ImpactAssessmentJob;

use crate::error::SinkError;

pub type Result<T> = std::result::Result<T, SinkError>;

/// Everything produced by one successful job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: ImpactAssessmentJob,
    pub records: AssessmentRecords,
    pub tables: NamedTables,
    /// Reference source name to the version the job read.
    pub reference_versions: BTreeMap<String, i64>,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, outcome: &JobOutcome) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSummary {
    pub file: String,
    pub rows: usize,
    pub blake3: String,
}

#[derive(Debug, Serialize)]
struct ResultDocument<'a> {
    job_id: &'a str,
    completed_at: DateTime<Utc>,
    job: &'a ImpactAssessmentJob,
    reference_versions: &'a BTreeMap<String, i64>,
    #[serde(flatten)]
    records: &'a AssessmentRecords,
    tables: BTreeMap<String, TableSummary>,
}

pub fn table_filename(job_id: &str, table: &str) -> String {
    format!("{job_id}_{table}.parquet")
}

pub fn document_filename(job_id: &str) -> String {
    format!("{job_id}.json")
}

#[derive(Debug, Clone)]
pub struct FileResultSink {
    output_dir: PathBuf,
}

impl FileResultSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn persist(&self, outcome: &JobOutcome) -> Result<()> {
        let dir = self.output_dir.clone();
        let outcome = outcome.clone();
        tokio::task::spawn_blocking(move || write_outcome(&dir, &outcome))
            .await
            .map_err(|e| SinkError::Task(e.to_string()))?
    }
}

fn write_outcome(dir: &Path, outcome: &JobOutcome) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SinkError::io(dir, e))?;
    let job_id = outcome.job.job_id.as_str();

    let mut summaries = BTreeMap::new();
    for (name, batch) in &outcome.tables {
        let bytes = encode_parquet(name, batch)?;
        let file = table_filename(job_id, name);
        let digest = blake3::hash(&bytes).to_hex().to_string();
        write_atomic(dir, &file, &bytes)?;
        debug!(table = %name, rows = batch.num_rows(), file = %file, "wrote result table");
        summaries.insert(
            name.clone(),
            TableSummary {
                file,
                rows: batch.num_rows(),
                blake3: digest,
            },
        );
    }

    let document = ResultDocument {
        job_id,
        completed_at: Utc::now(),
        job: &outcome.job,
        reference_versions: &outcome.reference_versions,
        records: &outcome.records,
        tables: summaries,
    };
    let bytes = serde_json::to_vec_pretty(&document)?;
    let file = document_filename(job_id);
    write_atomic(dir, &file, &bytes)?;

    info!(
        job_id = %job_id,
        records = outcome.records.len(),
        tables = outcome.tables.len(),
        "committed job results to {}",
        dir.join(&file).display()
    );
    Ok(())
}

fn encode_parquet(table: &str, batch: &RecordBatch) -> Result<Vec<u8>> {
    let parquet_err = |source| SinkError::Parquet {
        table: table.to_string(),
        source,
    };
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props)).map_err(parquet_err)?;
    writer.write(batch).map_err(parquet_err)?;
    writer.into_inner().map_err(parquet_err)
}

/// Stage `bytes` as `.{name}.tmp` next to the target, then rename it over
/// `name`. The temp file is removed if the rename fails.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let final_path = dir.join(name);
    let temp_path = dir.join(format!(".{name}.tmp"));
    std::fs::write(&temp_path, bytes).map_err(|e| SinkError::io(&temp_path, e))?;
    if let Err(e) = std::fs::rename(&temp_path, &final_path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(SinkError::io(&final_path, e));
    }
    Ok(final_path)
}

/// Sink that keeps outcomes in memory, for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryResultSink {
    persisted: Arc<Mutex<Vec<JobOutcome>>>,
    failure: Option<String>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every `persist` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            persisted: Arc::default(),
            failure: Some(reason.into()),
        }
    }

    pub fn persisted(&self) -> Vec<JobOutcome> {
        match self.persisted.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn persist(&self, outcome: &JobOutcome) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(SinkError::Rejected(reason.clone()));
        }
        match self.persisted.lock() {
            Ok(mut guard) => guard.push(outcome.clone()),
            Err(poisoned) => poisoned.into_inner().push(outcome.clone()),
        }
        Ok(())
    }
}
