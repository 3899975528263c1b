//! Worker error types and their operator-facing classification.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use nrf_assessments::{AdapterError, AssessmentError};
use nrf_protocol::EnvelopeError;
use nrf_spatial::SpatialError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("receipt '{0}' does not match a leased message")]
    UnknownReceipt(String),

    #[error("stored message attributes are not valid JSON: {0}")]
    Attributes(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input '{0}' not found")]
    NotFound(String),

    #[error("input key '{0}' escapes the input root")]
    PathTraversal(String),

    #[error("failed to read input '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported input format '{0}'; expected .geojson, .json or .zip")]
    UnsupportedFormat(String),

    #[error("invalid archive '{key}': {reason}")]
    Archive { key: String, reason: String },

    #[error("invalid boundary document: {0}")]
    Boundary(#[from] SpatialError),
}

impl InputError {
    pub fn archive(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Archive {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write parquet table '{table}': {source}")]
    Parquet {
        table: String,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("failed to encode result document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result writer task failed: {0}")]
    Task(String),

    #[error("sink rejected the result: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure categories reported in operator logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad message or bad submitted data; redelivery will fail the same way.
    Input,
    /// Queue, store or filesystem trouble; redelivery may succeed.
    Infrastructure,
    /// The boundary could not be prepared or overlaid.
    Geometry,
    /// A bug: results the worker itself built are inconsistent.
    Programming,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Geometry => "geometry",
            ErrorKind::Programming => "programming",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of one job. The message is never acknowledged after one.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Geometry(#[from] SpatialError),

    #[error(transparent)]
    Assessment(#[from] AssessmentError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Envelope(_) => ErrorKind::Input,
            JobError::Input(InputError::Io { .. }) => ErrorKind::Infrastructure,
            JobError::Input(_) => ErrorKind::Input,
            JobError::Geometry(_) => ErrorKind::Geometry,
            JobError::Assessment(err) => match err {
                AssessmentError::UnsupportedType(_) => ErrorKind::Input,
                AssessmentError::MissingAttribute {
                    layer: "boundary", ..
                } => ErrorKind::Programming,
                AssessmentError::MissingAttribute { .. } => ErrorKind::Infrastructure,
                AssessmentError::Store(_) => ErrorKind::Infrastructure,
                AssessmentError::Spatial(_) => ErrorKind::Geometry,
                AssessmentError::Table { .. } => ErrorKind::Programming,
            },
            JobError::Adapter(_) => ErrorKind::Programming,
            JobError::Sink(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrf_reference::StoreError;

    #[test]
    fn kinds_follow_the_failing_stage() {
        let envelope: JobError = EnvelopeError::MissingField("assessment_type").into();
        assert_eq!(envelope.kind(), ErrorKind::Input);

        let store: JobError = AssessmentError::from(StoreError::execution("pool timed out")).into();
        assert_eq!(store.kind(), ErrorKind::Infrastructure);

        let geometry: JobError = SpatialError::MissingCrs.into();
        assert_eq!(geometry.kind(), ErrorKind::Geometry);

        let adapter: JobError = AdapterError::MissingTable("impact_summary".into()).into();
        assert_eq!(adapter.kind(), ErrorKind::Programming);
        assert_eq!(adapter.kind().to_string(), "programming");
    }

    #[test]
    fn unreadable_input_is_infrastructure_but_bad_format_is_input() {
        let io: JobError = InputError::Io {
            key: "a.geojson".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk"),
        }
        .into();
        assert_eq!(io.kind(), ErrorKind::Infrastructure);

        let format: JobError = InputError::UnsupportedFormat("shp".into()).into();
        assert_eq!(format.kind(), ErrorKind::Input);
    }
}
