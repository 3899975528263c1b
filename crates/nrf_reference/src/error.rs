use thiserror::Error;

use nrf_spatial::SpatialError;

/// Reference store result type.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Feature output was requested from a statement that selects no geometry.
    #[error("query on '{0}' has no geometry column; request row output instead")]
    NoGeometryColumn(String),

    #[error("reference query failed: {0}")]
    Execution(String),

    #[error("reference database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored reference data could not be decoded: {0}")]
    Decode(String),

    #[error("no published version {version} of '{source_name}'")]
    VersionNotFound {
        source_name: String,
        version: String,
    },

    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

impl StoreError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn version_not_found(source_name: impl Into<String>, version: impl ToString) -> Self {
        Self::VersionNotFound {
            source_name: source_name.into(),
            version: version.to_string(),
        }
    }

    /// Connectivity and statement failures, as opposed to bad data.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Database(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
