use arrow::error::ArrowError;
use thiserror::Error;

use nrf_reference::StoreError;
use nrf_spatial::SpatialError;

pub type Result<T> = std::result::Result<T, AssessmentError>;

#[derive(Debug, Error)]
pub enum AssessmentError {
    /// The tag names no registered calculation unit.
    #[error("unsupported assessment type '{0}'")]
    UnsupportedType(String),

    /// A boundary or reference feature lacks an attribute the unit needs.
    #[error("{layer} is missing required attribute '{attribute}'")]
    MissingAttribute {
        layer: &'static str,
        attribute: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error("failed to build result table '{table}': {source}")]
    Table {
        table: &'static str,
        #[source]
        source: ArrowError,
    },
}

impl AssessmentError {
    pub fn missing_attribute(layer: &'static str, attribute: &'static str) -> Self {
        Self::MissingAttribute { layer, attribute }
    }

    pub fn table(table: &'static str, source: ArrowError) -> Self {
        Self::Table { table, source }
    }
}

/// Failures turning result tables into typed records.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("result table '{0}' is missing")]
    MissingTable(String),

    #[error("result table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("column '{column}' of '{table}' is not {expected}")]
    ColumnType {
        table: String,
        column: String,
        expected: &'static str,
    },

    #[error("required value '{column}' is null in row {row} of '{table}'")]
    NullValue {
        table: String,
        column: String,
        row: usize,
    },

    #[error("result table '{0}' has no rows")]
    EmptyTable(String),
}
