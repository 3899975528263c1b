//! Canonical default values shared by the worker and the assessment units.

/// Long-poll wait for a queue receive, in seconds.
pub const DEFAULT_WAIT_TIME_SECONDS: u64 = 20;
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;

/// Lease length granted to a received message, in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 300;
pub const MIN_VISIBILITY_TIMEOUT_SECONDS: u64 = 30;
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

pub const DEFAULT_MAX_MESSAGES: usize = 1;
pub const MAX_MAX_MESSAGES: usize = 10;

/// Time an in-flight job may keep running after a shutdown signal, in seconds.
pub const DEFAULT_GRACEFUL_SHUTDOWN_SECONDS: u64 = 30;
pub const MAX_GRACEFUL_SHUTDOWN_SECONDS: u64 = 300;

/// British National Grid.
pub const DEFAULT_TARGET_CRS: &str = "EPSG:27700";
pub const DEFAULT_PRECISION_GRID_SIZE: f64 = 0.0001;
pub const DEFAULT_TOLERANCE_RELATIVE: f64 = 0.001;
pub const DEFAULT_TOLERANCE_ABSOLUTE: f64 = 0.01;

pub const DEFAULT_GCN_BUFFER_DISTANCE_M: f64 = 250.0;
pub const DEFAULT_GCN_POND_BUFFER_DISTANCE_M: f64 = 250.0;
pub const DEFAULT_GCN_MERGE_DISTANCE_M: f64 = 500.0;

pub const DEFAULT_PRECAUTIONARY_BUFFER_PERCENT: f64 = 20.0;
/// WwTW id used for developments outside every modelled catchment.
pub const DEFAULT_FALLBACK_WWTW_ID: i64 = 141;
pub const DEFAULT_SUDS_THRESHOLD_DWELLINGS: u32 = 50;
pub const DEFAULT_SUDS_FLOW_CAPTURE_PERCENT: f64 = 100.0;
pub const DEFAULT_SUDS_REMOVAL_RATE_PERCENT: f64 = 25.0;

/// Value written to the `source` attribute of every submitted boundary feature.
pub const WEB_SUBMISSION_SOURCE: &str = "web_submission";
/// Message attribute carrying the caller's correlation id.
pub const CORRELATION_ID_ATTRIBUTE: &str = "correlation_id";
