//! Command line and environment configuration for the worker binary.

use std::path::PathBuf;

use clap::Parser;

use nrf_assessments::AssessmentSettings;
use nrf_protocol::defaults::*;
use nrf_protocol::{ConfigError, GcnConfig, IntakeConfig, NutrientConfig, SpatialConfig, SudsConfig};
use nrf_spatial::{Crs, GridSize, Tolerance};

#[derive(Parser, Debug, Clone)]
#[command(name = "nrf-worker", about = "NRF impact assessment worker", version)]
pub struct WorkerArgs {
    /// SQLite database holding the job queue
    #[arg(long, env = "NRF_QUEUE_DB")]
    pub queue_db: PathBuf,

    /// SQLite database holding versioned reference layers
    #[arg(long, env = "NRF_REFERENCE_DB")]
    pub reference_db: PathBuf,

    /// Connections in the shared reference store pool
    #[arg(long, env = "NRF_REFERENCE_MAX_CONNECTIONS", default_value_t = 4)]
    pub reference_max_connections: u32,

    /// Directory that input keys resolve under
    #[arg(long, env = "NRF_INPUT_ROOT")]
    pub input_root: PathBuf,

    /// Directory receiving result documents and tables
    #[arg(long, env = "NRF_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// File rewritten with the current time after each queue poll
    #[arg(long, env = "NRF_HEARTBEAT_FILE")]
    pub heartbeat_file: Option<PathBuf>,

    #[arg(long, env = "SQS_WAIT_TIME_SECONDS", default_value_t = DEFAULT_WAIT_TIME_SECONDS)]
    pub wait_time_seconds: u64,

    #[arg(long, env = "SQS_VISIBILITY_TIMEOUT", default_value_t = DEFAULT_VISIBILITY_TIMEOUT_SECONDS)]
    pub visibility_timeout: u64,

    #[arg(long, env = "SQS_MAX_MESSAGES", default_value_t = DEFAULT_MAX_MESSAGES)]
    pub max_messages: usize,

    #[arg(long, env = "GRACEFUL_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_GRACEFUL_SHUTDOWN_SECONDS)]
    pub graceful_shutdown_timeout: u64,

    /// Receives after which the queue moves a message to its dead letter table
    #[arg(long, env = "NRF_MAX_RECEIVE_COUNT")]
    pub max_receive_count: Option<u32>,

    #[arg(long, env = "NRF_TARGET_CRS", default_value = DEFAULT_TARGET_CRS)]
    pub target_crs: String,

    #[arg(long, env = "NRF_PRECISION_GRID_SIZE", default_value_t = DEFAULT_PRECISION_GRID_SIZE)]
    pub precision_grid_size: f64,

    #[arg(long, env = "NRF_TOLERANCE_RELATIVE", default_value_t = DEFAULT_TOLERANCE_RELATIVE)]
    pub tolerance_relative: f64,

    #[arg(long, env = "NRF_TOLERANCE_ABSOLUTE", default_value_t = DEFAULT_TOLERANCE_ABSOLUTE)]
    pub tolerance_absolute: f64,

    #[arg(long, env = "GCN_BUFFER_DISTANCE_M", default_value_t = DEFAULT_GCN_BUFFER_DISTANCE_M)]
    pub gcn_buffer_distance_m: f64,

    #[arg(long, env = "GCN_POND_BUFFER_DISTANCE_M", default_value_t = DEFAULT_GCN_POND_BUFFER_DISTANCE_M)]
    pub gcn_pond_buffer_distance_m: f64,

    #[arg(long, env = "GCN_MERGE_DISTANCE_M", default_value_t = DEFAULT_GCN_MERGE_DISTANCE_M)]
    pub gcn_merge_distance_m: f64,

    #[arg(long, env = "IAT_PRECAUTIONARY_BUFFER_PERCENT", default_value_t = DEFAULT_PRECAUTIONARY_BUFFER_PERCENT)]
    pub precautionary_buffer_percent: f64,

    #[arg(long, env = "IAT_FALLBACK_WWTW_ID", default_value_t = DEFAULT_FALLBACK_WWTW_ID)]
    pub fallback_wwtw_id: i64,

    #[arg(long, env = "SUDS_THRESHOLD_DWELLINGS", default_value_t = DEFAULT_SUDS_THRESHOLD_DWELLINGS)]
    pub suds_threshold_dwellings: u32,

    #[arg(long, env = "SUDS_FLOW_CAPTURE_PERCENT", default_value_t = DEFAULT_SUDS_FLOW_CAPTURE_PERCENT)]
    pub suds_flow_capture_percent: f64,

    #[arg(long, env = "SUDS_REMOVAL_RATE_PERCENT", default_value_t = DEFAULT_SUDS_REMOVAL_RATE_PERCENT)]
    pub suds_removal_rate_percent: f64,

    /// Newline-delimited JSON logs on stderr
    #[arg(long, env = "NRF_LOG_JSON")]
    pub log_json: bool,

    /// Also write logs to files in this directory
    #[arg(long, env = "NRF_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Debug-level console logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated settings derived from [`WorkerArgs`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub intake: IntakeConfig,
    pub spatial: SpatialConfig,
    pub assessment: AssessmentSettings,
    pub target_crs: Crs,
    pub tolerance: Tolerance,
}

impl WorkerArgs {
    pub fn settings(&self) -> Result<WorkerSettings, ConfigError> {
        let intake = IntakeConfig {
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout,
            max_messages: self.max_messages,
            graceful_shutdown_seconds: self.graceful_shutdown_timeout,
        };
        intake.validate()?;

        let spatial = SpatialConfig {
            target_crs: self.target_crs.clone(),
            precision_grid_size: self.precision_grid_size,
            tolerance_relative: self.tolerance_relative,
            tolerance_absolute: self.tolerance_absolute,
        };
        spatial.validate()?;
        let target_crs = Crs::parse(&spatial.target_crs)
            .map_err(|e| ConfigError::new("NRF_TARGET_CRS", e.to_string()))?;
        let grid = GridSize::new(spatial.precision_grid_size)
            .map_err(|e| ConfigError::new("NRF_PRECISION_GRID_SIZE", e.to_string()))?;

        let gcn = GcnConfig {
            buffer_distance_m: self.gcn_buffer_distance_m,
            pond_buffer_distance_m: self.gcn_pond_buffer_distance_m,
            merge_distance_m: self.gcn_merge_distance_m,
        };
        gcn.validate()?;

        let nutrient = NutrientConfig {
            precautionary_buffer_percent: self.precautionary_buffer_percent,
            fallback_wwtw_id: self.fallback_wwtw_id,
            suds: SudsConfig {
                threshold_dwellings: self.suds_threshold_dwellings,
                flow_capture_percent: self.suds_flow_capture_percent,
                removal_rate_percent: self.suds_removal_rate_percent,
            },
        };
        nutrient.validate()?;

        if self.reference_max_connections == 0 {
            return Err(ConfigError::new(
                "NRF_REFERENCE_MAX_CONNECTIONS",
                "must be at least 1",
            ));
        }
        if self.max_receive_count == Some(0) {
            return Err(ConfigError::new("NRF_MAX_RECEIVE_COUNT", "must be at least 1"));
        }

        Ok(WorkerSettings {
            tolerance: Tolerance::new(spatial.tolerance_relative, spatial.tolerance_absolute),
            intake,
            spatial,
            assessment: AssessmentSettings {
                grid,
                nutrient,
                gcn,
            },
            target_crs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "nrf-worker",
        "--queue-db",
        "queue.db",
        "--reference-db",
        "reference.db",
        "--input-root",
        "inputs",
        "--output-dir",
        "results",
    ];

    fn parse(extra: &[&str]) -> WorkerArgs {
        WorkerArgs::try_parse_from(REQUIRED.iter().chain(extra)).unwrap()
    }

    #[test]
    fn defaults_validate() {
        let settings = parse(&[]).settings().unwrap();
        assert_eq!(settings.intake, IntakeConfig::default());
        assert_eq!(settings.target_crs, Crs::BRITISH_NATIONAL_GRID);
        assert_eq!(settings.assessment.gcn, GcnConfig::default());
        assert_eq!(settings.assessment.nutrient, NutrientConfig::default());
        assert_eq!(settings.tolerance, Tolerance::default());
    }

    #[test]
    fn out_of_range_values_fail() {
        let err = parse(&["--wait-time-seconds", "21"]).settings().unwrap_err();
        assert_eq!(err.setting, "SQS_WAIT_TIME_SECONDS");

        let err = parse(&["--visibility-timeout", "10"]).settings().unwrap_err();
        assert_eq!(err.setting, "SQS_VISIBILITY_TIMEOUT");

        let err = parse(&["--max-messages", "11"]).settings().unwrap_err();
        assert_eq!(err.setting, "SQS_MAX_MESSAGES");

        let err = parse(&["--precision-grid-size", "0"]).settings().unwrap_err();
        assert_eq!(err.setting, "NRF_PRECISION_GRID_SIZE");

        let err = parse(&["--target-crs", "local"]).settings().unwrap_err();
        assert_eq!(err.setting, "NRF_TARGET_CRS");
    }

    #[test]
    fn overrides_reach_assessment_settings() {
        let settings = parse(&[
            "--gcn-merge-distance-m",
            "750",
            "--suds-removal-rate-percent",
            "40",
            "--max-messages",
            "5",
        ])
        .settings()
        .unwrap();
        assert_eq!(settings.assessment.gcn.merge_distance_m, 750.0);
        assert_eq!(settings.assessment.nutrient.suds.removal_rate_percent, 40.0);
        assert_eq!(settings.intake.max_messages, 5);
    }

    #[test]
    fn tolerance_overrides_are_carried() {
        let settings = parse(&["--tolerance-relative", "0.005", "--tolerance-absolute", "0.5"])
            .settings()
            .unwrap();
        assert_eq!(settings.tolerance, Tolerance::new(0.005, 0.5));
        assert!(settings.tolerance.matches(100.4, 100.0));

        let err = parse(&["--tolerance-absolute=-1"]).settings().unwrap_err();
        assert_eq!(err.setting, "NRF_TOLERANCE_ABSOLUTE");
    }

    #[test]
    fn required_paths_are_enforced() {
        assert!(WorkerArgs::try_parse_from(["nrf-worker"]).is_err());
    }
}
