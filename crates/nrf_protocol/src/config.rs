//! Plain configuration shared by the worker binary and the assessment units.
//!
//! Values are populated by the worker's CLI/env layer; every struct here has a
//! `Default` matching [`crate::defaults`] and a `validate` that enforces the
//! accepted ranges.

use std::time::Duration;

use crate::defaults::*;
use crate::error::ConfigError;

/// Queue polling and shutdown behaviour of the intake loop.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeConfig {
    pub wait_time_seconds: u64,
    pub visibility_timeout_seconds: u64,
    pub max_messages: usize,
    pub graceful_shutdown_seconds: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            max_messages: DEFAULT_MAX_MESSAGES,
            graceful_shutdown_seconds: DEFAULT_GRACEFUL_SHUTDOWN_SECONDS,
        }
    }
}

impl IntakeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "SQS_WAIT_TIME_SECONDS",
            self.wait_time_seconds,
            1,
            MAX_WAIT_TIME_SECONDS,
        )?;
        check_range(
            "SQS_VISIBILITY_TIMEOUT",
            self.visibility_timeout_seconds,
            MIN_VISIBILITY_TIMEOUT_SECONDS,
            MAX_VISIBILITY_TIMEOUT_SECONDS,
        )?;
        check_range(
            "SQS_MAX_MESSAGES",
            self.max_messages as u64,
            1,
            MAX_MAX_MESSAGES as u64,
        )?;
        check_range(
            "GRACEFUL_SHUTDOWN_TIMEOUT",
            self.graceful_shutdown_seconds,
            0,
            MAX_GRACEFUL_SHUTDOWN_SECONDS,
        )
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_seconds)
    }
}

/// Target reference system, precision grid and regression tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialConfig {
    pub target_crs: String,
    pub precision_grid_size: f64,
    pub tolerance_relative: f64,
    pub tolerance_absolute: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            target_crs: DEFAULT_TARGET_CRS.to_string(),
            precision_grid_size: DEFAULT_PRECISION_GRID_SIZE,
            tolerance_relative: DEFAULT_TOLERANCE_RELATIVE,
            tolerance_absolute: DEFAULT_TOLERANCE_ABSOLUTE,
        }
    }
}

impl SpatialConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("NRF_PRECISION_GRID_SIZE", self.precision_grid_size)?;
        check_non_negative("NRF_TOLERANCE_RELATIVE", self.tolerance_relative)?;
        check_non_negative("NRF_TOLERANCE_ABSOLUTE", self.tolerance_absolute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcnConfig {
    /// Buffer around the red line boundary.
    pub buffer_distance_m: f64,
    /// Buffer around each pond when computing habitat impact.
    pub pond_buffer_distance_m: f64,
    /// Boundary parts closer than this share one site reference.
    pub merge_distance_m: f64,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            buffer_distance_m: DEFAULT_GCN_BUFFER_DISTANCE_M,
            pond_buffer_distance_m: DEFAULT_GCN_POND_BUFFER_DISTANCE_M,
            merge_distance_m: DEFAULT_GCN_MERGE_DISTANCE_M,
        }
    }
}

impl GcnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("GCN_BUFFER_DISTANCE_M", self.buffer_distance_m)?;
        check_non_negative("GCN_POND_BUFFER_DISTANCE_M", self.pond_buffer_distance_m)?;
        check_non_negative("GCN_MERGE_DISTANCE_M", self.merge_distance_m)
    }
}

/// Sustainable drainage mitigation applied to land use uplift.
#[derive(Debug, Clone, PartialEq)]
pub struct SudsConfig {
    /// Carried for reporting; mitigation currently applies to every development.
    pub threshold_dwellings: u32,
    pub flow_capture_percent: f64,
    pub removal_rate_percent: f64,
}

impl Default for SudsConfig {
    fn default() -> Self {
        Self {
            threshold_dwellings: DEFAULT_SUDS_THRESHOLD_DWELLINGS,
            flow_capture_percent: DEFAULT_SUDS_FLOW_CAPTURE_PERCENT,
            removal_rate_percent: DEFAULT_SUDS_REMOVAL_RATE_PERCENT,
        }
    }
}

impl SudsConfig {
    /// Combined reduction as a fraction, e.g. 0.25.
    pub fn total_reduction_factor(&self) -> f64 {
        (self.flow_capture_percent / 100.0) * (self.removal_rate_percent / 100.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NutrientConfig {
    pub precautionary_buffer_percent: f64,
    pub fallback_wwtw_id: i64,
    pub suds: SudsConfig,
}

impl Default for NutrientConfig {
    fn default() -> Self {
        Self {
            precautionary_buffer_percent: DEFAULT_PRECAUTIONARY_BUFFER_PERCENT,
            fallback_wwtw_id: DEFAULT_FALLBACK_WWTW_ID,
            suds: SudsConfig::default(),
        }
    }
}

impl NutrientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative(
            "IAT_PRECAUTIONARY_BUFFER_PERCENT",
            self.precautionary_buffer_percent,
        )?;
        check_percent("SUDS_FLOW_CAPTURE_PERCENT", self.suds.flow_capture_percent)?;
        check_percent("SUDS_REMOVAL_RATE_PERCENT", self.suds.removal_rate_percent)
    }

    pub fn precautionary_buffer_factor(&self) -> f64 {
        self.precautionary_buffer_percent / 100.0
    }
}

fn check_range(setting: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::new(
            setting,
            format!("{value} is outside {min}..={max}"),
        ));
    }
    Ok(())
}

fn check_positive(setting: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::new(setting, format!("{value} must be > 0")));
    }
    Ok(())
}

fn check_non_negative(setting: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::new(setting, format!("{value} must be >= 0")));
    }
    Ok(())
}

fn check_percent(setting: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::new(setting, format!("{value} is not a percentage")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        IntakeConfig::default().validate().unwrap();
        SpatialConfig::default().validate().unwrap();
        GcnConfig::default().validate().unwrap();
        NutrientConfig::default().validate().unwrap();
    }

    #[test]
    fn wait_time_above_twenty_is_rejected() {
        let config = IntakeConfig {
            wait_time_seconds: 21,
            ..IntakeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.setting, "SQS_WAIT_TIME_SECONDS");
    }

    #[test]
    fn visibility_below_minimum_is_rejected() {
        let config = IntakeConfig {
            visibility_timeout_seconds: 10,
            ..IntakeConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().setting, "SQS_VISIBILITY_TIMEOUT");
    }

    #[test]
    fn zero_graceful_shutdown_is_allowed() {
        let config = IntakeConfig {
            graceful_shutdown_seconds: 0,
            ..IntakeConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn suds_reduction_factor_defaults_to_a_quarter() {
        let suds = SudsConfig::default();
        assert!((suds.total_reduction_factor() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn zero_grid_is_rejected() {
        let config = SpatialConfig {
            precision_grid_size: 0.0,
            ..SpatialConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().setting, "NRF_PRECISION_GRID_SIZE");
    }
}
