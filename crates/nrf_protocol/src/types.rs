//! Canonical enums shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EnvelopeError;

/// Assessment kinds the worker knows how to run.
///
/// The set is closed: a tag arriving from the queue that does not parse into
/// one of these variants is rejected before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentType {
    /// Nutrient neutrality (land use + wastewater loads).
    Nutrient,
    /// Great crested newt habitat and pond impact.
    Gcn,
}

impl AssessmentType {
    pub const ALL: [AssessmentType; 2] = [AssessmentType::Nutrient, AssessmentType::Gcn];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::Nutrient => "nutrient",
            AssessmentType::Gcn => "gcn",
        }
    }
}

impl fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssessmentType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nutrient" => Ok(AssessmentType::Nutrient),
            "gcn" => Ok(AssessmentType::Gcn),
            _ => Err(EnvelopeError::UnsupportedAssessmentType(s.to_string())),
        }
    }
}
