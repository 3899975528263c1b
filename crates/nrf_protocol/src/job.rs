//! Queue payload for one impact assessment request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;
use crate::types::AssessmentType;

/// A validated job message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactAssessmentJob {
    pub job_id: String,
    /// Key of the boundary file in the input store.
    pub s3_input_key: String,
    pub developer_email: String,
    pub submitted_at: DateTime<Utc>,
    /// May be empty, but must be present in the message.
    pub development_name: String,
    pub dwelling_type: String,
    pub number_of_dwellings: u32,
    pub assessment_type: AssessmentType,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Wire shape before validation. Every field is optional so that a missing
/// field can be reported by name instead of as a serde position.
#[derive(Debug, Deserialize)]
struct RawJob {
    job_id: Option<String>,
    s3_input_key: Option<String>,
    developer_email: Option<String>,
    submitted_at: Option<String>,
    development_name: Option<String>,
    dwelling_type: Option<String>,
    number_of_dwellings: Option<Value>,
    assessment_type: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl ImpactAssessmentJob {
    /// Decode and validate a queue message body.
    pub fn from_message_body(body: &str) -> Result<Self, EnvelopeError> {
        let raw: RawJob = serde_json::from_str(body)?;

        let job_id = required_text("job_id", raw.job_id)?;
        validate_job_id(&job_id)?;
        let s3_input_key = required_text("s3_input_key", raw.s3_input_key)?;
        let developer_email = required_text("developer_email", raw.developer_email)?;
        validate_email(&developer_email)?;

        let submitted_at = raw
            .submitted_at
            .ok_or(EnvelopeError::MissingField("submitted_at"))?;
        let submitted_at = DateTime::parse_from_rfc3339(submitted_at.trim())
            .map_err(|e| EnvelopeError::invalid("submitted_at", e.to_string()))?
            .with_timezone(&Utc);

        let development_name = raw
            .development_name
            .ok_or(EnvelopeError::MissingField("development_name"))?;
        let dwelling_type = required_text("dwelling_type", raw.dwelling_type)?;

        let number_of_dwellings = match raw.number_of_dwellings {
            None | Some(Value::Null) => {
                return Err(EnvelopeError::MissingField("number_of_dwellings"))
            }
            Some(value) => parse_dwellings(&value)?,
        };

        let assessment_type = raw
            .assessment_type
            .ok_or(EnvelopeError::MissingField("assessment_type"))?
            .parse::<AssessmentType>()?;

        Ok(Self {
            job_id,
            s3_input_key,
            developer_email,
            submitted_at,
            development_name,
            dwelling_type,
            number_of_dwellings,
            assessment_type,
            metadata: raw.metadata.unwrap_or_default(),
        })
    }

    pub fn to_message_body(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Metadata handed to an assessment unit.
    pub fn assessment_metadata(&self) -> JobMetadata {
        JobMetadata {
            unique_ref: self.job_id.clone(),
            extra: self.metadata.clone(),
        }
    }
}

/// Job metadata visible to calculation units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMetadata {
    /// Run reference stamped onto every result row.
    pub unique_ref: String,
    pub extra: Map<String, Value>,
}

impl JobMetadata {
    pub fn new(unique_ref: impl Into<String>) -> Self {
        Self {
            unique_ref: unique_ref.into(),
            extra: Map::new(),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, EnvelopeError> {
    let value = value.ok_or(EnvelopeError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(EnvelopeError::invalid(field, "must not be empty"));
    }
    Ok(value)
}

fn parse_dwellings(value: &Value) -> Result<u32, EnvelopeError> {
    let count = value
        .as_i64()
        .ok_or_else(|| EnvelopeError::invalid("number_of_dwellings", "must be an integer"))?;
    if count < 1 {
        return Err(EnvelopeError::invalid(
            "number_of_dwellings",
            format!("must be at least 1, got {count}"),
        ));
    }
    u32::try_from(count)
        .map_err(|_| EnvelopeError::invalid("number_of_dwellings", "is too large"))
}

/// Job ids name result files, so they must be a single path component.
fn validate_job_id(job_id: &str) -> Result<(), EnvelopeError> {
    if job_id.contains(['/', '\\']) || job_id.contains("..") || job_id == "." {
        return Err(EnvelopeError::invalid(
            "job_id",
            format!("'{job_id}' must not contain path separators or '..'"),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), EnvelopeError> {
    let invalid = || EnvelopeError::invalid("developer_email", format!("'{email}' is not an email address"));
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "job_id": "550e8400-e29b-41d4-a716-446655440000",
            "s3_input_key": "jobs/550e8400/input.geojson",
            "developer_email": "developer@example.com",
            "submitted_at": "2025-10-15T14:30:00Z",
            "development_name": "Big homes",
            "dwelling_type": "apartment",
            "number_of_dwellings": 25,
            "assessment_type": "nutrient"
        })
    }

    #[test]
    fn decodes_a_complete_message() {
        let job = ImpactAssessmentJob::from_message_body(&valid_body().to_string()).unwrap();
        assert_eq!(job.assessment_type, AssessmentType::Nutrient);
        assert_eq!(job.number_of_dwellings, 25);
        assert_eq!(job.submitted_at.to_rfc3339(), "2025-10-15T14:30:00+00:00");
        assert!(job.metadata.is_empty());
        assert_eq!(job.assessment_metadata().unique_ref, job.job_id);
    }

    #[test]
    fn missing_assessment_type_is_reported_by_name() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("assessment_type");
        let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("assessment_type")));
    }

    #[test]
    fn unknown_assessment_type_is_rejected() {
        let mut body = valid_body();
        body["assessment_type"] = json!("bats");
        let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedAssessmentType(_)));
    }

    #[test]
    fn zero_dwellings_is_invalid() {
        let mut body = valid_body();
        body["number_of_dwellings"] = json!(0);
        let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::InvalidField {
                field: "number_of_dwellings",
                ..
            }
        ));
    }

    #[test]
    fn job_id_must_be_a_single_path_component() {
        for job_id in ["../escape", "a/b", "a\\b", "..", ".", "x..y"] {
            let mut body = valid_body();
            body["job_id"] = json!(job_id);
            let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
            assert!(
                matches!(err, EnvelopeError::InvalidField { field: "job_id", .. }),
                "{job_id} should be rejected"
            );
        }
        let mut body = valid_body();
        body["job_id"] = json!("job-1.v2");
        assert!(ImpactAssessmentJob::from_message_body(&body.to_string()).is_ok());
    }

    #[test]
    fn malformed_email_is_invalid() {
        for email in ["not-an-email", "a@b", "a @b.com", "@example.com"] {
            let mut body = valid_body();
            body["developer_email"] = json!(email);
            let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
            assert!(
                matches!(err, EnvelopeError::InvalidField { field: "developer_email", .. }),
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn empty_development_name_is_allowed_but_absent_is_not() {
        let mut body = valid_body();
        body["development_name"] = json!("");
        assert!(ImpactAssessmentJob::from_message_body(&body.to_string()).is_ok());

        body.as_object_mut().unwrap().remove("development_name");
        let err = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("development_name")));
    }

    #[test]
    fn extra_keys_are_ignored_and_metadata_is_kept() {
        let mut body = valid_body();
        body["unexpected"] = json!(true);
        body["metadata"] = json!({"survey": "2025"});
        let job = ImpactAssessmentJob::from_message_body(&body.to_string()).unwrap();
        assert_eq!(job.assessment_metadata().get_str("survey"), Some("2025"));
    }

    #[test]
    fn encoded_message_decodes_to_the_same_job() -> anyhow::Result<()> {
        let job = ImpactAssessmentJob::from_message_body(&valid_body().to_string())?;
        let again = ImpactAssessmentJob::from_message_body(&job.to_message_body()?)?;
        assert_eq!(job, again);
        Ok(())
    }
}
