use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidateUrl, ValidationError, ValidationErrors};

use crate::{
    dao::models::{CheckpointEntity, DimensionScores, ScoringMethod},
    dto::validation::{MAX_ANSWER_CHARS, normalize_answer, validate_coordinates},
};

fn check_coordinates(errors: &mut ValidationErrors, lat: f64, lng: f64) {
    if let Err(e) = validate_coordinates(lat, lng) {
        let field = if e.code == "latitude_range" { "lat" } else { "lng" };
        errors.add(field, e);
    }
}

fn into_result(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Unlock attempt sent from the team's device at the checkpoint.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UnlockRequest {
    /// Team token; a missing or blank value is rejected as unauthorized.
    #[serde(default)]
    pub team_token: String,
    /// Checkpoint the team is standing at.
    pub checkpoint_id: Uuid,
    /// Device latitude.
    pub lat: f64,
    /// Device longitude.
    pub lng: f64,
}

impl Validate for UnlockRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_coordinates(&mut errors, self.lat, self.lng);
        into_result(errors)
    }
}

/// Mission content revealed by a successful unlock.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnlockedCheckpoint {
    /// Checkpoint identifier.
    pub id: Uuid,
    /// Position in the tour.
    pub order_index: u32,
    /// Checkpoint name.
    pub name: String,
    /// Mission heading.
    pub title: String,
    /// Mission task.
    pub description: String,
    /// Mission hints.
    pub hints: Vec<String>,
}

impl From<&CheckpointEntity> for UnlockedCheckpoint {
    fn from(checkpoint: &CheckpointEntity) -> Self {
        Self {
            id: checkpoint.id,
            order_index: checkpoint.order_index,
            name: checkpoint.name.clone(),
            title: checkpoint.mission.title.clone(),
            description: checkpoint.mission.description.clone(),
            hints: checkpoint.mission.hints.clone(),
        }
    }
}

/// Result of a successful unlock.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnlockResponse {
    /// The unlocked checkpoint with its mission.
    pub checkpoint: UnlockedCheckpoint,
    /// Distance between the team and the checkpoint, in whole meters.
    pub distance_m: u64,
    /// Index of the next checkpoint to unlock.
    pub current_checkpoint_index: u32,
}

/// Mission answer and/or photo for an unlocked checkpoint.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubmitRequest {
    /// Team token; a missing or blank value is rejected as unauthorized.
    #[serde(default)]
    pub team_token: String,
    /// Checkpoint being answered.
    pub checkpoint_id: Uuid,
    /// Free-text answer.
    #[serde(default)]
    pub answer: Option<String>,
    /// URL returned by the photo upload collaborator.
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl SubmitRequest {
    /// Answer with blank values treated as absent.
    pub fn answer(&self) -> Option<&str> {
        normalize_answer(self.answer.as_deref())
    }

    /// Photo URL with blank values treated as absent.
    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

impl Validate for SubmitRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.answer().is_none() && self.photo_url().is_none() {
            let mut err = ValidationError::new("content_required");
            err.message = Some("An answer or a photo is required".into());
            errors.add("answer", err);
        }

        if let Some(answer) = self.answer() {
            let count = answer.chars().count();
            if count > MAX_ANSWER_CHARS {
                let mut err = ValidationError::new("answer_length");
                err.message = Some(
                    format!("Answer must be at most {MAX_ANSWER_CHARS} characters (got {count})")
                        .into(),
                );
                errors.add("answer", err);
            }
        }

        if let Some(url) = self.photo_url() {
            if !url.validate_url() {
                let mut err = ValidationError::new("url");
                err.message = Some("Photo URL must be an absolute URL".into());
                errors.add("photo_url", err);
            }
        }

        into_result(errors)
    }
}

/// Scoring outcome of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    /// Oracle overall score; absent on the fallback path.
    pub ai_score: Option<u32>,
    /// Feedback to show the team.
    pub feedback: String,
    /// Points awarded per dimension.
    pub gms_breakdown: DimensionScores,
    /// Sum of `gms_breakdown`.
    pub gms_earned: u32,
    /// Photo bonus awarded.
    pub bonus_earned: u32,
    /// Scoring path used.
    pub scoring_method: ScoringMethod,
}

/// Periodic location report.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PositionRequest {
    /// Team token; a missing or blank value is rejected as unauthorized.
    #[serde(default)]
    pub team_token: String,
    /// Device latitude.
    pub lat: f64,
    /// Device longitude.
    pub lng: f64,
}

impl Validate for PositionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_coordinates(&mut errors, self.lat, self.lng);
        into_result(errors)
    }
}

/// Geofence classification of a reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionResponse {
    /// Whether the position lies outside the session geofence.
    pub is_outside_geofence: bool,
    /// Whether the position broadcast was skipped by the per-team throttle.
    pub throttled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(answer: Option<&str>, photo_url: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            team_token: "tok".into(),
            checkpoint_id: Uuid::new_v4(),
            answer: answer.map(Into::into),
            photo_url: photo_url.map(Into::into),
        }
    }

    #[test]
    fn submission_requires_answer_or_photo() {
        assert!(submit(None, None).validate().is_err());
        assert!(submit(Some("   "), None).validate().is_err());
        assert!(submit(Some("We found it"), None).validate().is_ok());
        assert!(submit(None, Some("https://cdn.example.com/p.jpg")).validate().is_ok());
    }

    #[test]
    fn submission_rejects_long_answers_and_bad_urls() {
        let long = "x".repeat(MAX_ANSWER_CHARS + 1);
        assert!(submit(Some(&long), None).validate().is_err());
        assert!(submit(Some("ok"), Some("not a url")).validate().is_err());
    }

    #[test]
    fn unlock_rejects_out_of_range_coordinates() {
        let request = UnlockRequest {
            team_token: "tok".into(),
            checkpoint_id: Uuid::new_v4(),
            lat: 91.0,
            lng: 0.0,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("lat"));
    }

    #[test]
    fn token_is_not_a_validation_concern() {
        let request: PositionRequest = serde_json::from_str(r#"{ "lat": 0.0, "lng": 0.0 }"#).unwrap();
        assert_eq!(request.team_token, "");
        assert!(request.validate().is_ok());
    }
}
