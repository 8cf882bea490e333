//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted free-text answer, in characters.
pub const MAX_ANSWER_CHARS: usize = 4000;
/// Longest accepted team name, in characters.
pub const MAX_TEAM_NAME_CHARS: usize = 64;

/// Rejects empty or whitespace-only values.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a team name has between 1 and 64 characters once trimmed.
///
/// ```ignore
/// validate_team_name("Owls")   // Ok
/// validate_team_name("   ")    // Err - blank
/// ```
pub fn validate_team_name(name: &str) -> Result<(), ValidationError> {
    validate_not_blank(name)?;

    let count = name.trim().chars().count();
    if count > MAX_TEAM_NAME_CHARS {
        let mut err = ValidationError::new("team_name_length");
        err.message = Some(
            format!("Team name must be at most {MAX_TEAM_NAME_CHARS} characters (got {count})")
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates latitude and longitude ranges in decimal degrees.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), ValidationError> {
    if !(lat.is_finite() && (-90.0..=90.0).contains(&lat)) {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some(format!("Latitude must be within [-90, 90] (got {lat})").into());
        return Err(err);
    }
    if !(lng.is_finite() && (-180.0..=180.0).contains(&lng)) {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some(format!("Longitude must be within [-180, 180] (got {lng})").into());
        return Err(err);
    }
    Ok(())
}

/// Treats whitespace-only answers as absent.
pub fn normalize_answer(answer: Option<&str>) -> Option<&str> {
    answer.filter(|value| !value.trim().is_empty())
}
