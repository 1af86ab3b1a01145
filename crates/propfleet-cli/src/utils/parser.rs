use propfleet::core::models::property::UncertaintyPolicy;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(
        "Invalid uncertainty policy '{0}'. Expected 'fixed:<magnitude>', 'fraction:<fraction>' or 'keep'."
    )]
    InvalidUncertaintyPolicy(String),

    #[error("Invalid number '{value}' in uncertainty policy '{policy}'.")]
    InvalidNumber { policy: String, value: String },

    #[error("Uncertainty in '{0}' must be a positive, finite number.")]
    NonPositiveUncertainty(String),

    #[error("Engine command cannot be empty.")]
    EmptyEngineCommand,
}

/// Parses `fixed:<x>`, `fraction:<x>` or `keep`. A bare number is read as a
/// fixed magnitude.
pub fn parse_uncertainty_policy(s: &str) -> Result<UncertaintyPolicy, ParseError> {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("keep") {
        return Ok(UncertaintyPolicy::Keep);
    }

    let (kind, number) = trimmed.split_once(':').unwrap_or(("fixed", trimmed));
    let value: f64 = number.trim().parse().map_err(|_| ParseError::InvalidNumber {
        policy: s.to_string(),
        value: number.trim().to_string(),
    })?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ParseError::NonPositiveUncertainty(s.to_string()));
    }

    match kind.trim().to_ascii_lowercase().as_str() {
        "fixed" => Ok(UncertaintyPolicy::FixedMagnitude(value)),
        "fraction" => Ok(UncertaintyPolicy::FractionOfValue(value)),
        _ => Err(ParseError::InvalidUncertaintyPolicy(s.to_string())),
    }
}

pub fn parse_engine_command(s: &str) -> Result<Vec<String>, ParseError> {
    let parts: Vec<String> = s.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        return Err(ParseError::EmptyEngineCommand);
    }
    Ok(parts)
}
