//! Error types for marga.

use thiserror::Error;

/// Marga error type.
#[derive(Error, Debug)]
pub enum MargaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_yaml::Error> for MargaError {
    fn from(e: serde_yaml::Error) -> Self {
        MargaError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MargaError>;

/// Outcome of a planning attempt.
///
/// Planning failures are reported through this enum, never as an error:
/// an exhausted budget with a prior solution still returns that solution
/// (with `completed == false` on the solver).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanOutcome {
    Success,
    StartInCollision,
    GoalInCollision,
    PlanningFailed,
}

impl PlanOutcome {
    /// True only for [`PlanOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, PlanOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MargaError::Config("dimension mismatch".to_string());
        assert_eq!(format!("{}", err), "Configuration error: dimension mismatch");
    }

    #[test]
    fn test_outcome_success() {
        assert!(PlanOutcome::Success.is_success());
        assert!(!PlanOutcome::StartInCollision.is_success());
    }
}
