use thiserror::Error;

/// Failure taxonomy for one registration's resolution. None of these abort a job; the
/// caller logs the error, tallies it by `code()`, and moves to the next registration.
#[derive(Debug, Error)]
pub enum GradingError {
    /// Required reference data (thresholds, pacing structure, points config) is missing.
    #[error("missing reference data: {0}")]
    Configuration(String),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    /// Stored data disagrees with itself, or a due date cannot be resolved.
    #[error("inconsistent data: {0}")]
    Consistency(String),
    #[error("write failed: {0}")]
    Write(String),
}

impl GradingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Query(_) => "query",
            Self::Consistency(_) => "consistency",
            Self::Write(_) => "write",
        }
    }

    pub fn write(context: &str, e: rusqlite::Error) -> Self {
        Self::Write(format!("{}: {}", context, e))
    }
}

pub type GradingResult<T> = Result<T, GradingError>;
