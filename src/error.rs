use std::time::Duration;

use thiserror::Error;

use crate::fixtures::CompetitionId;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("competition {0} not found")]
    CompetitionNotFound(CompetitionId),

    #[error("competition {0} has no teams")]
    NoTeams(CompetitionId),

    #[error("fixture {fixture_id} is malformed: {reason}")]
    MalformedFixture { fixture_id: u64, reason: String },

    #[error("invalid model parameters: {0}")]
    InvalidParams(String),

    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("simulation run cancelled")]
    Cancelled,

    #[error("simulation run exceeded its {0:?} time budget")]
    TimedOut(Duration),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn malformed(fixture_id: u64, reason: impl Into<String>) -> Self {
        ForecastError::MalformedFixture {
            fixture_id,
            reason: reason.into(),
        }
    }

    /// True for the "nothing to simulate" kinds that are reported before any trial runs.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ForecastError::CompetitionNotFound(_) | ForecastError::NoTeams(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
