use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DietError>;

/// Failures surfaced by the generate and read pipelines.
///
/// Secondary-artifact and catalog failures are logged where they happen and never reach a
/// caller; they still get a variant so the log lines share one vocabulary.
#[derive(Error, Debug)]
pub enum DietError {
    #[error("Invalid week '{0}'. Use this, next, YYYY-MM-DD or YYYY-Www")]
    InvalidWeekToken(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("No health profile found. Create one before generating a weekly plan")]
    ProfileMissing,

    #[error("Failed to look up user: {0:#}")]
    UserLookupFailed(anyhow::Error),

    #[error("Failed to create user: {0:#}")]
    UserCreateFailed(anyhow::Error),

    #[error("Meal composer failed: {0}")]
    ComposerFailure(#[from] ComposerError),

    #[error("Failed to persist weekly plan: {0:#}")]
    PrimaryPersistenceFailure(anyhow::Error),

    #[error("Failed to persist {artifact}: {cause:#}")]
    SecondaryPersistenceFailure {
        artifact: &'static str,
        cause: anyhow::Error,
    },

    #[error("Recipe catalog lookup failed: {0:#}")]
    RecipeLookupFailure(anyhow::Error),

    #[error("Failed to load weekly plan: {0:#}")]
    ReadFailed(anyhow::Error),

    #[error("{0}")]
    NotFound(String),
}

/// Errors from a Composer implementation.
#[derive(Error, Debug)]
pub enum ComposerError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Rejected(String),
}
