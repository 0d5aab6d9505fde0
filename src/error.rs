use thiserror::Error;

/// Crate-wide error type covering each subsystem boundary.
///
/// Compare-and-update conflicts are deliberately NOT represented here: a
/// stale-revision write is a normal scheduling outcome (`CasOutcome::Conflict`)
/// and every caller treats it as "retry later", never as a fault.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConductorError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
