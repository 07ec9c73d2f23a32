use thiserror::Error;

/// Canonical error taxonomy shared by the spill and execution crates.
///
/// Classification guidance:
/// - [`SpillwayError::InvalidConfig`]: config/environment/path contract violations
/// - [`SpillwayError::Execution`]: chunk decode failures, corrupted or missing spill data
/// - [`SpillwayError::InvalidState`]: cursor or barrier lifecycle misuse
/// - [`SpillwayError::Unsupported`]: valid request for behavior that is not implemented
/// - [`SpillwayError::Io`]: raw filesystem failures from std APIs
#[derive(Debug, Error)]
pub enum SpillwayError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - unparsable `SPILLWAY_*` environment values
    /// - empty spill directory
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Runtime failures while reading spilled data.
    ///
    /// Examples:
    /// - arrow IPC footer/decode failures
    /// - chunk index outside the partition
    #[error("execution error: {0}")]
    Execution(String),

    /// Lifecycle misuse detected by a cursor or a completion barrier.
    ///
    /// Examples:
    /// - producing from a cursor that was never opened or is already closed
    /// - closing a cursor while a pass is still in flight
    /// - finishing a pass that was never started
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard result alias.
pub type Result<T> = std::result::Result<T, SpillwayError>;
