use serde::{Deserialize, Serialize};

/// Error code stamped on events for mutations refused because the composite
/// is no longer extensible. Refusals are reported as `false`, never as errors.
pub const REFUSED_NOT_EXTENSIBLE: &str = "FE-COMPOSITE-0003";

/// Error code stamped on events when a caller tries to remove the pinned
/// primary target.
pub const REFUSED_PRIMARY_REMOVAL: &str = "FE-COMPOSITE-0006";

/// Caller-visible failures. Expected runtime conditions (non-extensible
/// refusals, removal misses) are boolean results instead.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeError {
    #[error("initial_target and initial_targets are mutually exclusive")]
    ConflictingInitialTargets,
    #[error("composite was not built as callable")]
    NotCallable,
    #[error("reserved insert index {index} exceeds entry count {len}")]
    ReservedIndexOutOfRange { index: usize, len: usize },
    #[error("invalid composite options: {reason}")]
    InvalidOptions { reason: String },
}

impl CompositeError {
    /// Stable, append-only error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConflictingInitialTargets => "FE-COMPOSITE-0001",
            Self::NotCallable => "FE-COMPOSITE-0002",
            Self::ReservedIndexOutOfRange { .. } => "FE-COMPOSITE-0004",
            Self::InvalidOptions { .. } => "FE-COMPOSITE-0005",
        }
    }
}
