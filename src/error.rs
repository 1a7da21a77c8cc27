//! Error types for the build optimizer.
//!
//! Every fallible operation returns `Result<T, SimError>`; errors are never
//! downgraded to default values without being counted somewhere visible.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// A build that violates its allocation invariants. Raised at construction
/// time, before any simulation can see the build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("level {level} out of range (1..={max})")]
    LevelOutOfRange { level: i32, max: i32 },

    #[error("talent budget exceeded: {spent} points allocated, {budget} available")]
    TalentBudgetExceeded { spent: i32, budget: i32 },

    #[error("attribute budget exceeded: {spent} points allocated, {budget} available")]
    AttributeBudgetExceeded { spent: i32, budget: i32 },

    #[error("unknown {slot} id '{id}' for {kind}")]
    UnknownId {
        slot: &'static str,
        id: String,
        kind: &'static str,
    },

    #[error("'{id}' at level {level} exceeds its max of {max}")]
    OverMax { id: String, level: i32, max: i32 },

    #[error("'{id}' needs {required} points in '{prerequisite}' first")]
    PrerequisiteUnmet {
        id: String,
        prerequisite: String,
        required: i32,
    },

    #[error("'{id}' unlocks at {required} points spent elsewhere, only {spent} spent")]
    PointGateUnmet {
        id: String,
        required: i32,
        spent: i32,
    },

    #[error("'{a}' and '{b}' are mutually exclusive")]
    MutuallyExclusive { a: String, b: String },
}

/// Top-level error for the engine, batch runner and optimizer.
#[derive(Debug, Error)]
pub enum SimError {
    /// The build was rejected before any simulation was dispatched.
    #[error("invalid build: {0}")]
    InvalidBuild(#[from] ValidationError),

    /// A single run produced a non-finite total. Fatal for that run; the
    /// batch recovers and counts it.
    #[error("non-finite {quantity} at stage {stage}")]
    NumericOverflow {
        quantity: &'static str,
        stage: i32,
    },

    /// Optimization stopped by the caller before producing a result.
    #[error("optimization cancelled before completion")]
    Cancelled,

    #[error("worker pool construction failed: {0}")]
    Pool(String),

    #[error("failed to read build file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse build file: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for SimError {
    fn from(e: serde_yaml::Error) -> Self {
        SimError::Parse(e.to_string())
    }
}
