use thiserror::Error;

use crate::{AppId, NodeId};

/// Construction-time configuration failures. These are the only hard errors
/// the core raises; everything at epoch time degrades to a local skip.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fair factor must lie in [0, 1], got {0}")]
    FairFactorOutOfRange(f64),

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("unknown scheduling policy `{0}`")]
    UnknownPolicy(String),

    #[error("unknown utility model `{0}`")]
    UnknownUtility(String),
}

/// Failures of a resource commit against the Resource Registry.
///
/// Callers are expected to test capacity before committing; a commit never
/// mutates anything when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("RSU {rsu} has {available} {unit} available, {requested} requested")]
    CapacityExceeded {
        rsu: NodeId,
        unit: &'static str,
        requested: u32,
        available: u32,
    },

    #[error("RSU {0} is not registered")]
    UnknownRsu(NodeId),

    #[error("RSU {0} is inactive")]
    RsuInactive(NodeId),

    #[error("application {0} already holds an active grant")]
    DuplicateGrant(AppId),
}
