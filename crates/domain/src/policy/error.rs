use thiserror::Error;

use crate::common::entity::PolicyId;

#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("policy {policy_id}: cycle detected in group reference '{name}'")]
    CycleDetected { policy_id: PolicyId, name: String },
}

/// Failure to produce a policy set from a back-end.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("I/O error reading policy source: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy source parse error: {0}")]
    Parse(String),

    #[error("policy back-end error: {0}")]
    Backend(String),

    #[error(transparent)]
    Flatten(#[from] FlattenError),
}
