//! Per-person approval policy evaluation.

use serde::{Deserialize, Serialize};

use crate::types::WriteActionType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Effective permission policy for a person.
pub struct PolicyContext {
    pub read_allowed: bool,
    pub write_requires_approval: bool,
}

impl Default for PolicyContext {
    fn default() -> Self {
        // New persons read freely and confirm every write.
        Self {
            read_allowed: true,
            write_requires_approval: true,
        }
    }
}

pub fn can_execute_read(policy: &PolicyContext) -> bool {
    policy.read_allowed
}

/// Whether `action_type` needs a human approval under `policy`.
pub fn requires_approval(policy: &PolicyContext, action_type: WriteActionType) -> bool {
    let _ = action_type;
    policy.write_requires_approval
}
