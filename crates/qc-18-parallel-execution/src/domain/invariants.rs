//! Task state machine invariants
//!
//! ```text
//! Pending ──→ Executing ──→ Executed ──→ Validating ──→ Validated
//!    ↑            │                          │   ↑           │
//!    │            └──→ Aborted               │   └───────────┘ (re-validation)
//!    │                    │                  ↓
//!    └────────────────────┴─────────── Invalidated
//! ```

use super::entities::TaskStatus;

/// Whether `from -> to` is a legal task transition.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Executing)
            | (Executing, Executed)
            | (Executing, Aborted)
            | (Executed, Validating)
            | (Validated, Validating)
            | (Validating, Validated)
            | (Validating, Invalidated)
            | (Invalidated, Pending)
            | (Aborted, Pending)
    )
}

/// Statuses from which a task still needs work before commit.
pub fn is_unresolved(status: TaskStatus) -> bool {
    !matches!(status, TaskStatus::Validated)
}
