//! drover-constraint: placement constraint engine.
//!
//! Evaluates a workload version's declarative placement rules against a
//! candidate resource offer, reading existing taskgroups from the
//! [`Store`](drover_core::Store).
//!
//! Supported operators: `UNIQUE`, `CLUSTER`, `GROUP_BY`, `MAX_PER`,
//! `LIKE`, `UNLIKE`, `GREATER`, `EXCLUDE`, and `TOLERATION` (enforced
//! through the offer's `NoSchedule` taints).

pub mod engine;
pub mod error;
pub mod matcher;

pub use engine::constraints_fit;
pub use error::{ConstraintError, ConstraintResult};
