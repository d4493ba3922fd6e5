//! Controller runtime glue
//!
//! This module contains the controller loop wrapper, status condition
//! helpers, and the metrics recorders shared by every controller.

pub mod conditions;
pub mod metrics;
mod reconciler;

pub use conditions::{find_condition, set_condition, turndown_condition, Condition};
pub use metrics::{MetricsRecorder, NoopRecorder};
pub use reconciler::{error_policy, run_controller, Context};
