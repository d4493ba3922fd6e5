//! Child-object reconciliation engine
//!
//! [`engine::Reconciler`] does the create/update/turndown bookkeeping,
//! [`strategy::Strategy`] supplies the per-kind behavior and
//! [`store::ObjectStore`] is the boundary to the API server.

pub mod engine;
#[cfg(test)]
mod engine_test;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod store;
pub mod strategy;

pub use engine::{
    describe_change, ReconcileReport, Reconciler, CONFLICT_REQUEUE_DELAY, RECREATE_REQUEUE_DELAY,
};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use store::{KubeStore, ObjectStore, PropagationPolicy};
pub use strategy::{Child, OrphanStatus, Strategy, UpdateMode};
