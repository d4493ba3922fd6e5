//! Control-loop substrate for database cluster operators
//!
//! Controllers built on this crate converge the children of a parent object
//! with the [`reconcile`] engine, coordinate member removal through the
//! [`drain`] protocol, pace disruptive changes with the [`rollout`] protocol,
//! and revisit objects on a jittered timer via [`resync`]. Deterministic
//! [`names`] and content [`hash`]es keep object generation idempotent.

pub mod config;
pub mod controller;
pub mod drain;
pub mod error;
pub mod hash;
pub mod key;
pub mod names;
pub mod reconcile;
pub mod results;
pub mod resync;
pub mod rollout;
pub mod telemetry;

pub use crate::error::{Error, Result};
