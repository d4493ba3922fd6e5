//! Error types for the reconciliation substrate
//!
//! Errors fall into four classes that callers treat differently:
//! not-found (nothing to do), write conflicts (another writer raced ahead),
//! store unavailability or timeouts (retry later), and invalid protocol
//! state (reported, never coerced).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error that did not map onto a more specific class
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Object vanished between list and get
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency violation (stale resource version or name taken)
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// The external store could not be reached or refused service
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A reconcile pass exceeded its deadline
    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),

    /// Drain annotations describe a combination the protocol never produces
    #[error("Invalid drain state on {object}: {reason}")]
    InvalidDrainState { object: String, reason: String },

    /// An annotation carried a value that could not be interpreted
    #[error("Invalid value {value:?} for annotation {key}")]
    InvalidAnnotation { key: String, value: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Normalize a kube client error into the substrate's taxonomy.
    ///
    /// `object` names the object the call was about and ends up in the
    /// message of the more specific variants.
    pub fn from_kube(err: kube::Error, object: impl Into<String>) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(object.into()),
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(object.into()),
            kube::Error::Api(resp) if resp.code == 429 || resp.code >= 500 => {
                Error::StoreUnavailable(format!("{}: {}", object.into(), resp.message))
            }
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                Error::StoreUnavailable(format!("{}: {}", object.into(), err))
            }
            _ => Error::KubeError(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Whether a later attempt can be expected to succeed without anyone
    /// changing the object.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::NotFound(_) | Error::Conflict(_) => true,
            Error::StoreUnavailable(_) | Error::Timeout(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            Error::KubeError(_) => true,
            Error::InvalidDrainState { .. }
            | Error::InvalidAnnotation { .. }
            | Error::ConfigError(_)
            | Error::SerializationError(_) => false,
        }
    }

    /// Short, stable label used when counting errors by kind
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::StoreUnavailable(_) => "unavailable",
            Error::Timeout(_) => "timeout",
            Error::InvalidDrainState { .. } | Error::InvalidAnnotation { .. } => "protocol",
            Error::ConfigError(_) => "config",
            Error::SerializationError(_) => "serialization",
        }
    }
}
