//! Controller errors and their retry classification.

use std::time::Duration;
use thiserror::Error;

/// Requeue delay for errors that are expected to clear on their own.
const RETRY_DELAY: Duration = Duration::from_secs(30);
/// Requeue delay for errors that need a spec change or a fix to clear.
const BACKOFF_DELAY: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A spec field or referenced object the pass needs is absent.
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The reconciliation logic reached a state it must never reach.
    /// Processing of the cluster stops instead of guessing the next action.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Worth retrying soon, e.g. an object the cache has not observed yet.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status of an API server rejection.
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant(_))
    }

    /// Server-side failures, throttling, write conflicts, transport errors
    /// and explicit transients are retried quickly.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Service(_)) | Error::Transient(_) => true,
            Error::Kube(_) => self
                .api_code()
                .is_some_and(|code| code >= 500 || code == 429 || code == 409),
            Error::MissingField(_)
            | Error::Validation(_)
            | Error::Invariant(_)
            | Error::Serialization(_) => false,
        }
    }

    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            RETRY_DELAY
        } else {
            BACKOFF_DELAY
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
