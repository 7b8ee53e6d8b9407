//! Error taxonomy. Mirrors `siem_consumer::errors::ConsumerError` in
//! shape (one `thiserror` enum, `#[from]` for the common wrapped
//! errors) but follows the five-way split the bridge's design calls
//! for: configuration, transient connectivity, poison message,
//! resolver, and sink-write errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient connectivity error: {0}")]
    Transient(String),

    #[error("poison message: {0}")]
    Poison(String),

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("sink write error: {0}")]
    Sink(#[from] SinkError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Resolver call failures, sub-classified per spec section 7.4:
/// (a) the handle was never initialized -- fatal; (b) a generic
/// module exception -- worth a drift re-check and single retry;
/// (c) anything else -- routed straight to the failure sink.
#[derive(Error, Debug, Clone)]
pub enum ResolverError {
    #[error("resolver not initialized")]
    NotInitialized,

    #[error("generic resolver exception: {0}")]
    Generic(String),

    #[error("resolver exception: {0}")]
    Other(String),
}

impl ResolverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolverError::NotInitialized)
    }

    pub fn is_retryable_after_drift_check(&self) -> bool {
        matches!(self, ResolverError::Generic(_))
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("retries exhausted after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: String },
}
