//! Core error types

use thiserror::Error;

/// Errors surfaced by the conflation core
///
/// Ordinary backend and per-device failures never appear here: backends
/// recover them into error fragments, which the engine turns into events.
/// These variants are reserved for contract bugs and environment problems
/// that make a round (or watching) impossible.
#[derive(Debug, Error)]
pub enum Error {
    /// A backend produced a fragment that is neither a valid device
    /// observation nor a valid error observation. Fatal for the round.
    #[error("malformed backend fragment: {detail}")]
    InvariantViolation { detail: String },

    /// The hotplug monitor could not start listening for attach/detach
    /// notifications.
    #[error("hotplug monitor unavailable: {0}")]
    Hotplug(String),
}

impl Error {
    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Error::InvariantViolation {
            detail: detail.into(),
        }
    }
}

/// Type alias for conflation core results
pub type Result<T> = std::result::Result<T, Error>;
