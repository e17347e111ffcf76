//! Engine error kinds

use std::path::PathBuf;

/// Errors surfaced by the planning engine.
///
/// Generator and resolver errors abort the current test and bubble up to
/// the orchestrator; whether the rest of the plan keeps running is the
/// orchestrator's call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The document or the plan is internally inconsistent.
    #[error("invalid: {0}")]
    Invalid(String),
    /// A referenced path, definition or test is absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transport failure or post-response mismatch against the shadow store.
    #[error("http: {0}")]
    Http(String),
    /// Response body malformed or failing schema validation.
    #[error("server response: {0}")]
    ServerResponse(String),
    #[error("cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn server_response(msg: impl Into<String>) -> Self {
        Self::ServerResponse(msg.into())
    }
}
