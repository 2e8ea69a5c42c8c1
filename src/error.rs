//! Failure types for the three remote calls the relay makes.
//!
//! None of these ever terminate the process: the dispatch loop either
//! retries (fetch), substitutes a fallback reply (completion), or drops the
//! reply (send).

use thiserror::Error;

/// Polling the messaging platform for updates failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("getUpdates request failed: {0}")]
    Http(#[from] teloxide::RequestError),

    #[error("offset {0} is out of range for getUpdates")]
    InvalidOffset(u32),
}

/// The completion service did not produce a usable reply.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("failed to reach completion service: {0}")]
    Network(#[source] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse completion response: {0}")]
    Malformed(#[source] reqwest::Error),

    #[error("completion response contained no text")]
    Empty,
}

/// Delivering a reply (or another bot-side call) to the platform failed.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("telegram request failed: {0}")]
    Http(#[from] teloxide::RequestError),
}
