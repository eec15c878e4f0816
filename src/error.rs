//! Crate-wide error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NarratorError>;

#[derive(Debug, Error)]
pub enum NarratorError {
    /// Frame acquisition failed. Fatal to the session; reconnecting a broken
    /// capture source is the caller's responsibility.
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The inference provider returned an error. Never fatal: the orchestrator
    /// folds this into the guarder fallback path.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
