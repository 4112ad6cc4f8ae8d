//! Error types for the Marionette environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A shared handle was poisoned by a panicking writer
    #[error("Shared handle poisoned: {0}")]
    Poisoned(String),

    /// The device layer has not published a frame yet
    #[error("No device frame published yet")]
    NoFrame,
}

impl EnvError {
    /// Creates a poisoned-handle error.
    pub fn poisoned(what: impl Into<String>) -> Self {
        Self::Poisoned(what.into())
    }
}
