//! Error types for the hero-dl library.

use thiserror::Error;

/// Errors that can occur during library enumeration and download operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error from the media API or a transfer.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A response envelope could not be decoded.
    #[error("malformed API response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The API answered with a non-success status code.
    #[error("API request failed with status {status}")]
    Api {
        /// HTTP status code returned by the service.
        status: u16,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transfer could not be started or driven to completion.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// A download run is already active; concurrent runs are rejected.
    #[error("a download run is already in progress")]
    AlreadyRunning,
}

/// A specialized `Result` type for hero-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
