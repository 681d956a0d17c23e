//! Error types for the Murmur runtime
//!
//! Every failure here degrades a single feature (recording, lore,
//! delivery) while leaving the rest of the session usable.

use thiserror::Error;

/// Murmur runtime errors
#[derive(Error, Debug, Clone)]
pub enum MurmurError {
    /// Microphone denied or unavailable
    #[error("Microphone access error: {0}")]
    MicAccess(String),

    /// Daily free usage limit reached
    #[error("Daily free limit reached. Subscribe for unlimited use.")]
    QuotaExceeded,

    /// Model link failed to open or closed unexpectedly
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed audio payload
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Lore distillation failed
    #[error("Curation error: {0}")]
    Curation(String),

    /// A cross-context message could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sled::Error> for MurmurError {
    fn from(e: sled::Error) -> Self {
        MurmurError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for MurmurError {
    fn from(e: std::io::Error) -> Self {
        MurmurError::Storage(e.to_string())
    }
}

impl MurmurError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors let the session continue; the rest require
    /// user intervention or a restart.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The user can grant access and try again
            MurmurError::MicAccess(_) => true,
            // Clears at the next calendar day or on subscribe
            MurmurError::QuotaExceeded => true,
            // A reset() or the next start_recording() may reopen the link
            MurmurError::Connection(_) => true,
            // The offending chunk is dropped, the stream continues
            MurmurError::Decode(_) => true,
            // The conversation continues without the lore entry
            MurmurError::Curation(_) => true,
            // Retried while the recipient is not yet ready
            MurmurError::Delivery(_) => true,
            MurmurError::Storage(_) => false,
            MurmurError::Channel(_) => false,
            MurmurError::Config(_) => false,
        }
    }

    /// Get a user-friendly description suitable for `SessionState.error`
    pub fn user_message(&self) -> String {
        match self {
            MurmurError::MicAccess(detail) => format!("Mic Error: {detail}"),
            MurmurError::QuotaExceeded => {
                "Daily free limit reached. Subscribe for unlimited use.".to_string()
            }
            MurmurError::Connection(_) => {
                "Connection to the assistant failed. Try resetting the session.".to_string()
            }
            MurmurError::Decode(_) => "Received malformed audio from the assistant.".to_string(),
            MurmurError::Curation(_) => "Failed to update lore.".to_string(),
            MurmurError::Delivery(_) => "Internal communication error.".to_string(),
            MurmurError::Storage(_) => "Local storage error occurred.".to_string(),
            MurmurError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            MurmurError::Config(_) => "Configuration error. Please check settings.".to_string(),
        }
    }
}

/// Result type alias for Murmur operations
pub type Result<T> = std::result::Result<T, MurmurError>;
