//! Error types for stickerbot.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media conversion errors.
///
/// Tool-level failures are normally recovered inside the pipeline; these
/// variants only surface once every candidate and fallback is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to decode {format} data: {reason}")]
    Decode { format: String, reason: String },

    #[error("Unsupported media format: {format}")]
    UnsupportedFormat { format: String },

    #[error("No tool installed for {kind}")]
    ToolUnavailable { kind: String },

    #[error("Every tool for {kind} failed: {reason}")]
    ToolExecution { kind: String, reason: String },

    #[error("Output of {size} bytes exceeds {max} byte limit after all retries")]
    SizeConstraintExceeded { size: usize, max: usize },

    #[error("Encoding failed: {reason}")]
    Encode { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "Couldn't read that media. Is the file damaged?",
            Self::UnsupportedFormat { .. } => "That format isn't supported.",
            Self::SizeConstraintExceeded { .. } => "The result was too large to send.",
            Self::ToolUnavailable { .. } | Self::ToolExecution { .. } | Self::Encode { .. } => {
                "Conversion failed. Try another file."
            }
            Self::Io(_) => "Conversion failed. Try again later.",
        }
    }
}

/// Errors from a single external tool attempt.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Messaging collaborator errors. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Media download failed: {reason}")]
    Download { reason: String },

    #[error("Media upload failed: {reason}")]
    Upload { reason: String },

    #[error("Failed to send message to {chat}: {reason}")]
    Send { chat: String, reason: String },

    #[error("Failed to load members of {chat}: {reason}")]
    GroupInfo { chat: String, reason: String },
}

impl MessagingError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Download { .. } => "Couldn't download the media. Try again.",
            Self::Upload { .. } | Self::Send { .. } => "Couldn't send the result. Try again.",
            Self::GroupInfo { .. } => "Couldn't load the group members.",
        }
    }
}

/// Dispatcher errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Task timed out after {timeout:?}")]
    TaskTimeout { timeout: Duration },

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl DispatchError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ShuttingDown => "The bot is restarting. Try again in a moment.",
            Self::TaskTimeout { .. } => "That took too long. Try a smaller file.",
            Self::Media(e) => e.user_message(),
            Self::Messaging(e) => e.user_message(),
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
