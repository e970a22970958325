//! Command error taxonomy
//!
//! Every failed command resolves to a [`CommandError`] with a stable code.
//! Codes classify the failure; the message is what the buyer sees in chat.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a command failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Text looked like a command but could not be read
    Parse,
    /// Command was well formed but the post is in the wrong state for it
    StateConflict,
    /// A value failed a business rule (offer too low, bad slot number)
    Validation,
    /// Post, slot or user the command targets does not exist
    NotFound,
    /// Server-side fault unrelated to the command itself
    Internal,
}

/// A failed command, carrying the chat-facing message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{code:?}] {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Parse, message)
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}
