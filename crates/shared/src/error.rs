use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category attached to every `Error` event the controller emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Parse,
    ConnectionRefused,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::ConnectionRefused => "connection_refused",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("malformed command: {message}")]
pub struct CommandParseError {
    pub message: String,
}

impl CommandParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CommandParseError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(value.to_string())
    }
}
