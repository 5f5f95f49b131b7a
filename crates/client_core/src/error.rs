use shared::{domain::SessionState, error::ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session input: {0}")]
    InvalidInput(String),
    #[error("session already active (state: {0})")]
    AlreadyActive(SessionState),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("provisioning backend did not respond in time")]
    Timeout,
    #[error("{0}")]
    BackendFailure(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("control channel {category}: {message}")]
pub struct ChannelError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ChannelError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        let category = match err.kind() {
            std::io::ErrorKind::ConnectionRefused => ErrorCategory::ConnectionRefused,
            std::io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            _ => ErrorCategory::Unknown,
        };
        Self::new(category, err.to_string())
    }
}
