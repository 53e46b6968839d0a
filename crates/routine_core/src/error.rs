use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
    #[error("io_error - {0}")]
    Io(String),
    #[error("not_found - {0}")]
    NotFound(String),
    #[error("external_create_failed - {0}")]
    ExternalCreateFailed(String),
    #[error("external_close_failed - {0}")]
    ExternalCloseFailed(String),
    #[error("timeout - {0}")]
    Timeout(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::NotFound(message.into())
    }

    pub fn external_create_failed<M: Into<String>>(message: M) -> Self {
        Self::ExternalCreateFailed(message.into())
    }

    pub fn external_close_failed<M: Into<String>>(message: M) -> Self {
        Self::ExternalCloseFailed(message.into())
    }

    pub fn timeout<M: Into<String>>(message: M) -> Self {
        Self::Timeout(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Io(_) => "io_error",
            Self::NotFound(_) => "not_found",
            Self::ExternalCreateFailed(_) => "external_create_failed",
            Self::ExternalCloseFailed(_) => "external_close_failed",
            Self::Timeout(_) => "timeout",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message)
            | Self::InvalidData(message)
            | Self::Io(message)
            | Self::NotFound(message)
            | Self::ExternalCreateFailed(message)
            | Self::ExternalCloseFailed(message)
            | Self::Timeout(message) => message,
        }
    }

    /// True for failures of the external task collaborator, which callers
    /// count and log instead of propagating.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::ExternalCreateFailed(_) | Self::ExternalCloseFailed(_) | Self::Timeout(_)
        )
    }
}
