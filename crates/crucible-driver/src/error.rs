use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("create failed: {0}")]
    CreateFailed(String),

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("internal driver error: {0}")]
    Internal(String),

    #[error("no driver configured for language '{0}'")]
    DriverNotConfigured(String),
}

impl crucible_domain::Classify for DriverError {
    fn kind(&self) -> ErrorKind {
        match self {
            DriverError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            DriverError::UnsupportedLanguage(_) | DriverError::DriverNotConfigured(_) => ErrorKind::Validation,
            DriverError::CreateFailed(_) | DriverError::StartFailed(_) | DriverError::Internal(_) => {
                ErrorKind::Transient
            }
        }
    }
}
