use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load operator config: {0}")]
    Parse(String),

    #[error("invalid sandbox_backend mapping: {0}")]
    Conversion(String),
}

impl crucible_domain::Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvariantViolation
    }
}
