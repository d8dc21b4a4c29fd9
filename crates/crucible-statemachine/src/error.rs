use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid transition table: {0}")]
    InvalidTable(String),
}

impl crucible_domain::Classify for StateMachineError {
    fn kind(&self) -> ErrorKind {
        match self {
            StateMachineError::Io { .. } => ErrorKind::Transient,
            StateMachineError::Parse { .. } => ErrorKind::InvariantViolation,
            StateMachineError::InvalidTable(_) => ErrorKind::InvariantViolation,
        }
    }
}
