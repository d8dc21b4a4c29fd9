use thiserror::Error;

/// The error-kind taxonomy from the error-handling design: every crate's
/// own error enum implements [`Classify`] so callers can branch on kind
/// without matching every concrete error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; surfaced at submission; never causes a state transition.
    Validation,
    /// Store timeout, broker hiccup, retryable driver failure.
    Transient,
    /// No slot / driver reports host full. Never terminal.
    ResourceExhausted,
    /// Driver returned nonzero / oom / killed. Terminal.
    SandboxFailure,
    /// Wall-clock exceeded. Terminal.
    Timeout,
    /// User-initiated. Terminal.
    Cancelled,
    /// Reaper-initiated terminal transition for an abandoned evaluation.
    Orphaned,
    /// A guarded transition was rejected by C1 in a path that assumed success.
    InvariantViolation,
}

/// Implemented by every crate's error enum so dispatcher/watcher/reconciler
/// code can decide retry-vs-terminal without downcasting.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid evaluation id: {0}")]
    InvalidEvaluationId(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Classify for DomainError {
    fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidEvaluationId(_) => ErrorKind::Validation,
            DomainError::UnsupportedLanguage(_) => ErrorKind::Validation,
            DomainError::InvalidConfig(_) => ErrorKind::InvariantViolation,
        }
    }
}
