use serde::{Deserialize, Serialize};

/// The lifecycle status of an [`crate::Evaluation`].
///
/// Transitions:
///   submitted → queued → provisioning → running → {completed, failed, timeout}
///   any non-terminal → {failed, cancelled}
///   provisioning → completed   (documented race-tolerance edge)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Submitted,
    Queued,
    Provisioning,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Submitted,
        Status::Queued,
        Status::Provisioning,
        Status::Running,
        Status::Completed,
        Status::Failed,
        Status::Cancelled,
        Status::Timeout,
    ];

    /// `true` for the four statuses with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled | Status::Timeout)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Submitted => "submitted",
            Status::Queued => "queued",
            Status::Provisioning => "provisioning",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
            Status::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Two-band priority scheduling: `high` is always served before `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Translated cause attached to a terminal status, per the exit-code mapping
/// and the reaper/cancel code paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    Ok,
    MemoryLimit,
    CancelledOrTerminated,
    Timeout,
    GenericError,
    Exit(i32),
    Cancelled,
    Orphaned,
    Infrastructure,
}

impl Cause {
    /// The exit-code mapping: `0 → ok`, `137 → memory_limit`,
    /// `143 → cancelled_or_terminated`, `124 → timeout`, `1 → generic_error`,
    /// anything else → `exit:{code}`.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Cause::Ok,
            137 => Cause::MemoryLimit,
            143 => Cause::CancelledOrTerminated,
            124 => Cause::Timeout,
            1 => Cause::GenericError,
            other => Cause::Exit(other),
        }
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cause::Ok => write!(f, "ok"),
            Cause::MemoryLimit => write!(f, "memory_limit"),
            Cause::CancelledOrTerminated => write!(f, "cancelled_or_terminated"),
            Cause::Timeout => write!(f, "timeout"),
            Cause::GenericError => write!(f, "generic_error"),
            Cause::Exit(code) => write!(f, "exit:{}", code),
            Cause::Cancelled => write!(f, "cancelled"),
            Cause::Orphaned => write!(f, "orphaned"),
            Cause::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_the_documented_four() {
        let terminal: Vec<Status> = Status::ALL.iter().copied().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Status::Completed, Status::Failed, Status::Cancelled, Status::Timeout]);
    }

    #[test]
    fn exit_code_mapping_matches_spec_table() {
        assert_eq!(Cause::from_exit_code(0), Cause::Ok);
        assert_eq!(Cause::from_exit_code(137), Cause::MemoryLimit);
        assert_eq!(Cause::from_exit_code(143), Cause::CancelledOrTerminated);
        assert_eq!(Cause::from_exit_code(124), Cause::Timeout);
        assert_eq!(Cause::from_exit_code(1), Cause::GenericError);
        assert_eq!(Cause::from_exit_code(42), Cause::Exit(42));
        assert_eq!(Cause::from_exit_code(42).to_string(), "exit:42");
    }
}
