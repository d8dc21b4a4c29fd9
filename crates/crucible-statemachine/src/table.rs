use std::collections::{HashMap, HashSet};
use std::path::Path;

use crucible_domain::Status;
use serde::Deserialize;

use crate::error::StateMachineError;

#[derive(Debug, Deserialize)]
struct RawTable {
    terminal: Vec<String>,
    transitions: HashMap<String, Vec<String>>,
}

fn parse_status(s: &str) -> Result<Status, StateMachineError> {
    Status::ALL
        .iter()
        .copied()
        .find(|st| st.to_string() == s)
        .ok_or_else(|| StateMachineError::InvalidTable(format!("unknown status '{s}'")))
}

/// The allowed-transitions graph: single source of truth for "may status
/// X transition to Y?" and "is Y terminal?". Loaded once at startup from a
/// declarative YAML file and cached for the process lifetime; pure and
/// side-effect-free once built.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    terminal: HashSet<Status>,
    transitions: HashMap<Status, HashSet<Status>>,
}

impl TransitionTable {
    fn from_raw(raw: RawTable) -> Result<Self, StateMachineError> {
        let terminal: HashSet<Status> =
            raw.terminal.iter().map(|s| parse_status(s)).collect::<Result<_, _>>()?;

        let mut transitions = HashMap::new();
        for (from, tos) in raw.transitions {
            let from = parse_status(&from)?;
            let tos: HashSet<Status> = tos.iter().map(|s| parse_status(s)).collect::<Result<_, _>>()?;
            transitions.insert(from, tos);
        }

        let table = TransitionTable { terminal, transitions };
        table.validate_shape()?;
        Ok(table)
    }

    /// A terminal state must have no outgoing transitions listed; every
    /// non-terminal state named in `transitions` must target known states.
    fn validate_shape(&self) -> Result<(), StateMachineError> {
        for terminal in &self.terminal {
            if self.transitions.get(terminal).is_some_and(|tos| !tos.is_empty()) {
                return Err(StateMachineError::InvalidTable(format!(
                    "terminal status '{terminal}' has outgoing transitions listed"
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateMachineError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| StateMachineError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text, &path_ref.display().to_string())
    }

    pub fn from_yaml_str(text: &str, path_for_errors: &str) -> Result<Self, StateMachineError> {
        let raw: RawTable = serde_yaml::from_str(text).map_err(|source| StateMachineError::Parse {
            path: path_for_errors.to_string(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// The table shipped with the service, matching the default transition
    /// graph from the data model: `submitted → queued → provisioning →
    /// running → {completed, failed, timeout}`, any non-terminal may also
    /// go to `failed`/`cancelled`, and the `provisioning → completed`
    /// race-tolerance edge.
    pub fn default_table() -> Self {
        Self::from_yaml_str(include_str!("../config/transitions.yaml"), "<default>")
            .expect("shipped default transition table must be valid")
    }

    /// `ok=false` carries a human-readable reason.
    pub fn validate_transition(&self, from: Status, to: Status) -> (bool, Option<String>) {
        if self.is_terminal(from) {
            return (false, Some(format!("'{from}' is terminal and permits no outgoing transition")));
        }
        match self.transitions.get(&from) {
            Some(allowed) if allowed.contains(&to) => (true, None),
            Some(_) => (false, Some(format!("'{from}' -> '{to}' is not an allowed transition"))),
            None => (false, Some(format!("'{from}' has no transitions defined"))),
        }
    }

    pub fn is_terminal(&self, status: Status) -> bool {
        self.terminal.contains(&status)
    }

    pub fn successors(&self, status: Status) -> HashSet<Status> {
        self.transitions.get(&status).cloned().unwrap_or_default()
    }
}
