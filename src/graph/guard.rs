// src/graph/guard.rs

use std::fmt;
use std::str::FromStr;

/// Per-node predicate over predecessor outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskGuard {
    /// Run once every predecessor finished, whatever the outcome.
    AllPredecessorsCompleted,
    /// Run only if every predecessor succeeded; otherwise skip.
    #[default]
    AllPredecessorsSucceeded,
    /// Run only if every transitive ancestor succeeded; otherwise skip.
    AllAncestorsSucceeded,
}

/// How a finished node ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalState {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Some predecessor has not finished yet.
    Wait,
    Run,
    Skip,
}

impl TaskGuard {
    /// Evaluate against the node's direct predecessors (`None` = still
    /// unfinished). `ancestors_succeeded` is only consulted by
    /// [`TaskGuard::AllAncestorsSucceeded`], and only once every predecessor
    /// has finished.
    ///
    /// A node without predecessors is always eligible.
    pub fn evaluate<I, F>(self, predecessors: I, ancestors_succeeded: F) -> Eligibility
    where
        I: IntoIterator<Item = Option<TerminalState>>,
        F: FnOnce() -> bool,
    {
        let mut all_succeeded = true;
        for pred in predecessors {
            match pred {
                None => return Eligibility::Wait,
                Some(TerminalState::Succeeded) => {}
                Some(_) => all_succeeded = false,
            }
        }

        let run = match self {
            TaskGuard::AllPredecessorsCompleted => true,
            TaskGuard::AllPredecessorsSucceeded => all_succeeded,
            TaskGuard::AllAncestorsSucceeded => all_succeeded && ancestors_succeeded(),
        };

        if run { Eligibility::Run } else { Eligibility::Skip }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskGuard::AllPredecessorsCompleted => "ALL_PREDECESSORS_COMPLETED",
            TaskGuard::AllPredecessorsSucceeded => "ALL_PREDECESSORS_SUCCEEDED",
            TaskGuard::AllAncestorsSucceeded => "ALL_ANCESTORS_SUCCEEDED",
        }
    }
}

impl fmt::Display for TaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ALL_PREDECESSORS_COMPLETED" => Ok(TaskGuard::AllPredecessorsCompleted),
            "ALL_PREDECESSORS_SUCCEEDED" => Ok(TaskGuard::AllPredecessorsSucceeded),
            "ALL_ANCESTORS_SUCCEEDED" => Ok(TaskGuard::AllAncestorsSucceeded),
            other => Err(format!("invalid task guard: {other}")),
        }
    }
}
