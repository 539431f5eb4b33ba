// src/job/state.rs

//! Lifecycle enums for jobs and tasks, with their persisted string codes.

use std::fmt;
use std::str::FromStr;

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($code => Ok($name::$variant),)+
                    other => Err(format!(concat!("invalid ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

coded_enum!(
    /// `QUEUED → RUNNING → COMPLETED`.
    JobState {
        Queued => "QUEUED",
        Running => "RUNNING",
        Completed => "COMPLETED",
    }
);

coded_enum!(
    /// Aggregate outcome of a completed job.
    JobStatus {
        Passed => "PASSED",
        Failed => "FAILED",
    }
);

coded_enum!(
    /// Where a task is in its lifecycle. `Queued` means dispatched and
    /// waiting for a worker permit.
    TaskState {
        Pending => "PENDING",
        Queued => "QUEUED",
        Running => "RUNNING",
        Completed => "COMPLETED",
    }
);

coded_enum!(
    /// Outcome of a completed task.
    TaskStatus {
        Passed => "PASSED",
        Failed => "FAILED",
        Skipped => "SKIPPED",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_back() {
        assert_eq!("RUNNING".parse::<JobState>(), Ok(JobState::Running));
        assert_eq!("SKIPPED".parse::<TaskStatus>(), Ok(TaskStatus::Skipped));
        assert_eq!(TaskState::Queued.to_string(), "QUEUED");
        assert!("DONE".parse::<JobStatus>().is_err());
    }
}
