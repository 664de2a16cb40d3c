use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MergeError;

static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{32}$").expect("task id pattern is valid")
});

/// GNPS2 task identifier, normalized to lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = MergeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !TASK_ID_RE.is_match(&normalized) {
            return Err(MergeError::InvalidTaskId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Human-readable job name. It ends up as the `MASSQL_ORIGIN` value, so it
/// may not contain `=` or line breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobLabel(String);

impl JobLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobLabel {
    type Err = MergeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed
                .chars()
                .any(|ch| ch == '=' || ch == '\n' || ch == '\r');
        if !is_valid {
            return Err(MergeError::InvalidJobLabel(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub label: JobLabel,
    pub task: TaskId,
}

impl FromStr for Job {
    type Err = MergeError;

    /// Parses the `label:task` shorthand.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (label, task) = value
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| MergeError::InvalidSpecifier(value.to_string()))?;
        Ok(Job {
            label: label.parse()?,
            task: task.parse()?,
        })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Fetching,
    Extracting,
    TableLoaded,
    Annotating,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Fetching => "fetching",
            JobState::Extracting => "extracting",
            JobState::TableLoaded => "table_loaded",
            JobState::Annotating => "annotating",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }

    /// Next state on the happy path. `Done` and `Error` are terminal.
    pub fn advance(self) -> Option<JobState> {
        match self {
            JobState::Pending => Some(JobState::Fetching),
            JobState::Fetching => Some(JobState::Extracting),
            JobState::Extracting => Some(JobState::TableLoaded),
            JobState::TableLoaded => Some(JobState::Annotating),
            JobState::Annotating => Some(JobState::Done),
            JobState::Done | JobState::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_task_id_normalizes_case() {
        let id: TaskId = "2E50AF7F1CFC42C391A5FE2EB7B06DE7".parse().unwrap();
        assert_eq!(id.as_str(), "2e50af7f1cfc42c391a5fe2eb7b06de7");
    }

    #[test]
    fn parse_task_id_invalid() {
        let err = "not-a-task".parse::<TaskId>().unwrap_err();
        assert_matches!(err, MergeError::InvalidTaskId(_));
    }

    #[test]
    fn label_rejects_separator() {
        let err = "a=b".parse::<JobLabel>().unwrap_err();
        assert_matches!(err, MergeError::InvalidJobLabel(_));
        assert!("".parse::<JobLabel>().is_err());
    }

    #[test]
    fn state_machine_is_sequential() {
        let mut state = JobState::Pending;
        let mut visited = vec![state];
        while let Some(next) = state.advance() {
            visited.push(next);
            state = next;
        }
        assert_eq!(
            visited,
            vec![
                JobState::Pending,
                JobState::Fetching,
                JobState::Extracting,
                JobState::TableLoaded,
                JobState::Annotating,
                JobState::Done,
            ]
        );
        assert!(JobState::Error.advance().is_none());
    }
}
