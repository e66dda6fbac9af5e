//! Asynchronous task references in model replies

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Id shape decides which argument the status tools receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TaskRef {
    TaskId(String),
    ExecutionArn(String),
}

impl TaskRef {
    pub fn from_id(id: &str) -> Self {
        if id.starts_with("arn:") {
            TaskRef::ExecutionArn(id.to_string())
        } else {
            TaskRef::TaskId(id.to_string())
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TaskRef::TaskId(id) | TaskRef::ExecutionArn(id) => id,
        }
    }

    /// Arguments for a status-check tool call
    pub fn arguments(&self) -> Value {
        match self {
            TaskRef::TaskId(id) => json!({ "task_id": id }),
            TaskRef::ExecutionArn(arn) => json!({ "execution_arn": arn }),
        }
    }
}

const UNFINISHED: [&str; 5] = ["pending", "in_progress", "running", "queued", "submitted"];

/// Finds task ids, execution ARNs and status markers
pub struct TaskDetector {
    task_id: Regex,
    execution_arn: Regex,
    status: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("task pattern {}: {}", pattern, e)))
}

impl TaskDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            task_id: compile(
                r#"(?i)task[_ -]?id["']?\s*[:=]\s*["']?([A-Za-z0-9][A-Za-z0-9_:/.\-]*[A-Za-z0-9])"#,
            )?,
            execution_arn: compile(r#"arn:aws[\w-]*:states:[\w-]+:\d{12}:execution:[^\s"',}\]]+"#)?,
            status: compile(r#"(?i)\bstatus["']?\s*[:=]\s*["']?([a-z_]+)"#)?,
        })
    }

    /// Tasks the reply asks us to wait for, in order of appearance
    ///
    /// A reply naming ids whose every status marker is terminal needs no wait.
    pub fn detect(&self, text: &str) -> Vec<TaskRef> {
        let mut found: Vec<(usize, String)> = self
            .task_id
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| (m.start(), m.as_str().to_string()))
            .collect();
        found.extend(
            self.execution_arn
                .find_iter(text)
                .map(|m| (m.start(), m.as_str().to_string())),
        );
        if found.is_empty() {
            return Vec::new();
        }

        let statuses: Vec<String> = self
            .status
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let waiting = statuses.is_empty() || statuses.iter().any(|s| UNFINISHED.contains(&s.as_str()));
        if !waiting {
            return Vec::new();
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut tasks: Vec<TaskRef> = Vec::new();
        for (_, id) in found {
            let task = TaskRef::from_id(&id);
            if !tasks.iter().any(|t| t.id() == task.id()) {
                tasks.push(task);
            }
        }
        tasks
    }
}
