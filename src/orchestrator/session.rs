//! Per-question orchestrator state

use crate::llm::{Message, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::tasks::TaskRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Complete,
    Error,
    Timeout,
}

/// An asynchronous job referenced by a model reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub task: TaskRef,
    pub started_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub polls: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl PendingTask {
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            started_at: Utc::now(),
            status: TaskStatus::Pending,
            polls: 0,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugKind {
    ToolsListed,
    ToolsUnavailable,
    ModelCall,
    ModelResponse,
    ToolCall,
    ToolError,
    MaxTokensContinue,
    CompletenessReprompt,
    TasksDetected,
    TaskPoll,
    TaskResolved,
    MaxIterations,
    TransportError,
    Final,
}

/// One state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEvent {
    pub at: DateTime<Utc>,
    pub kind: DebugKind,
    pub detail: Value,
}

/// Conversation and bookkeeping for one user question
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub messages: Vec<Message>,
    pub pending_tasks: BTreeMap<String, PendingTask>,
    pub resolved_tasks: Vec<PendingTask>,
    pub usage: TokenUsage,
    pub debug_log: Vec<DebugEvent>,
}

impl Session {
    /// Start from prior history, appending `question` unless it is already the last turn
    pub fn new(history: Vec<Message>, question: &str) -> Self {
        let mut messages = history;
        let duplicate = messages
            .last()
            .map(|m| m.is_user_text(question))
            .unwrap_or(false);
        if !duplicate {
            messages.push(Message::user(question));
        }
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn log(&mut self, kind: DebugKind, detail: Value) {
        self.debug_log.push(DebugEvent {
            at: Utc::now(),
            kind,
            detail,
        });
    }

    /// Latest assistant text, if any
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == crate::llm::Role::Assistant)
            .map(Message::text)
            .find(|t| !t.trim().is_empty())
    }

    /// Move every non-pending task out of the pending map
    pub fn settle_tasks(&mut self) {
        let pending = std::mem::take(&mut self.pending_tasks);
        for (id, task) in pending {
            if task.status == TaskStatus::Pending {
                self.pending_tasks.insert(id, task);
            } else {
                self.resolved_tasks.push(task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_tail_is_not_duplicated() {
        let history = vec![
            Message::user("how many logins?"),
            Message::assistant("12"),
            Message::user("and failures?"),
        ];
        let session = Session::new(history.clone(), "and failures?");
        assert_eq!(session.messages.len(), 3);

        let session = Session::new(history, "by whom?");
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.last_assistant_text().as_deref(), Some("12"));
    }

    #[test]
    fn test_settle_tasks() {
        let mut session = Session::new(Vec::new(), "q");
        let mut done = PendingTask::new(TaskRef::TaskId("a".into()));
        done.status = TaskStatus::Complete;
        session.pending_tasks.insert("a".into(), done);
        session
            .pending_tasks
            .insert("b".into(), PendingTask::new(TaskRef::TaskId("b".into())));

        session.settle_tasks();
        assert_eq!(session.pending_tasks.len(), 1);
        assert_eq!(session.resolved_tasks.len(), 1);
    }
}
