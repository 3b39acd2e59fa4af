use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single terminal write an executor performs
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Registry-owned state of one task
#[derive(Debug)]
pub struct TaskState {
    pub id: String,
    pub status: TaskStatus,
    pub logs: VecDeque<String>,
    /// Lines evicted from the head of `logs`
    pub dropped_lines: usize,
    pub result: Option<String>,
    pub error: Option<String>,
    pub cancel: CancellationToken,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: TaskStatus::Running,
            logs: VecDeque::new(),
            dropped_lines: 0,
            result: None,
            error: None,
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn push_log(&mut self, line: String, max_lines: usize) {
        self.logs.push_back(line);
        while self.logs.len() > max_lines.max(1) {
            self.logs.pop_front();
            self.dropped_lines += 1;
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            log_lines: self.logs.len() + self.dropped_lines,
        }
    }
}

/// Point-in-time view returned by a status read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_lines: usize,
}
