use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tool-calling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Model calls per question
    pub max_iterations: u32,
    /// Status checks per asynchronous task
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    /// Hard limit for one task wait
    pub task_timeout_secs: u64,
    /// Tried in order until one answers
    pub status_tools: Vec<String>,
    /// Sent when the model stops on the token limit
    pub continue_prompt: String,
    /// Sent once when a short answer reads like a progress update
    pub completeness_prompt: String,
    /// Only answers up to this many characters are checked
    pub completeness_max_chars: usize,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<usize>,
    /// Phrases marking a reply that is still working; empty disables the check
    pub completeness_phrases: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            max_retries: 5,
            poll_interval_ms: 2000,
            task_timeout_secs: 60,
            status_tools: vec![
                "check-log-analysis-status".to_string(),
                "get-analysis-status".to_string(),
                "check-task-status".to_string(),
            ],
            continue_prompt: "계속해서 응답을 제공해주세요.".to_string(),
            completeness_prompt:
                "Please provide the complete answer now, based on the information gathered so far."
                    .to_string(),
            completeness_max_chars: 300,
            system_prompt: None,
            max_tokens: None,
            completeness_phrases: [
                "let me check",
                "please wait",
                "one moment",
                "i will now",
                "working on it",
                "잠시만 기다려",
                "확인해보겠습니다",
                "분석 중입니다",
                "조회 중입니다",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Short reply containing one of the still-working phrases
    pub fn looks_incomplete(&self, text: &str) -> bool {
        if self.completeness_phrases.is_empty() || text.chars().count() > self.completeness_max_chars {
            return false;
        }
        let lower = text.to_lowercase();
        self.completeness_phrases
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }
}
