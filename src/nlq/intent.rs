//! Question routing

use crate::error::Result;
use crate::llm::LlmClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Route of a user question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Analytic question answerable with SQL over CloudTrail / GuardDuty tables
    Query,
    /// Answerable with a log-insights query
    Insights,
    /// About documentation or concepts rather than data
    Document,
    /// Off-topic
    Useless,
}

impl Intent {
    /// Anything other than one of the four labels is `Useless`
    pub fn parse(raw: &str) -> Self {
        let label = raw
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        match label.as_str() {
            "QUERY" => Intent::Query,
            "INSIGHTS" => Intent::Insights,
            "DOCUMENT" => Intent::Document,
            _ => Intent::Useless,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "QUERY",
            Intent::Insights => "INSIGHTS",
            Intent::Document => "DOCUMENT",
            Intent::Useless => "USELESS",
        }
    }
}

const RUBRIC: &str = "You route questions for an AWS security log assistant. \
Reply with exactly one word:\n\
QUERY - an analytic question about CloudTrail or GuardDuty data that SQL over those tables can answer \
(counts, who did what, when, from where, findings by severity).\n\
INSIGHTS - a question about application or service log groups best answered by a CloudWatch Logs Insights query \
(errors in a log group, recent log lines, latency from logs).\n\
DOCUMENT - a question about AWS security concepts, configuration or best practice rather than the user's data.\n\
USELESS - greetings, personal or off-topic questions.\n\
Do not explain your choice.";

/// Model-backed classifier
#[derive(Clone)]
pub struct IntentClassifier {
    llm: LlmClient,
}

impl IntentClassifier {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, question: &str) -> Result<Intent> {
        let raw = self.llm.classify(RUBRIC, question, 10).await?;
        let intent = Intent::parse(&raw);
        debug!(intent = intent.as_str(), raw = %raw.trim(), "question classified");
        Ok(intent)
    }
}
