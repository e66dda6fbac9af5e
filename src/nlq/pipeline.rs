//! Chat turn: classify, synthesize, execute, summarize

use super::intent::{Intent, IntentClassifier};
use super::summarize::ResultSummarizer;
use super::synth::{InsightsSynthesis, QuerySynthesizer, SqlSynthesis};
use crate::config::Catalog;
use crate::error::{Error, ErrorKind, Result};
use crate::gateway::{flatten_record, LogQueryGateway, Row};
use crate::llm::LlmClient;
use crate::orchestrator::{DebugEvent, Orchestrator, Termination};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Answer for off-topic questions and for queries the synthesizer declined
pub const REDIRECT_MESSAGE: &str = "I can only help with questions about your AWS security logs \
(CloudTrail and GuardDuty) and AWS security topics. Please ask about activity, identities or findings in those logs.";

/// `/llm1` request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default, rename = "modelId")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub previous_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub intent: Intent,
    pub answer: String,
    /// Declined or redirected without running a query
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub debug_log: Vec<DebugEvent>,
}

impl ChatResponse {
    fn new(intent: Intent, answer: impl Into<String>) -> Self {
        Self {
            intent,
            answer: answer.into(),
            ignored: false,
            query: None,
            log_group: None,
            rows: None,
            termination: None,
            error_kind: None,
            debug_log: Vec::new(),
        }
    }

    fn redirect(intent: Intent) -> Self {
        Self {
            ignored: true,
            ..Self::new(intent, REDIRECT_MESSAGE)
        }
    }

    fn apology(intent: Intent, kind: ErrorKind) -> Self {
        Self {
            error_kind: Some(kind.as_str().to_string()),
            ..Self::new(
                intent,
                format!("Sorry, I couldn't answer that question ({}).", kind.as_str()),
            )
        }
    }
}

pub struct ChatPipeline {
    classifier: IntentClassifier,
    synthesizer: QuerySynthesizer,
    summarizer: ResultSummarizer,
    gateway: Arc<LogQueryGateway>,
    catalog: Catalog,
    orchestrator: Option<Arc<Orchestrator>>,
    llm: LlmClient,
}

impl ChatPipeline {
    pub fn new(
        llm: LlmClient,
        gateway: Arc<LogQueryGateway>,
        catalog: Catalog,
        orchestrator: Option<Arc<Orchestrator>>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(llm.clone()),
            synthesizer: QuerySynthesizer::new(llm.clone()),
            summarizer: ResultSummarizer::new(llm.clone()),
            gateway,
            catalog,
            orchestrator,
            llm,
        }
    }

    pub fn summarizer(&self) -> &ResultSummarizer {
        &self.summarizer
    }

    /// One chat turn. Failures past validation come back as an apology turn.
    pub async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Error::InputInvalid("question must not be empty".to_string()));
        }

        let intent = match self.classifier.classify(question).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "intent classification failed");
                return Ok(ChatResponse::apology(Intent::Useless, e.kind()));
            }
        };
        info!(intent = intent.as_str(), user_id = ?request.user_id, "chat turn");

        let model = request.model_id.as_deref();
        let outcome = match intent {
            Intent::Useless => Ok(ChatResponse::redirect(intent)),
            Intent::Query => self.answer_with_sql(question, model).await,
            Intent::Insights => self.answer_with_insights(question, model).await,
            Intent::Document => self.answer_with_tools(question, &request.previous_questions, model).await,
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(intent = intent.as_str(), error = %e, "chat turn failed");
                Ok(ChatResponse::apology(intent, e.kind()))
            }
        }
    }

    async fn answer_with_sql(&self, question: &str, model: Option<&str>) -> Result<ChatResponse> {
        let sql = match self.synthesizer.synthesize_sql(question, &self.catalog).await? {
            SqlSynthesis::Sql { sql } => sql,
            SqlSynthesis::Ignored { reason } => {
                info!(reason = %reason, "sql synthesis declined");
                return Ok(ChatResponse::redirect(Intent::Query));
            }
        };

        let result = self.gateway.execute(&sql).await?;
        let answer = self
            .summarizer
            .summarize(question, &serde_json::to_value(&result.rows)?, model)
            .await?;

        Ok(ChatResponse {
            query: Some(sql),
            rows: Some(result.rows),
            ..ChatResponse::new(Intent::Query, answer)
        })
    }

    async fn answer_with_insights(&self, question: &str, model: Option<&str>) -> Result<ChatResponse> {
        let config = self.gateway.insights_config();
        let groups: Vec<String> = self
            .gateway
            .list_log_groups(config.log_group_prefix.as_deref(), config.max_log_groups)
            .await?
            .into_iter()
            .map(|g| g.name)
            .collect();

        let plan = match self
            .synthesizer
            .synthesize_insights(question, &groups, Utc::now())
            .await?
        {
            InsightsSynthesis::Plan(plan) => plan,
            InsightsSynthesis::Ignored => return Ok(ChatResponse::redirect(Intent::Insights)),
        };

        let records = self
            .gateway
            .run_insights(&plan.log_group, &plan.query, plan.start_time_ms, plan.end_time_ms, None)
            .await?;
        let rows: Vec<Row> = records.iter().map(flatten_record).collect();
        let answer = self
            .summarizer
            .summarize(question, &serde_json::to_value(&rows)?, model)
            .await?;

        Ok(ChatResponse {
            query: Some(plan.query),
            log_group: Some(plan.log_group),
            rows: Some(rows),
            ..ChatResponse::new(Intent::Insights, answer)
        })
    }

    async fn answer_with_tools(
        &self,
        question: &str,
        previous: &[String],
        model: Option<&str>,
    ) -> Result<ChatResponse> {
        let prompt = with_context(question, previous);
        let Some(orchestrator) = &self.orchestrator else {
            let answer = self.llm.complete_text(prompt).await?;
            return Ok(ChatResponse::new(Intent::Document, answer));
        };

        let outcome = orchestrator.run(&prompt, Vec::new(), model).await;
        Ok(ChatResponse {
            termination: Some(outcome.termination),
            debug_log: outcome.debug_log,
            ..ChatResponse::new(Intent::Document, outcome.answer)
        })
    }
}

/// Prefix earlier questions so a follow-up can be read on its own
fn with_context(question: &str, previous: &[String]) -> String {
    let earlier: Vec<&str> = previous
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty() && *q != question)
        .collect();
    if earlier.is_empty() {
        return question.to_string();
    }
    let listed = earlier
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Earlier questions in this conversation:\n{}\n\nCurrent question: {}", listed, question)
}

/// `/llm2`: summarize a result the caller already has
pub async fn summarize_result(
    summarizer: &ResultSummarizer,
    question: &str,
    result: &Value,
) -> Result<String> {
    if question.trim().is_empty() {
        return Err(Error::InputInvalid("question must not be empty".to_string()));
    }
    summarizer.summarize(question, result, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context() {
        assert_eq!(with_context("who?", &[]), "who?");
        let prompt = with_context("and yesterday?", &["failed logins today".to_string(), "and yesterday?".to_string()]);
        assert!(prompt.starts_with("Earlier questions"));
        assert!(prompt.contains("- failed logins today"));
        assert!(prompt.ends_with("Current question: and yesterday?"));
        assert_eq!(prompt.matches("and yesterday?").count(), 1);
    }

    #[test]
    fn test_request_field_names() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "question": "hi",
            "modelId": "anthropic.claude-3-haiku-20240307-v1:0"
        }))
        .unwrap();
        assert_eq!(request.model_id.as_deref(), Some("anthropic.claude-3-haiku-20240307-v1:0"));
        assert!(request.previous_questions.is_empty());
    }
}
