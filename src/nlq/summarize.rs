//! Natural-language summaries of query results

use crate::error::Result;
use crate::llm::{LlmClient, LlmRequest};
use serde_json::Value;

/// Rendered result text handed to the model
const MAX_RESULT_CHARS: usize = 12_000;

const SYSTEM: &str = "You are a security analyst. Answer the user's question using only the query result provided. \
Be concise, mention concrete numbers, principals and times from the data, and say so plainly when the result is empty.";

/// Render `result` as JSON, cut to the character budget
pub fn render_result(result: &Value) -> String {
    let rendered = serde_json::to_string(result).unwrap_or_else(|_| result.to_string());
    if rendered.chars().count() <= MAX_RESULT_CHARS {
        return rendered;
    }
    let cut: String = rendered.chars().take(MAX_RESULT_CHARS).collect();
    format!("{}... (truncated)", cut)
}

#[derive(Clone)]
pub struct ResultSummarizer {
    llm: LlmClient,
}

impl ResultSummarizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn summarize(&self, question: &str, result: &Value, model: Option<&str>) -> Result<String> {
        let prompt = format!("Question: {}\n\nQuery result:\n{}", question, render_result(result));
        let mut request = LlmRequest::from_prompt(prompt).with_system(SYSTEM);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        Ok(self.llm.complete(request).await?.text())
    }
}
