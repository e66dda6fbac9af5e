//! Natural-language questions over the security logs
//!
//! A question is classified, turned into a SQL or log-insights query,
//! executed through the query gateway and summarized. Documentation
//! questions go to the tool-calling orchestrator.

pub mod intent;
pub mod pipeline;
pub mod summarize;
pub mod synth;

pub use intent::{Intent, IntentClassifier};
pub use pipeline::{summarize_result, ChatPipeline, ChatRequest, ChatResponse, REDIRECT_MESSAGE};
pub use summarize::{render_result, ResultSummarizer};
pub use synth::{
    strip_code_fences, validate_sql, InsightsPlan, InsightsSynthesis, QuerySynthesizer, SqlSynthesis,
    IGNORED_SENTINEL,
};
