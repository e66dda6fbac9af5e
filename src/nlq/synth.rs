//! Query synthesis
//!
//! The model writes SQL (or a log-insights plan) from the question; the
//! output is cleaned and checked against the table catalog before anything
//! is executed.

use crate::config::Catalog;
use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmRequest};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Returned by the model when a request is not about the supported logs
pub const IGNORED_SENTINEL: &str = "###IGNORED###";

/// Window used when the plan does not carry a usable one
const FALLBACK_WINDOW_DAYS: i64 = 7;

/// Remove surrounding Markdown code fences and whitespace
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the language tag line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SqlSynthesis {
    Sql { sql: String },
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    Comma,
}

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // string literal, '' escapes included
                while let Some(n) = chars.next() {
                    if n == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            c if c.is_alphanumeric() || matches!(c, '_' | '"' | '`' | '.' | '$') => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || matches!(n, '_' | '"' | '`' | '.' | '$') {
                        word.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ => {}
        }
    }
    tokens
}

/// Table names after `FROM` / `JOIN` in query scope (not `EXTRACT(x FROM y)`)
fn referenced_tables(sql: &str) -> Vec<String> {
    let tokens = tokenize(sql);
    // one entry per open paren: does the group hold a query
    let mut scopes = vec![true];
    let mut first_in_group = false;
    let mut tables = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => {
                scopes.push(false);
                first_in_group = true;
            }
            Token::Close => {
                if scopes.len() > 1 {
                    scopes.pop();
                }
                first_in_group = false;
            }
            Token::Comma => first_in_group = false,
            Token::Word(word) => {
                let upper = word.to_ascii_uppercase();
                if first_in_group {
                    if upper == "SELECT" || upper == "WITH" {
                        if let Some(scope) = scopes.last_mut() {
                            *scope = true;
                        }
                    }
                    first_in_group = false;
                }
                let in_query = scopes.last().copied().unwrap_or(false);
                if in_query && (upper == "FROM" || upper == "JOIN") {
                    if let Some(Token::Word(name)) = tokens.get(i + 1) {
                        // function call such as UNNEST(...)
                        if tokens.get(i + 2) != Some(&Token::Open) {
                            tables.push(name.clone());
                        }
                    }
                }
            }
        }
    }
    tables
}

/// Names bound by `WITH name AS (` / `, name AS (`
fn cte_names(sql: &str) -> BTreeSet<String> {
    let tokens = tokenize(sql);
    tokens
        .windows(4)
        .filter_map(|w| match w {
            [lead, Token::Word(name), Token::Word(keyword), Token::Open] if keyword.eq_ignore_ascii_case("AS") => {
                let opens_binding = match lead {
                    Token::Comma => true,
                    Token::Word(word) => word.eq_ignore_ascii_case("WITH") || word.eq_ignore_ascii_case("RECURSIVE"),
                    _ => false,
                };
                opens_binding.then(|| name.to_ascii_lowercase())
            }
            _ => None,
        })
        .collect()
}

fn bare_table_name(reference: &str) -> String {
    reference
        .rsplit('.')
        .next()
        .unwrap_or(reference)
        .trim_matches(|c| c == '"' || c == '`')
        .to_ascii_lowercase()
}

/// Read-only statement that touches catalog tables only
pub fn validate_sql(sql: &str, catalog: &Catalog) -> std::result::Result<(), String> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.is_empty() {
        return Err("empty statement".to_string());
    }
    let head = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if head != "SELECT" && head != "WITH" {
        return Err(format!("statement starts with {}, expected SELECT or WITH", head));
    }
    if statement.contains(';') {
        return Err("multiple statements".to_string());
    }

    let mut allowed: BTreeSet<String> = catalog
        .0
        .values()
        .map(|t| t.table_name.to_ascii_lowercase())
        .collect();
    allowed.extend(cte_names(statement));

    let tables = referenced_tables(statement);
    if tables.is_empty() {
        return Err("no table referenced".to_string());
    }
    for table in tables {
        if !allowed.contains(&bare_table_name(&table)) {
            return Err(format!("table {} is not in the catalog", table));
        }
    }
    Ok(())
}

/// Log-insights plan chosen by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsPlan {
    pub log_group: String,
    pub query: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightsSynthesis {
    Plan(InsightsPlan),
    Ignored,
}

fn as_millis(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const REGEX_KEYWORDS: [&str; 7] = ["like", "and", "or", "not", "in", "filter", "parse"];

/// Split at top-level separators, skipping quoted text, `/regex/` literals and parentheses.
/// `separator` returns the separator length when one starts at the given byte offset.
fn split_top_level(text: &str, separator: impl Fn(&str, usize) -> Option<usize>) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut skip_until = 0;
    let mut depth = 0usize;
    let mut closing: Option<char> = None;
    let mut escaped = false;
    // last significant character and the word it ends
    let mut last: Option<char> = None;
    let mut word = String::new();

    for (i, c) in text.char_indices() {
        if i < skip_until {
            continue;
        }
        if let Some(close) = closing {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == close {
                closing = None;
                last = Some(c);
                word.clear();
            }
            continue;
        }
        if depth == 0 {
            if let Some(len) = separator(text, i) {
                parts.push(&text[start..i]);
                start = i + len;
                skip_until = start;
                last = None;
                word.clear();
                continue;
            }
        }

        let is_word_char = c.is_alphanumeric() || matches!(c, '_' | '@' | '.');
        match c {
            '\'' | '"' | '`' => closing = Some(c),
            '/' => {
                // a slash after an operand is division
                let after_operand = match last {
                    Some(')') => true,
                    Some(p) if p.is_alphanumeric() || matches!(p, '_' | '@' | '.') => {
                        !REGEX_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
                    }
                    _ => false,
                };
                if !after_operand {
                    closing = Some('/');
                }
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if c.is_whitespace() {
            continue;
        }
        if is_word_char {
            if !last.is_some_and(|p| p.is_alphanumeric() || matches!(p, '_' | '@' | '.')) {
                word.clear();
            }
            word.push(c);
        } else {
            word.clear();
        }
        last = Some(c);
    }
    parts.push(&text[start..]);
    parts
}

fn pipe_at(text: &str, i: usize) -> Option<usize> {
    text[i..].starts_with('|').then_some(1)
}

fn and_at(text: &str, i: usize) -> Option<usize> {
    let rest = &text[i..];
    let keyword = rest.get(..3)?;
    let spaced = text[..i].ends_with(char::is_whitespace) && rest[3..].starts_with(char::is_whitespace);
    (spaced && keyword.eq_ignore_ascii_case("and")).then_some(3)
}

fn mentions_timestamp(text: &str) -> bool {
    text.to_ascii_lowercase().contains("@timestamp")
}

/// Drop `@timestamp` conditions from filter stages; the window is passed separately
fn strip_time_clauses(query: &str) -> String {
    split_top_level(query, pipe_at)
        .into_iter()
        .map(str::trim)
        .filter_map(|stage| {
            let condition = stage
                .get(..6)
                .filter(|head| head.eq_ignore_ascii_case("filter"))
                .map(|_| &stage[6..])
                .filter(|rest| rest.starts_with(char::is_whitespace));
            match condition {
                Some(condition) if mentions_timestamp(condition) => {
                    let kept: Vec<&str> = split_top_level(condition, and_at)
                        .into_iter()
                        .map(str::trim)
                        .filter(|c| !c.is_empty() && !mentions_timestamp(c))
                        .collect();
                    (!kept.is_empty()).then(|| format!("filter {}", kept.join(" and ")))
                }
                _ => Some(stage.to_string()),
            }
        })
        .filter(|stage| !stage.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Turn the model's reply into a plan, filling gaps with defaults
pub fn parse_insights_plan(raw: &str, log_groups: &[String], now: DateTime<Utc>) -> Result<InsightsSynthesis> {
    let cleaned = strip_code_fences(raw);
    if cleaned == IGNORED_SENTINEL {
        return Ok(InsightsSynthesis::Ignored);
    }

    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(Error::UpstreamFailed(
                "model did not return a JSON insights plan".to_string(),
            ))
        }
    };
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::UpstreamFailed(format!("insights plan is not valid JSON: {}", e)))?;

    let requested = value.get("log_group").and_then(Value::as_str).unwrap_or_default();
    let log_group = if log_groups.iter().any(|g| g == requested) {
        requested.to_string()
    } else {
        let fallback = log_groups
            .first()
            .ok_or_else(|| Error::NotFound("no log groups are available".to_string()))?;
        if !requested.is_empty() {
            warn!(requested, fallback = %fallback, "unknown log group in plan");
        }
        fallback.clone()
    };

    let query = value
        .get("query")
        .and_then(Value::as_str)
        .map(strip_time_clauses)
        .unwrap_or_default();
    if query.is_empty() {
        return Err(Error::UpstreamFailed("insights plan has no query".to_string()));
    }

    let now_ms = now.timestamp_millis();
    let (start_time_ms, end_time_ms) = match (
        as_millis(value.get("start_time_ms")),
        as_millis(value.get("end_time_ms")),
    ) {
        (Some(start), Some(end)) if 0 <= start && start < end => (start, end),
        _ => {
            debug!("insights plan has no usable window, using the last 7 days");
            (
                (now - Duration::days(FALLBACK_WINDOW_DAYS)).timestamp_millis(),
                now_ms,
            )
        }
    };

    Ok(InsightsSynthesis::Plan(InsightsPlan {
        log_group,
        query,
        start_time_ms,
        end_time_ms,
    }))
}

fn sql_prompt(catalog: &Catalog) -> String {
    let tables = catalog
        .0
        .iter()
        .map(|(log_type, t)| format!("- {}: table `{}` (data at {})", log_type, t.table_name, t.location))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You write Athena (Presto) SQL over AWS security logs. Available tables:\n{tables}\n\n\
Rules:\n\
- Use only the tables listed above.\n\
- Filter on the partition column `partition_date` only when the question needs a date filter. \
It is a string formatted yyyy/MM/dd; compare it to dates with date_parse(partition_date, '%Y/%m/%d').\n\
- Use COUNT(DISTINCT ...) for counts of unique principals.\n\
- Every non-aggregated column in SELECT must appear in GROUP BY.\n\
- When grouping by user name, exclude null and empty user names.\n\
- Return a single SELECT statement with no explanation and no code fences.\n\
- If the question is not about the log types above, return exactly {ignored}",
        tables = tables,
        ignored = IGNORED_SENTINEL
    )
}

fn insights_prompt(log_groups: &[String], now: DateTime<Utc>) -> String {
    format!(
        "You write CloudWatch Logs Insights queries. The current time is {now} ({now_ms} ms since epoch).\n\
Available log groups:\n{groups}\n\n\
Reply with a JSON object only: {{\"log_group\": string, \"query\": string, \"start_time_ms\": number, \"end_time_ms\": number}}.\n\
Choose the time window from the question. Do not put any time filter in the query itself.\n\
If the question cannot be answered from these log groups, return exactly {ignored}",
        now = now.to_rfc3339(),
        now_ms = now.timestamp_millis(),
        groups = log_groups
            .iter()
            .map(|g| format!("- {}", g))
            .collect::<Vec<_>>()
            .join("\n"),
        ignored = IGNORED_SENTINEL
    )
}

#[derive(Clone)]
pub struct QuerySynthesizer {
    llm: LlmClient,
}

impl QuerySynthesizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn synthesize_sql(&self, question: &str, catalog: &Catalog) -> Result<SqlSynthesis> {
        let request = LlmRequest::from_prompt(question)
            .with_system(sql_prompt(catalog))
            .with_model(self.llm.config().fast_model())
            .with_temperature(0.0);
        let raw = self.llm.complete(request).await?.text();
        let sql = strip_code_fences(&raw);

        if sql == IGNORED_SENTINEL {
            return Ok(SqlSynthesis::Ignored {
                reason: "question is not about the supported logs".to_string(),
            });
        }
        match validate_sql(&sql, catalog) {
            Ok(()) => {
                debug!(sql = %sql, "sql synthesized");
                Ok(SqlSynthesis::Sql { sql })
            }
            Err(reason) => {
                warn!(sql = %sql, reason = %reason, "rejected synthesized sql");
                Ok(SqlSynthesis::Ignored { reason })
            }
        }
    }

    pub async fn synthesize_insights(
        &self,
        question: &str,
        log_groups: &[String],
        now: DateTime<Utc>,
    ) -> Result<InsightsSynthesis> {
        let request = LlmRequest::from_prompt(question)
            .with_system(insights_prompt(log_groups, now))
            .with_model(self.llm.config().fast_model())
            .with_temperature(0.0);
        let raw = self.llm.complete(request).await?.text();
        parse_insights_plan(&raw, log_groups, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog() -> Catalog {
        Catalog::default()
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 1 \n"), "SELECT 1");
        assert_eq!(strip_code_fences("```\n###IGNORED###\n```"), IGNORED_SENTINEL);
    }

    #[test]
    fn test_valid_sql() {
        let sql = "SELECT useridentity.username, COUNT(*) AS c FROM cloudtrail_logs \
                   WHERE eventname = 'ConsoleLogin' AND date_parse(partition_date, '%Y/%m/%d') > current_date - interval '7' day \
                   GROUP BY useridentity.username";
        assert!(validate_sql(sql, &catalog()).is_ok());

        let joined = "SELECT g.severity FROM security_logs.guardduty_findings g JOIN cloudtrail_logs c ON g.id = c.eventid";
        assert!(validate_sql(joined, &catalog()).is_ok());
    }

    #[test]
    fn test_cte_extract_and_unnest_are_allowed() {
        let sql = "WITH logins AS (SELECT eventtime FROM cloudtrail_logs), \
                   hours AS (SELECT EXTRACT(hour FROM from_iso8601_timestamp(eventtime)) AS h FROM logins) \
                   SELECT h, COUNT(*) FROM hours CROSS JOIN UNNEST(ARRAY[1]) AS t(x) GROUP BY h;";
        assert_eq!(validate_sql(sql, &catalog()), Ok(()));
    }

    #[test]
    fn test_rejects_unknown_tables_and_writes() {
        assert!(validate_sql("SELECT * FROM users", &catalog()).is_err());
        assert!(validate_sql("DROP TABLE cloudtrail_logs", &catalog()).is_err());
        assert!(validate_sql("SELECT 1; DELETE FROM cloudtrail_logs", &catalog()).is_err());
        assert!(validate_sql("SELECT * FROM (SELECT * FROM secrets)", &catalog()).is_err());
        // quoted literal mentioning another table is fine
        assert!(validate_sql("SELECT 'from users' FROM cloudtrail_logs", &catalog()).is_ok());
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_insights_plan() {
        let groups = vec!["/aws/lambda/api".to_string(), "/aws/ecs/web".to_string()];
        let raw = r#"```json
{"log_group": "/aws/ecs/web", "query": "fields @timestamp, @message | filter @timestamp > 1000 | filter @message like /ERROR/", "start_time_ms": 1000, "end_time_ms": 2000}
```"#;
        let InsightsSynthesis::Plan(plan) = parse_insights_plan(raw, &groups, now()).unwrap() else {
            panic!("expected a plan");
        };
        assert_eq!(plan.log_group, "/aws/ecs/web");
        assert_eq!(plan.query, "fields @timestamp, @message | filter @message like /ERROR/");
        assert_eq!((plan.start_time_ms, plan.end_time_ms), (1000, 2000));
    }

    #[test]
    fn test_time_condition_removed_from_compound_filter() {
        assert_eq!(
            strip_time_clauses(
                "fields @message | filter @timestamp > 1000 and @message like /ERROR/ | stats count() by bin(1h)"
            ),
            "fields @message | filter @message like /ERROR/ | stats count() by bin(1h)"
        );
        assert_eq!(
            strip_time_clauses("filter @timestamp >= 1 AND @timestamp < 2 | fields @message"),
            "fields @message"
        );
    }

    #[test]
    fn test_pipes_inside_literals_are_kept() {
        let query = "filter @message like /ERROR|WARN/";
        assert_eq!(strip_time_clauses(query), query);

        let query = "fields @message | filter msg = 'a | b' and @logStream like /web|api/";
        assert_eq!(strip_time_clauses(query), query);

        // division is not a regex
        assert_eq!(
            strip_time_clauses("stats sum(bytes)/1024 as kb | filter @timestamp > 5"),
            "stats sum(bytes)/1024 as kb"
        );
    }

    #[test]
    fn test_insights_fallbacks() {
        let groups = vec!["/aws/lambda/api".to_string()];
        let raw = r#"{"log_group": "/nope", "query": "fields @message", "start_time_ms": "soon"}"#;
        let InsightsSynthesis::Plan(plan) = parse_insights_plan(raw, &groups, now()).unwrap() else {
            panic!("expected a plan");
        };
        assert_eq!(plan.log_group, "/aws/lambda/api");
        assert_eq!(plan.end_time_ms, now().timestamp_millis());
        assert_eq!(plan.end_time_ms - plan.start_time_ms, 7 * 24 * 3600 * 1000);

        assert_eq!(
            parse_insights_plan("###IGNORED###", &groups, now()).unwrap(),
            InsightsSynthesis::Ignored
        );
        assert!(matches!(
            parse_insights_plan("I think you should look at the api logs", &groups, now()),
            Err(Error::UpstreamFailed(_))
        ));
        assert!(matches!(
            parse_insights_plan(raw, &[], now()),
            Err(Error::NotFound(_))
        ));
    }
}
