//! Signed HTTP calls in the three wire styles the consumed services use:
//! JSON 1.1 (`X-Amz-Target`), the form-encoded query protocol, and plain
//! REST JSON.

use super::signer::{AwsCredentials, SigV4Signer, SignedHeaders};
use crate::config::AwsConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

/// Shared signed HTTP client
#[derive(Debug, Clone)]
pub struct AwsClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    endpoints: BTreeMap<String, String>,
}

impl AwsClient {
    pub fn new(
        http: reqwest::Client,
        credentials: AwsCredentials,
        region: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            region: region.into(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Build from configuration; fails when no credentials are configured
    pub fn from_config(config: &AwsConfig) -> Result<Self> {
        let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) else {
            return Err(Error::Config(
                "AWS credentials are not configured (AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY)"
                    .to_string(),
            ));
        };

        let credentials = AwsCredentials {
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            session_token: config.session_token.clone(),
        };

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            credentials,
            region: config.region.clone(),
            endpoints: config.endpoints.clone(),
        })
    }

    pub fn with_endpoint(mut self, service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(service.into(), endpoint.into());
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resolve the base URL for a service, honoring overrides
    fn endpoint(&self, service: &str, host_prefix: &str, global: bool) -> Result<Url> {
        let raw = match self.endpoints.get(service) {
            Some(custom) => custom.clone(),
            None if global => format!("https://{}.amazonaws.com/", host_prefix),
            None => format!("https://{}.{}.amazonaws.com/", host_prefix, self.region),
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("Invalid endpoint for {}: {}", service, e)))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        signing_service: &str,
        signing_region: &str,
        mut headers: SignedHeaders,
        body: Vec<u8>,
    ) -> Result<(reqwest::StatusCode, String)> {
        let signer = SigV4Signer::new(self.credentials.clone(), signing_region, signing_service);
        headers = signer.sign(method.as_str(), &url, &headers, &body, Utc::now());

        let mut request = self.http.request(method, url.clone());
        for (name, value) in &headers {
            // reqwest derives host from the URL
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(service = signing_service, %status, url = %url, "aws call completed");
        Ok((status, text))
    }

    /// JSON 1.1 protocol call (`X-Amz-Target: <prefix>.<action>`)
    pub async fn json_call(
        &self,
        service: &str,
        target_prefix: &str,
        action: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = self.endpoint(service, service, false)?;
        let mut headers = SignedHeaders::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.1".to_string(),
        );
        headers.insert(
            "x-amz-target".to_string(),
            format!("{}.{}", target_prefix, action),
        );

        let payload = serde_json::to_vec(body)?;
        let region = self.region.clone();
        let (status, text) = self
            .send(Method::POST, url, service, &region, headers, payload)
            .await?;

        if !status.is_success() {
            return Err(json_error(service, action, status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Query protocol call; returns the raw XML body
    pub async fn query_call(
        &self,
        service: &str,
        version: &str,
        action: &str,
        params: &[(&str, &str)],
        global: bool,
    ) -> Result<String> {
        let url = self.endpoint(service, service, global)?;
        let mut form = vec![
            format!("Action={}", urlencoding::encode(action)),
            format!("Version={}", urlencoding::encode(version)),
        ];
        for (k, v) in params {
            form.push(format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)));
        }
        let payload = form.join("&").into_bytes();

        let mut headers = SignedHeaders::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );

        // global services sign against us-east-1
        let region = if global {
            "us-east-1".to_string()
        } else {
            self.region.clone()
        };
        let (status, text) = self
            .send(Method::POST, url, service, &region, headers, payload)
            .await?;

        if !status.is_success() {
            return Err(query_error(service, action, status, &text));
        }
        Ok(text)
    }

    /// REST JSON call against `path` on the service host
    pub async fn rest_json(
        &self,
        service: &str,
        host_prefix: &str,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let base = self.endpoint(service, host_prefix, false)?;
        let url = base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Internal(format!("Invalid request path {}: {}", path, e)))?;

        let mut headers = SignedHeaders::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        let payload = serde_json::to_vec(body)?;
        let region = self.region.clone();
        let (status, text) = self
            .send(method, url, service, &region, headers, payload)
            .await?;

        if !status.is_success() {
            return Err(json_error(service, path, status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Map a JSON-protocol error body to an engine error
fn json_error(service: &str, action: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error_type = parsed
        .get("__type")
        .and_then(Value::as_str)
        .unwrap_or("UnknownError")
        .rsplit('#')
        .next()
        .unwrap_or("UnknownError")
        .to_string();
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();

    classify(service, action, status, &error_type, &message)
}

/// Map a query-protocol XML error body to an engine error
fn query_error(service: &str, action: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let code = super::xml::first_tag(body, "Code").unwrap_or_else(|| "UnknownError".to_string());
    let message = super::xml::first_tag(body, "Message").unwrap_or_else(|| body.to_string());
    classify(service, action, status, &code, &message)
}

fn classify(
    service: &str,
    action: &str,
    status: reqwest::StatusCode,
    error_type: &str,
    message: &str,
) -> Error {
    warn!(service, action, %status, error_type, "aws call failed");
    let detail = format!("{} {} failed ({}): {}", service, action, error_type, message);

    if error_type.contains("Throttl") || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::Throttled(detail)
    } else if error_type.contains("NoSuchEntity") || error_type.contains("NotFound") {
        Error::NotFound(detail)
    } else if status == reqwest::StatusCode::FORBIDDEN
        || error_type.contains("ExpiredToken")
        || error_type.contains("UnrecognizedClient")
    {
        Error::Unauthenticated(detail)
    } else {
        Error::UpstreamFailed(detail)
    }
}
