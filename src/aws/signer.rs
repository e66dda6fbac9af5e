//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static credentials used to sign requests
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into().into_boxed_str()),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::new(token.into().into_boxed_str()));
        self
    }
}

/// Signs requests for one service in one region
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

/// Headers to attach to the outgoing request, lowercase names
pub type SignedHeaders = BTreeMap<String, String>;

impl SigV4Signer {
    pub fn new(credentials: AwsCredentials, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// Sign a request and return the full header set to send.
    ///
    /// `headers` are the caller's headers (content type, target, ...); they
    /// are all included in the signature. `host` and `x-amz-date` (and the
    /// session token when present) are added here.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &SignedHeaders,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> SignedHeaders {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let mut all: SignedHeaders = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        all.insert("host".to_string(), host_header(url));
        all.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &self.credentials.session_token {
            all.insert(
                "x-amz-security-token".to_string(),
                token.expose_secret().to_string(),
            );
        }

        let signed_header_names = all.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = all.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri(url),
            canonical_query(url),
            canonical_headers,
            signed_header_names,
            hex_sha256(body)
        );

        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = self.signing_key(&date_stamp);
        let signature = hex(hmac_sha256(&signing_key, string_to_sign.as_bytes()).as_slice());

        all.insert(
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.credentials.access_key_id, scope, signed_header_names, signature
            ),
        );
        all
    }

    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key.expose_secret());
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Path segments are encoded once more on top of the URL's own encoding,
/// which is what every service except S3 expects.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

pub(crate) fn hex_sha256(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_signer() -> SigV4Signer {
        SigV4Signer::new(
            AwsCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
            "us-east-1",
            "service",
        )
    }

    #[test]
    fn test_get_vanilla() {
        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let headers = example_signer().sign("GET", &url, &SignedHeaders::new(), b"", now);

        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            headers["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn test_session_token_is_signed() {
        let signer = SigV4Signer::new(
            AwsCredentials::new("AKID", "secret").with_session_token("token-123"),
            "eu-west-1",
            "athena",
        );
        let url = Url::parse("https://athena.eu-west-1.amazonaws.com/").unwrap();
        let headers = signer.sign("POST", &url, &SignedHeaders::new(), b"{}", Utc::now());

        assert_eq!(headers["x-amz-security-token"], "token-123");
        assert!(headers["authorization"].contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_canonical_uri_double_encodes() {
        let url = Url::parse(
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-v2%3A1/invoke",
        )
        .unwrap();
        assert_eq!(canonical_uri(&url), "/model/anthropic.claude-v2%253A1/invoke");
    }

    #[test]
    fn test_canonical_query_sorted() {
        let url = Url::parse("https://iam.amazonaws.com/?Version=2010-05-08&Action=ListUsers").unwrap();
        assert_eq!(canonical_query(&url), "Action=ListUsers&Version=2010-05-08");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = AwsCredentials::new("AKID", "very-secret");
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }
}
