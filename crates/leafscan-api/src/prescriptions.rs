// Prescriptions document kept as a file behind a GitHub-style contents API
//
// The file is a JSON object mapping disease label -> list of treatment steps.
// The API hands it back base64-encoded (wrapped with newlines) along with a
// `sha` that must be echoed on update.
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::retry::{is_retryable_status, with_retry, RetryConfig};

pub const DEFAULT_PRESCRIPTIONS_URL: &str =
    "https://api.github.com/repos/jraay12/mango-disease/contents/api.txt";

#[derive(Error, Debug)]
pub enum PrescriptionsError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Prescriptions file not found")]
    NotFound,

    #[error("Authentication required")]
    AuthRequired,

    #[error("Response carried no file content")]
    MissingContent,

    #[error("Could not decode file content: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl PrescriptionsError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            PrescriptionsError::Unavailable(_) | PrescriptionsError::NetworkError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PrescriptionsError>;

/// Disease label -> ordered treatment steps
pub type PrescriptionMap = BTreeMap<String, Vec<String>>;

/// Decoded file plus the revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionFile {
    pub sha: String,
    pub entries: PrescriptionMap,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    content: Option<UpdatedContent>,
}

#[derive(Debug, Deserialize)]
struct UpdatedContent {
    sha: String,
}

pub struct PrescriptionsClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    retry_config: RetryConfig,
}

impl PrescriptionsClient {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = reqwest::Client::builder()
            .user_agent("LeafScan/0.1.0")
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            token,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Download and decode the current prescriptions file
    pub async fn fetch(&self) -> Result<PrescriptionFile> {
        let token = self.token.clone();

        with_retry(&self.retry_config, PrescriptionsError::is_transient, || async {
            let mut request = self.client.get(&self.url);
            if let Some(ref token) = token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(PrescriptionsError::NotFound);
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(PrescriptionsError::AuthRequired);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = format!("Status {}: {}", status, body);
                if is_retryable_status(status) {
                    return Err(PrescriptionsError::Unavailable(err));
                }
                return Err(PrescriptionsError::RequestFailed(err));
            }

            let body = response.text().await?;
            parse_contents(&body)
        })
        .await
    }

    /// Replace the remote file. Returns the new revision sha.
    pub async fn publish(&self, entries: &PrescriptionMap, sha: &str, message: &str) -> Result<String> {
        let token = self.token.as_ref().ok_or(PrescriptionsError::AuthRequired)?;

        let body = UpdateRequest {
            message,
            content: encode_entries(entries)?,
            sha,
        };

        debug!("Publishing {} prescription categories", entries.len());
        let response = self
            .client
            .put(&self.url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PrescriptionsError::AuthRequired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PrescriptionsError::RequestFailed(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let updated: UpdateResponse = serde_json::from_str(&body)?;
        updated
            .content
            .map(|c| c.sha)
            .ok_or(PrescriptionsError::MissingContent)
    }
}

/// Contents API body to decoded file. Malformed bodies are parse errors, never retried.
fn parse_contents(body: &str) -> Result<PrescriptionFile> {
    let contents: ContentsResponse = serde_json::from_str(body)?;
    decode_contents(contents)
}

fn decode_contents(contents: ContentsResponse) -> Result<PrescriptionFile> {
    let content = contents.content.ok_or(PrescriptionsError::MissingContent)?;
    // Publishing needs the revision, so a file without one is unusable
    let sha = contents
        .sha
        .filter(|sha| !sha.trim().is_empty())
        .ok_or(PrescriptionsError::MissingContent)?;
    let entries = decode_entries(&content)?;

    Ok(PrescriptionFile { sha, entries })
}

/// Base64 body as served by the contents API, line breaks included
pub fn decode_entries(content: &str) -> Result<PrescriptionMap> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PrescriptionsError::Decode(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| PrescriptionsError::Decode(e.to_string()))?;

    Ok(serde_json::from_str(&text)?)
}

pub fn encode_entries(entries: &PrescriptionMap) -> Result<String> {
    let json = serde_json::to_string_pretty(entries)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrescriptionMap {
        let mut map = PrescriptionMap::new();
        map.insert(
            "Anthracnose".to_string(),
            vec![
                "Prune infected twigs".to_string(),
                "Spray copper fungicide".to_string(),
            ],
        );
        map.insert("Healthy".to_string(), vec![]);
        map
    }

    #[test]
    fn test_decode_handles_wrapped_lines() {
        let encoded = encode_entries(&sample()).unwrap();
        // The API wraps base64 at 60 columns
        let wrapped: String = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| format!("{}\n", std::str::from_utf8(c).unwrap()))
            .collect();

        assert_eq!(decode_entries(&wrapped).unwrap(), sample());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_entries("!!!not base64!!!").unwrap_err();
        assert!(matches!(err, PrescriptionsError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_object_json() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"[1,2,3]");
        let err = decode_entries(&encoded).unwrap_err();
        assert!(matches!(err, PrescriptionsError::ParseError(_)));
    }

    #[test]
    fn test_decode_contents_requires_content() {
        let err = decode_contents(ContentsResponse {
            sha: Some("abc".to_string()),
            content: None,
        })
        .unwrap_err();
        assert!(matches!(err, PrescriptionsError::MissingContent));
    }

    #[test]
    fn test_decode_contents_keeps_sha() {
        let file = decode_contents(ContentsResponse {
            sha: Some("abc123".to_string()),
            content: Some(encode_entries(&sample()).unwrap()),
        })
        .unwrap();

        assert_eq!(file.sha, "abc123");
        assert_eq!(file.entries["Anthracnose"].len(), 2);
    }

    #[test]
    fn test_decode_contents_requires_sha() {
        for sha in [None, Some(String::new())] {
            let err = decode_contents(ContentsResponse {
                sha,
                content: Some(encode_entries(&sample()).unwrap()),
            })
            .unwrap_err();
            assert!(matches!(err, PrescriptionsError::MissingContent));
        }
    }

    #[test]
    fn test_malformed_body_is_parse_error_not_retried() {
        let err = parse_contents("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, PrescriptionsError::ParseError(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_contents_body() {
        let body = serde_json::json!({
            "sha": "abc123",
            "content": encode_entries(&sample()).unwrap(),
        })
        .to_string();

        let file = parse_contents(&body).unwrap();
        assert_eq!(file.sha, "abc123");
        assert_eq!(file.entries, sample());
    }

    #[tokio::test]
    async fn test_publish_without_token_fails_fast() {
        let client =
            PrescriptionsClient::new("http://127.0.0.1:9/contents", None, Duration::from_secs(1)).unwrap();

        let err = client.publish(&sample(), "sha", "update").await.unwrap_err();
        assert!(matches!(err, PrescriptionsError::AuthRequired));
    }
}
