// Client for the leaf disease classification service
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::retry::{is_retryable_status, with_retry, RetryConfig};

pub const DEFAULT_CLASSIFIER_URL: &str = "https://mango-disease-backend-zfy8.onrender.com";

/// Multipart field and file name the service expects
const UPLOAD_FIELD: &str = "file";
const UPLOAD_FILE_NAME: &str = "mango_leaf.jpg";
const UPLOAD_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Classifier rejected the image: {0}")]
    Rejected(String),

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClassifierError {
    fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Status { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            ClassifierError::NetworkError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Successful classification
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub disease: String,
    pub confidence: f64,
    /// Probability per known label
    pub all_predictions: BTreeMap<String, f64>,
}

/// Wire shape of `/predict`. Success and failure share one envelope.
#[derive(Debug, Deserialize)]
struct PredictResponse {
    success: bool,
    disease: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    all_predictions: BTreeMap<String, f64>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub num_classes: usize,
    pub classes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfoResponse {
    error: Option<String>,
    #[serde(default)]
    num_classes: usize,
    #[serde(default)]
    classes: Vec<String>,
}

pub struct ClassifierClient {
    client: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl ClassifierClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("LeafScan/0.1.0")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            // The upload is not retried unless the caller opts in
            retry_config: RetryConfig::none(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload image bytes and return the service's verdict
    pub async fn classify(&self, image: &[u8]) -> Result<Prediction> {
        let url = format!("{}/predict", self.base_url);
        debug!("Uploading {} bytes to {}", image.len(), url);

        let prediction = with_retry(&self.retry_config, ClassifierError::is_transient, || async {
            let part = reqwest::multipart::Part::bytes(image.to_vec())
                .file_name(UPLOAD_FILE_NAME)
                .mime_str(UPLOAD_MIME)?;
            let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

            let response = self.client.post(&url).multipart(form).send().await?;
            let status = response.status();
            let body = response.text().await?;

            parse_predict_response(status, &body)
        })
        .await?;

        info!(
            "Classified as {} ({:.1}%)",
            prediction.disease,
            prediction.confidence * 100.0
        );
        Ok(prediction)
    }

    /// Liveness probe, also says whether the model is loaded
    pub async fn health(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Labels the deployed model can produce
    pub async fn model_info(&self) -> Result<ModelInfo> {
        let url = format!("{}/model-info", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let info: ModelInfoResponse = serde_json::from_str(&body)?;
        if let Some(error) = info.error {
            return Err(ClassifierError::Rejected(error));
        }

        Ok(ModelInfo {
            num_classes: info.num_classes,
            classes: info.classes,
        })
    }
}

/// Turn a raw `/predict` reply into a prediction or a typed failure
pub fn parse_predict_response(status: reqwest::StatusCode, body: &str) -> Result<Prediction> {
    if !status.is_success() {
        return Err(ClassifierError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let response: PredictResponse = serde_json::from_str(body)?;

    if !response.success {
        return Err(ClassifierError::Rejected(
            response.error.unwrap_or_else(|| "Analysis failed".to_string()),
        ));
    }

    let disease = response
        .disease
        .ok_or_else(|| ClassifierError::InvalidResponse("missing `disease`".to_string()))?;
    let confidence = response
        .confidence
        .ok_or_else(|| ClassifierError::InvalidResponse("missing `confidence`".to_string()))?;

    Ok(Prediction {
        disease,
        confidence,
        all_predictions: response.all_predictions,
    })
}
