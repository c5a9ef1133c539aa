use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::image::ImageData;

const CONFIDENCE_MARKER: &str = "\n\n(Confidence:";

/// Document question answering: one question about one image, one answer.
#[async_trait]
pub trait QuestionAnswering: Send + Sync {
    async fn answer(&self, image: &ImageData, question: &str) -> Result<String, ExtractionError>;

    fn name(&self) -> &str;
}

/// Document structure extraction: one image to a JSON value.
///
/// The value is either an object or a string that may itself hold JSON.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, image: &ImageData) -> Result<Value, ExtractionError>;

    fn name(&self) -> &str;
}

/// Client for the LayoutLM document-QA serving endpoint.
pub struct LayoutLmClient {
    http: Client,
    url: String,
}

#[derive(Deserialize)]
struct LayoutLmResponse {
    answer: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl LayoutLmClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl QuestionAnswering for LayoutLmClient {
    async fn answer(&self, image: &ImageData, question: &str) -> Result<String, ExtractionError> {
        let body = json!({
            "image": image.to_base64(),
            "mime_type": image.mime_type(),
            "question": question,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                service: "layoutlm",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: LayoutLmResponse = response.json().await?;
        if let Some(score) = parsed.score {
            tracing::debug!(question, score, "LayoutLM answer");
        }
        Ok(parsed.answer.unwrap_or_default())
    }

    fn name(&self) -> &str {
        "layoutlm"
    }
}

/// Client for the Donut receipt-parsing serving endpoint.
pub struct DonutClient {
    http: Client,
    url: String,
}

#[derive(Deserialize)]
struct DonutResponse {
    output: Value,
}

impl DonutClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl DocumentParser for DonutClient {
    async fn parse(&self, image: &ImageData) -> Result<Value, ExtractionError> {
        let body = json!({
            "image": image.to_base64(),
            "mime_type": image.mime_type(),
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                service: "donut",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DonutResponse = response.json().await?;
        Ok(parsed.output)
    }

    fn name(&self) -> &str {
        "donut"
    }
}

/// Strip a `(Confidence: …)` annotation some QA servers append to answers.
pub fn clean_answer(raw: &str) -> String {
    match raw.split_once(CONFIDENCE_MARKER) {
        Some((answer, _)) => answer.trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Shape document-parser output into a JSON object.
///
/// Strings holding a JSON object are parsed; other strings are kept under
/// `_raw_text`, any other non-object under `_raw`.
pub fn structure_document(output: Value) -> Value {
    match output {
        Value::Object(_) => output,
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => json!({ "_raw_text": text }),
        },
        other => json!({ "_raw": other.to_string() }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Extractor failed: {0}")]
    Failed(String),

    #[error("All {count} questions failed; first error: {first}")]
    AllQuestionsFailed { count: usize, first: String },

    #[error("Both extraction stages failed (question answering: {qa}; document parsing: {document})")]
    BothStagesFailed { qa: String, document: String },
}
