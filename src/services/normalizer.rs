use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::models::image::ImageData;
use crate::models::receipt::{QaPair, Receipt, ReceiptMeta};
use crate::services::llm::{LlmProvider, NormalizationError};

pub const SYSTEM_PROMPT: &str = "You are a receipt data extractor. You will receive two raw outputs \
from different OCR/QA models (LayoutLM Q&A and Donut extraction). Your task is to merge them into \
a single JSON object with exactly these keys (use null for any missing value):
- store_name (string): store or business name
- shop_name (string): shop name, can be same as store_name
- date (string): transaction date
- total_amount (number or string): total amount
- tax_amount (number or string): tax amount
- gst_amount (number or string): GST amount
- sales_tax (number or string): sales tax
- received (number or string): amount received
- payable (number or string): amount payable

Output ONLY valid JSON with these keys. No markdown, no explanation. Prefer numbers for amount \
fields when possible.";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid regex"));

/// Normalizer output that could not be projected onto the receipt schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptParseFailure {
    pub reason: String,
    pub raw: Option<String>,
}

impl From<ReceiptParseFailure> for ReceiptMeta {
    fn from(failure: ReceiptParseFailure) -> Self {
        ReceiptMeta {
            error: Some(failure.reason),
            raw: failure.raw,
        }
    }
}

/// Merges extractor outputs into a [`Receipt`] through a language model.
pub struct Normalizer {
    provider: Arc<dyn LlmProvider>,
    send_image: bool,
}

impl Normalizer {
    pub fn new(provider: Arc<dyn LlmProvider>, send_image: bool) -> Self {
        Self {
            provider,
            send_image,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Ask the model for the receipt record and project its answer.
    ///
    /// Never fails: provider errors and unparsable output come back as an
    /// all-null receipt plus a [`ReceiptMeta`] describing what went wrong.
    pub async fn normalize(
        &self,
        qa: &[QaPair],
        document: &Value,
        custom_questions: Option<&[String]>,
        image: &ImageData,
    ) -> (Receipt, Option<ReceiptMeta>) {
        let user = build_user_prompt(qa, document, custom_questions);
        let image = self.send_image.then_some(image);

        let outcome = match self.provider.chat(SYSTEM_PROMPT, &user, image).await {
            Ok(text) => parse_receipt(&text),
            Err(e) => Err(ReceiptParseFailure {
                reason: e.to_string(),
                raw: None,
            }),
        };

        match outcome {
            Ok(receipt) => {
                debug!(provider = self.provider.name(), "Receipt normalized");
                (receipt, None)
            }
            Err(failure) => {
                warn!(
                    provider = self.provider.name(),
                    model = self.provider.model(),
                    error = %failure.reason,
                    "Normalization fell back to empty receipt"
                );
                metrics::counter!("receipt_normalization_fallback_total").increment(1);
                (Receipt::default(), Some(failure.into()))
            }
        }
    }
}

/// User message carrying both extractor outputs.
pub fn build_user_prompt(
    qa: &[QaPair],
    document: &Value,
    custom_questions: Option<&[String]>,
) -> String {
    let qa_json = serde_json::to_string_pretty(qa).unwrap_or_else(|_| "[]".to_string());
    let doc_json = serde_json::to_string_pretty(document).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "LayoutLM (question-answering) results:\n{qa_json}\n\nDonut (full extraction) result:\n{doc_json}"
    );
    if let Some(questions) = custom_questions.filter(|q| !q.is_empty()) {
        prompt.push_str("\n\nThe caller asked these questions about the receipt:\n");
        for question in questions {
            prompt.push_str("- ");
            prompt.push_str(question);
            prompt.push('\n');
        }
    }
    prompt
}

/// Parse model output into a [`Receipt`].
///
/// A Markdown code fence around the JSON is tolerated.
pub fn parse_receipt(text: &str) -> Result<Receipt, ReceiptParseFailure> {
    let trimmed = text.trim();
    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    let failure = |error: NormalizationError| ReceiptParseFailure {
        reason: error.to_string(),
        raw: Some(text.to_string()),
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| failure(NormalizationError::InvalidJson(e.to_string())))?;
    match value {
        Value::Object(map) => Ok(Receipt::from_object(&map)),
        _ => Err(failure(NormalizationError::NotAnObject)),
    }
}
