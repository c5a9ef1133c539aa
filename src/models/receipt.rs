use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Keys of the normalized receipt record, in output order.
pub const RECEIPT_KEYS: [&str; 9] = [
    "store_name",
    "shop_name",
    "date",
    "total_amount",
    "tax_amount",
    "gst_amount",
    "sales_tax",
    "received",
    "payable",
];

/// `1,234.50` style thousands grouping.
static GROUPED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid regex"));

/// The fixed nine-field receipt. Every field serializes, `null` when unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub store_name: Option<String>,
    pub shop_name: Option<String>,
    pub date: Option<String>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub gst_amount: Option<f64>,
    pub sales_tax: Option<f64>,
    pub received: Option<f64>,
    pub payable: Option<f64>,
}

impl Receipt {
    /// Project an arbitrary JSON object onto the receipt schema.
    ///
    /// Unknown keys are dropped, missing keys stay `None`, and values that
    /// cannot be coerced to the field's type become `None`.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(coerce_text);
        let number = |key: &str| object.get(key).and_then(coerce_number);

        Self {
            store_name: text("store_name"),
            shop_name: text("shop_name"),
            date: text("date"),
            total_amount: number("total_amount"),
            tax_amount: number("tax_amount"),
            gst_amount: number("gst_amount"),
            sales_tax: number("sales_tax"),
            received: number("received"),
            payable: number("payable"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Why normalization fell back to an all-null receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptMeta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Unparsed normalizer output, when there was any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw: Option<String>,
}

/// One question put to the QA extractor and its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Merged output of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub receipt: Receipt,
    pub receipt_meta: Option<ReceiptMeta>,
    pub raw_extraction_a: Vec<QaPair>,
    pub raw_extraction_b: Value,
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers pass through; numeric-looking strings are parsed. Never fails.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw
        .trim()
        .trim_start_matches(|c: char| is_currency(c) || c.is_whitespace())
        .trim_end_matches(|c: char| is_currency(c) || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = if GROUPED_NUMBER.is_match(trimmed) {
        trimmed.replace(',', "")
    } else {
        trimmed.to_string()
    };

    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn is_currency(c: char) -> bool {
    matches!(c, '$' | '€' | '£' | '¥' | '₹' | '₩' | '₱')
}
