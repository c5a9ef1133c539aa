//! Canned model outputs for a small grocery receipt.

#![allow(dead_code)]

/// What the document-QA model "reads" off the receipt.
pub fn qa_answer(question: &str) -> &'static str {
    let q = question.to_ascii_lowercase();
    if q.contains("store") {
        "Corner Market"
    } else if q.contains("date") {
        "2024-03-01"
    } else if q.contains("total") {
        "$1,234.50"
    } else if q.contains("tax") {
        "2.10"
    } else {
        "N/A"
    }
}

/// Donut-style structured output, as a JSON string.
pub const DONUT_OUTPUT: &str =
    r#"{"menu": [{"nm": "Milk", "price": "3.20"}], "total": {"total_price": "1,234.50"}}"#;

/// A fenced normalizer reply with mixed number formats.
pub const LLM_RECEIPT_JSON: &str = r#"```json
{
  "store_name": "Corner Market",
  "shop_name": null,
  "date": "2024-03-01",
  "total_amount": "$1,234.50",
  "tax_amount": 2.1,
  "gst_amount": null,
  "sales_tax": "",
  "received": "1300",
  "payable": 1234.5
}
```"#;
