use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use strum::{Display as StrumDisplay, EnumString};

/// How `/api/process` answers: hand back a job id, or wait for the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PipelineMode {
    Async,
    Sync,
}

/// Language-model backend used by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LlmProviderKind {
    Ollama,
    Minimax,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// `async` returns a job id immediately, `sync` waits for the result.
    #[serde(default = "default_mode", deserialize_with = "from_str")]
    pub pipeline_mode: PipelineMode,

    /// Include the raw extractor outputs in result payloads.
    #[serde(default = "default_true", deserialize_with = "flag")]
    pub include_raw: bool,

    /// Process-wide callback URL used when a request does not supply one.
    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// Seconds a sync-mode caller waits before getting a 503.
    #[serde(default)]
    pub pipeline_throttle_timeout: Option<u64>,

    #[serde(default = "default_provider", deserialize_with = "from_str")]
    pub llm_provider: LlmProviderKind,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    /// Attach the receipt image to the normalizer prompt (vision models only).
    #[serde(default, deserialize_with = "flag")]
    pub normalizer_send_image: bool,

    #[serde(default)]
    pub minimax_api_key: Option<String>,

    #[serde(default = "default_minimax_base_url")]
    pub minimax_base_url: String,

    #[serde(default = "default_minimax_model")]
    pub minimax_model: String,

    /// Document question-answering model endpoint.
    #[serde(default = "default_layoutlm_url")]
    pub layoutlm_url: String,

    /// Document structure extraction model endpoint.
    #[serde(default = "default_donut_url")]
    pub donut_url: String,

    /// Comma separated override of the built-in question set.
    #[serde(default)]
    pub default_questions: Option<Vec<String>>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Questions asked of the QA extractor when a request brings none.
pub const DEFAULT_QUESTIONS: [&str; 9] = [
    "What is the store or business name?",
    "What is the shop name?",
    "What is the date on the receipt?",
    "What is the total amount?",
    "What is the tax amount?",
    "What is the GST amount?",
    "What is the sales tax?",
    "What is the amount received?",
    "What is the amount payable?",
];

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_mode() -> PipelineMode {
    PipelineMode::Async
}

fn default_true() -> bool {
    true
}

fn default_callback_timeout() -> u64 {
    30
}

fn default_provider() -> LlmProviderKind {
    LlmProviderKind::Ollama
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_minimax_base_url() -> String {
    "https://api.minimax.io".to_string()
}

fn default_minimax_model() -> String {
    "MiniMax-M2.5".to_string()
}

fn default_layoutlm_url() -> String {
    "http://localhost:8001/layoutlm".to_string()
}

fn default_donut_url() -> String {
    "http://localhost:8001/donut".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}

/// Accepts `1`/`true`/`yes` (any case) as true, everything else as false.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    ))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            pipeline_mode: default_mode(),
            include_raw: true,
            callback_url: None,
            callback_timeout_secs: default_callback_timeout(),
            pipeline_throttle_timeout: None,
            llm_provider: default_provider(),
            ollama_url: default_ollama_url(),
            ollama_model: default_ollama_model(),
            normalizer_send_image: false,
            minimax_api_key: None,
            minimax_base_url: default_minimax_base_url(),
            minimax_model: default_minimax_model(),
            layoutlm_url: default_layoutlm_url(),
            donut_url: default_donut_url(),
            default_questions: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// The question set used when a request does not override it.
    pub fn questions(&self) -> Vec<String> {
        match &self.default_questions {
            Some(qs) if qs.iter().any(|q| !q.trim().is_empty()) => qs
                .iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            _ => DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        }
    }

    /// Blank values count as unset.
    pub fn global_callback_url(&self) -> Option<&str> {
        self.callback_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}
