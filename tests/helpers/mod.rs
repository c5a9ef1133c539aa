//! Test helper utilities: stub model backends, an in-process server and a
//! callback receiver.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use image::ImageFormat;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use receipt_pipeline::app_state::AppState;
use receipt_pipeline::config::AppConfig;
use receipt_pipeline::models::image::ImageData;
use receipt_pipeline::models::job::ReceiptJob;
use receipt_pipeline::routes;
use receipt_pipeline::services::callback::CallbackDispatcher;
use receipt_pipeline::services::extraction::{DocumentParser, ExtractionError, QuestionAnswering};
use receipt_pipeline::services::llm::{LlmProvider, NormalizationError};
use receipt_pipeline::services::normalizer::Normalizer;
use receipt_pipeline::services::pipeline::Pipeline;
use receipt_pipeline::services::worker;

use crate::fixtures;

/// A complete 1x1 white RGB PNG.
pub fn png_bytes() -> Vec<u8> {
    b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x02\x00\x00\x00\x90wS\xde\x00\x00\x00\x0cIDATx\x9cc\xf8\xff\xff?\x00\x05\xfe\x02\xfe\r\xefF\xb8\x00\x00\x00\x00IEND\xaeB`\x82".to_vec()
}

pub fn png_image() -> ImageData {
    ImageData::new(png_bytes(), ImageFormat::Png)
}

/// Counts how many extractor calls overlap and the order questions arrive in.
#[derive(Default)]
pub struct Tracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl Tracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn enter(&self, question: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(question.to_string());
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Question answering stub. Panics on the question `"panic"`.
pub struct StubQa {
    pub delay: Duration,
    pub fail: bool,
    pub tracker: Arc<Tracker>,
}

impl StubQa {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
            tracker: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn slow(delay: Duration, tracker: Arc<Tracker>) -> Self {
        Self {
            delay,
            fail: false,
            tracker,
        }
    }
}

#[async_trait]
impl QuestionAnswering for StubQa {
    async fn answer(&self, _: &ImageData, question: &str) -> Result<String, ExtractionError> {
        if question == "panic" {
            panic!("extractor crashed");
        }
        self.tracker.enter(question);
        tokio::time::sleep(self.delay).await;
        self.tracker.leave();

        if self.fail {
            return Err(ExtractionError::Failed("layoutlm offline".into()));
        }
        Ok(fixtures::qa_answer(question).to_string())
    }

    fn name(&self) -> &str {
        "stub-qa"
    }
}

pub struct StubDocs {
    pub fail: bool,
}

#[async_trait]
impl DocumentParser for StubDocs {
    async fn parse(&self, _: &ImageData) -> Result<Value, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::Failed("donut offline".into()));
        }
        Ok(Value::String(fixtures::DONUT_OUTPUT.to_string()))
    }

    fn name(&self) -> &str {
        "stub-docs"
    }
}

/// Replies with a fixed text, or fails when `reply` is `None`.
pub struct StubLlm {
    pub reply: Option<String>,
}

impl StubLlm {
    pub fn receipt() -> Self {
        Self {
            reply: Some(fixtures::LLM_RECEIPT_JSON.to_string()),
        }
    }

    pub fn unreachable() -> Self {
        Self { reply: None }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    async fn chat(
        &self,
        _: &str,
        _: &str,
        _: Option<&ImageData>,
    ) -> Result<String, NormalizationError> {
        self.reply
            .clone()
            .ok_or_else(|| NormalizationError::Failed("connection refused".into()))
    }

    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

/// Application state over stub backends. The worker is not started.
pub fn build_state(config: AppConfig, qa: StubQa, docs: StubDocs, llm: StubLlm) -> AppState {
    let questions = config.questions();
    let pipeline = Pipeline::new(
        Arc::new(qa),
        Arc::new(docs),
        Normalizer::new(Arc::new(llm), false),
        questions,
    );
    let callbacks =
        CallbackDispatcher::new(Duration::from_secs(5)).expect("Failed to build callback client");
    AppState::new(config, pipeline, callbacks)
}

/// Defaults with raw extractor outputs left out of payloads.
pub fn base_config() -> AppConfig {
    AppConfig {
        include_raw: false,
        ..AppConfig::default()
    }
}

pub fn default_state() -> AppState {
    build_state(
        base_config(),
        StubQa::ok(),
        StubDocs { fail: false },
        StubLlm::receipt(),
    )
}

/// Serve the API on an ephemeral port with its worker running.
pub async fn spawn_app(state: AppState) -> (String, JoinHandle<()>) {
    let prometheus = PrometheusBuilder::new().build_recorder().handle();
    let app = routes::router(state.clone(), Arc::new(prometheus));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server error");
    });
    let worker = worker::spawn(state);

    (format!("http://{addr}"), worker)
}

pub type Received = Arc<Mutex<Vec<Value>>>;

/// A callback endpoint that records every body and answers `status`.
pub async fn spawn_callback_sink(status: StatusCode) -> (String, Received) {
    spawn_slow_callback_sink(status, Duration::ZERO).await
}

/// Like [`spawn_callback_sink`], but holds each response for `delay`.
/// Bodies are recorded on arrival.
pub async fn spawn_slow_callback_sink(status: StatusCode, delay: Duration) -> (String, Received) {
    let received: Received = Arc::default();

    let app = Router::new()
        .route(
            "/hook",
            post(
                move |State((store, status)): State<(Received, StatusCode)>, Json(body): Json<Value>| async move {
                    store.lock().unwrap().push(body);
                    tokio::time::sleep(delay).await;
                    status
                },
            ),
        )
        .with_state((received.clone(), status));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind callback listener");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Callback server error");
    });

    (format!("http://{addr}/hook"), received)
}

/// Wait until the job reaches a terminal status.
pub async fn wait_for_job(state: &AppState, job_id: Uuid) -> ReceiptJob {
    let mut status = state.store.subscribe(job_id).expect("Unknown job");
    tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| s.is_terminal()))
        .await
        .expect("Job did not finish in time")
        .expect("Job status channel closed");
    state.store.get(job_id).expect("Job vanished")
}

/// Poll `GET /api/jobs/{id}` until the job is terminal.
pub async fn poll_job(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    for _ in 0..1200 {
        let body: Value = client
            .get(format!("{base_url}/api/jobs/{job_id}"))
            .send()
            .await
            .expect("Status request failed")
            .json()
            .await
            .expect("Status body is not JSON");
        if matches!(body["status"].as_str(), Some("completed" | "failed")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Job {job_id} did not finish in time");
}

/// Wait for the callback sink to have at least `count` bodies.
pub async fn wait_for_callbacks(received: &Received, count: usize) -> Vec<Value> {
    for _ in 0..100 {
        let bodies = received.lock().unwrap().clone();
        if bodies.len() >= count {
            return bodies;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Expected {count} callbacks");
}
