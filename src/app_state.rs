use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    callback::{CallbackDispatcher, CallbackError},
    extraction::{DonutClient, LayoutLmClient},
    llm,
    normalizer::Normalizer,
    pipeline::Pipeline,
    queue::JobQueue,
    store::JobStore,
};

/// Shared application state passed to route handlers and the worker.
///
/// Built once at startup; owns the job store and queue.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue>,
    pub pipeline: Arc<Pipeline>,
    pub callbacks: Arc<CallbackDispatcher>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Pipeline, callbacks: CallbackDispatcher) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(JobStore::new()),
            queue: Arc::new(JobQueue::new()),
            pipeline: Arc::new(pipeline),
            callbacks: Arc::new(callbacks),
        }
    }

    /// Wire up the HTTP-backed extractors and normalizer named in `config`.
    pub fn from_config(config: AppConfig) -> Result<Self, CallbackError> {
        let normalizer = Normalizer::new(
            llm::provider_from_config(&config),
            config.normalizer_send_image,
        );
        let pipeline = Pipeline::new(
            Arc::new(LayoutLmClient::new(config.layoutlm_url.clone())),
            Arc::new(DonutClient::new(config.donut_url.clone())),
            normalizer,
            config.questions(),
        );
        let callbacks =
            CallbackDispatcher::new(Duration::from_secs(config.callback_timeout_secs))?;

        Ok(Self::new(config, pipeline, callbacks))
    }
}
