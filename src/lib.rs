//! Receipt Extraction Pipeline
//!
//! Accepts receipt images over HTTP, runs them one at a time through two
//! document extractors and an LLM normalizer, and reports a fixed nine-key
//! receipt by polling, by waiting on the request, or by callback.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
