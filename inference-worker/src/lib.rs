//! DocChat inference worker.
//!
//! Reads inference requests from the request stream through a consumer
//! group, runs them against a hosted LLM provider and publishes one response
//! per request on the response stream.

pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod worker;

pub use config::Config;
pub use engine::{InferenceEngine, OpenAiCompatibleEngine, ProviderRouter};
pub use error::{Error, Result};
pub use pool::WorkerPool;
pub use worker::Worker;
