//! DocChat API Gateway.
//!
//! HTTP front end that turns document chat requests into prompts, hands them
//! to the inference workers through the correlation broker and manages the
//! document library.

pub mod broker;
pub mod config;
pub mod convert;
pub mod documents;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod routes;
pub mod storage;
pub mod test_util;

pub use broker::{BrokerError, CorrelationBroker};
pub use config::Config;
pub use convert::{DocumentConverter, RemoteConverter};
pub use documents::DocumentLibrary;
pub use error::ApiError;
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore};

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Request/response broker towards the inference workers.
    pub broker: Arc<CorrelationBroker>,
    pub documents: Arc<DocumentLibrary>,
}
