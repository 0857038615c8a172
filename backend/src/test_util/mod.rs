//! Helpers for building a gateway on in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use docchat_common::{MemoryStream, StreamConfig, TransportConfig, TransportKind};

use crate::config::{
    BrokerConfig, Config, ConverterConfig, LoggingConfig, ServerConfig, StorageConfig,
};
use crate::convert::RemoteConverter;
use crate::documents::DocumentLibrary;
use crate::storage::MemoryBlobStore;
use crate::{AppState, CorrelationBroker};

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body_bytes: 10 * 1024 * 1024,
        },
        transport: TransportConfig {
            kind: TransportKind::Memory,
            url: String::new(),
        },
        streams: StreamConfig::default(),
        broker: BrokerConfig {
            poll_block_ms: 100,
            ..BrokerConfig::default()
        },
        storage: StorageConfig {
            root: "unused".to_string(),
        },
        converter: ConverterConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

/// Gateway state wired to an in-memory stream and blob store.
pub struct TestGateway {
    pub stream: Arc<MemoryStream>,
    pub store: Arc<MemoryBlobStore>,
    pub state: Arc<AppState>,
}

pub async fn create_test_gateway(
    config: Config,
) -> Result<TestGateway, Box<dyn std::error::Error>> {
    let stream = Arc::new(MemoryStream::new());
    let store = Arc::new(MemoryBlobStore::new());

    let broker = CorrelationBroker::start(stream.clone(), config.streams.clone(), &config.broker)
        .await?;
    let converter = RemoteConverter::new(
        &config.converter.base_url,
        Duration::from_secs(config.converter.timeout_secs),
    )?;

    let state = Arc::new(AppState {
        config,
        broker: Arc::new(broker),
        documents: Arc::new(DocumentLibrary::new(store.clone(), Arc::new(converter))),
    });

    Ok(TestGateway {
        stream,
        store,
        state,
    })
}
