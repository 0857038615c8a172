//! Configuration sections shared by the gateway and the workers.

use serde::Deserialize;

/// Which stream transport to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Redis,
    /// In-process only; useful for tests and single-binary demos.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Connection URL, e.g. `redis://:password@host:6379/0`.
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            url: default_redis_url(),
        }
    }
}

/// Channel, group and consumer names for both directions of the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_request_stream")]
    pub request_stream: String,
    #[serde(default = "default_response_stream")]
    pub response_stream: String,
    #[serde(default = "default_request_group")]
    pub request_group: String,
    /// Each gateway process needs its own response group or consumer.
    #[serde(default = "default_response_group")]
    pub response_group: String,
    #[serde(default = "default_request_consumer")]
    pub request_consumer: String,
    #[serde(default = "default_response_consumer")]
    pub response_consumer: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            request_stream: default_request_stream(),
            response_stream: default_response_stream(),
            request_group: default_request_group(),
            response_group: default_response_group(),
            request_consumer: default_request_consumer(),
            response_consumer: default_response_consumer(),
        }
    }
}

// Default values
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_request_stream() -> String {
    "request_stream".to_string()
}
fn default_response_stream() -> String {
    "response_stream".to_string()
}
fn default_request_group() -> String {
    "request_group".to_string()
}
fn default_response_group() -> String {
    "response_group".to_string()
}
fn default_request_consumer() -> String {
    "Worker".to_string()
}
fn default_response_consumer() -> String {
    "Response_Worker".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_config() {
        let streams = StreamConfig::default();
        assert_eq!(streams.request_stream, "request_stream");
        assert_eq!(streams.response_stream, "response_stream");
        assert_eq!(streams.request_consumer, "Worker");
        assert_eq!(streams.response_consumer, "Response_Worker");
        assert_ne!(streams.request_group, streams.response_group);
    }

    #[test]
    fn test_transport_kind_from_json() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"kind": "memory"}"#).unwrap();
        assert_eq!(config.kind, TransportKind::Memory);
        assert_eq!(config.url, "redis://127.0.0.1:6379");
    }
}
