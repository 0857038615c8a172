//! HTTP error mapping for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::broker::BrokerError;
use crate::documents::DocumentError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl ApiError {
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Broker(e) => match e {
                BrokerError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                BrokerError::Inference(_) => (StatusCode::BAD_GATEWAY, "inference_failed"),
                BrokerError::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "malformed_response"),
                BrokerError::Transport(_) | BrokerError::DispatcherStopped => {
                    (StatusCode::SERVICE_UNAVAILABLE, "transport_unavailable")
                }
                BrokerError::Protocol(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
            ApiError::Document(e) => match e {
                DocumentError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                DocumentError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DocumentError::Fetch { .. } => (StatusCode::BAD_GATEWAY, "fetch_failed"),
                DocumentError::Conversion(_) => (StatusCode::BAD_GATEWAY, "conversion_failed"),
                DocumentError::Storage(StorageError::InvalidKey(_)) => {
                    (StatusCode::BAD_REQUEST, "invalid_request")
                }
                DocumentError::Storage(StorageError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                DocumentError::Storage(StorageError::Io { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            tracing::error!(error_type, "{}", self);
        } else {
            tracing::debug!(error_type, "{}", self);
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TIMEOUT_MESSAGE;

    #[test]
    fn test_broker_error_statuses() {
        let cases = [
            (BrokerError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (BrokerError::Inference("x".into()), StatusCode::BAD_GATEWAY),
            (BrokerError::MalformedResponse("x".into()), StatusCode::BAD_GATEWAY),
            (BrokerError::DispatcherStopped, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_and_type().0, status);
        }
    }

    #[test]
    fn test_timeout_message_kept() {
        assert_eq!(ApiError::from(BrokerError::Timeout).to_string(), TIMEOUT_MESSAGE);
    }

    #[test]
    fn test_document_error_statuses() {
        assert_eq!(
            ApiError::from(DocumentError::NotFound("x".into())).status_and_type(),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            ApiError::from(DocumentError::InvalidInput("x".into())).status_and_type().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DocumentError::Storage(StorageError::Io {
                key: "k".into(),
                source: std::io::Error::other("disk full"),
            }))
            .status_and_type()
            .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
