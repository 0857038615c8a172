//! Document conversion to markdown.
//!
//! Conversion runs in a separate service. It receives the raw bytes as a
//! multipart upload on `POST {base_url}/convert` and answers with markdown,
//! an optional title and the extracted images (base64).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Html,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Html => "html",
        }
    }

    fn mime(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "application/pdf",
            SourceKind::Html => "text/html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Conversion {
    /// Markdown with an `<!-- image -->` placeholder per extracted image.
    pub markdown: String,
    pub title: Option<String>,
    pub images: Vec<ExtractedImage>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Conversion service unreachable: {0}")]
    Request(String),

    #[error("Conversion service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Invalid conversion result: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(
        &self,
        kind: SourceKind,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<Conversion, ConvertError>;
}

/// Client for the HTTP conversion service.
pub struct RemoteConverter {
    http_client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    markdown: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    images: Vec<ConvertedImage>,
}

#[derive(Debug, Deserialize)]
struct ConvertedImage {
    name: String,
    data: String,
}

impl RemoteConverter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConvertError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConvertError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DocumentConverter for RemoteConverter {
    async fn convert(
        &self,
        kind: SourceKind,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<Conversion, ConvertError> {
        let size = data.len();
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(kind.mime())
            .map_err(|e| ConvertError::Request(e.to_string()))?;
        let form = Form::new().text("kind", kind.as_str()).part("file", part);

        let url = format!("{}/convert", self.base_url);
        tracing::debug!("Converting {} ({} bytes, {}) via {}", file_name, size, kind.as_str(), url);

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConvertError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ConvertError::Service { status, body });
        }

        let converted: ConvertResponse = response
            .json()
            .await
            .map_err(|e| ConvertError::InvalidResponse(e.to_string()))?;

        let images = converted
            .images
            .into_iter()
            .map(|image| {
                base64::engine::general_purpose::STANDARD
                    .decode(image.data.as_bytes())
                    .map(|data| ExtractedImage {
                        name: image.name.clone(),
                        data,
                    })
                    .map_err(|e| {
                        ConvertError::InvalidResponse(format!("image '{}': {}", image.name, e))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Conversion {
            markdown: converted.markdown,
            title: converted.title.filter(|t| !t.trim().is_empty()),
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn converter(server: &MockServer) -> RemoteConverter {
        RemoteConverter::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_convert_decodes_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "markdown": "# Report\n\n<!-- image -->",
                "title": "Report",
                "images": [{"name": "report_image_1.png", "data": "aGVsbG8="}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let conversion = converter(&server)
            .convert(SourceKind::Pdf, "report.pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap();

        assert_eq!(conversion.markdown, "# Report\n\n<!-- image -->");
        assert_eq!(conversion.title.as_deref(), Some("Report"));
        assert_eq!(
            conversion.images,
            vec![ExtractedImage {
                name: "report_image_1.png".to_string(),
                data: b"hello".to_vec(),
            }]
        );

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"kind\""));
        assert!(body.contains("filename=\"report.pdf\""));
    }

    #[tokio::test]
    async fn test_convert_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(500).set_body_string("docling crashed"))
            .mount(&server)
            .await;

        let err = converter(&server)
            .convert(SourceKind::Html, "page.html", b"<html></html>".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::Service { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_convert_bad_image_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "markdown": "text",
                "images": [{"name": "x.png", "data": "not base64!"}]
            })))
            .mount(&server)
            .await;

        let err = converter(&server)
            .convert(SourceKind::Pdf, "x.pdf", vec![1, 2, 3])
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::InvalidResponse(_)));
    }
}
