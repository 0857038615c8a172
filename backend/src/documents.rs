//! Document library: ingestion, listing and loading of converted documents.
//!
//! Storage layout:
//!
//! ```text
//! pdf/docling/<folder>/<file_name>           original upload
//! pdf/docling/<folder>/extracted_data.md     converted markdown
//! pdf/docling/<folder>/images/<name>         extracted images
//! web/docling/<folder>/source.txt            URL of a scraped page
//! web/docling/<folder>/extracted_data.md
//! web/docling/<folder>/images/<name>
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use reqwest::{Client, Url};

use crate::convert::{Conversion, ConvertError, DocumentConverter, SourceKind};
use crate::storage::{BlobStore, StorageError};

pub const PDF_PREFIX: &str = "pdf/docling/";
pub const WEB_PREFIX: &str = "web/docling/";
pub const MARKDOWN_FILE: &str = "extracted_data.md";
const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error(transparent)]
    Conversion(#[from] ConvertError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Result of ingesting a document.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub folder: String,
    /// Key of the stored markdown.
    pub markdown_key: String,
    pub markdown: String,
}

/// Folder name derived from a file name or page title.
pub fn folder_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '.' | ' ' | ',' | '+' | '\'' | '\u{2019}' | '/' | '\\'))
        .collect()
}

/// Text of the first `<title>` element, if any.
pub fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title>")?;
    let title = html[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

pub struct DocumentLibrary {
    store: Arc<dyn BlobStore>,
    converter: Arc<dyn DocumentConverter>,
    http_client: Client,
}

impl DocumentLibrary {
    pub fn new(store: Arc<dyn BlobStore>, converter: Arc<dyn DocumentConverter>) -> Self {
        Self {
            store,
            converter,
            http_client: Client::new(),
        }
    }

    /// Distinct folders of ingested PDFs, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let keys = self.store.list(PDF_PREFIX).await?;
        let folders: BTreeSet<String> = keys
            .iter()
            .filter(|key| !key.ends_with(".png"))
            .filter_map(|key| key[PDF_PREFIX.len()..].split('/').next())
            .filter(|folder| !folder.is_empty())
            .map(str::to_string)
            .collect();
        Ok(folders.into_iter().collect())
    }

    /// Markdown of an ingested PDF.
    pub async fn load(&self, folder: &str) -> Result<String> {
        if folder.is_empty() || folder.contains('/') {
            return Err(DocumentError::InvalidInput(format!(
                "Invalid document name: '{}'",
                folder
            )));
        }

        let key = format!("{}{}/{}", PDF_PREFIX, folder, MARKDOWN_FILE);
        match self.store.get(&key).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(StorageError::NotFound(_)) => Err(DocumentError::NotFound(folder.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an uploaded PDF and its conversion.
    pub async fn ingest_pdf(&self, file_name: &str, data: Vec<u8>) -> Result<Ingested> {
        let folder = folder_name(file_name);
        if folder.is_empty() || file_name.contains('/') || file_name.contains('\\') {
            return Err(DocumentError::InvalidInput(format!(
                "Invalid file name: '{}'",
                file_name
            )));
        }
        if data.is_empty() {
            return Err(DocumentError::InvalidInput("Uploaded file is empty".to_string()));
        }

        let base = format!("{}{}", PDF_PREFIX, folder);
        self.store
            .put(&format!("{}/{}", base, file_name), &data)
            .await?;

        let conversion = self.converter.convert(SourceKind::Pdf, file_name, data).await?;
        let ingested = self.store_conversion(&base, folder, conversion).await?;

        tracing::info!("Ingested PDF {} into {}", file_name, ingested.markdown_key);
        Ok(ingested)
    }

    /// Fetch a web page and store its conversion.
    pub async fn ingest_url(&self, url: &str) -> Result<Ingested> {
        let parsed = Url::parse(url)
            .map_err(|e| DocumentError::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DocumentError::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let fetch_error = |reason: String| DocumentError::Fetch {
            url: url.to_string(),
            reason,
        };
        let html = self
            .http_client
            .get(parsed.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_error(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .to_vec();

        let page_title = html_title(&String::from_utf8_lossy(&html));
        let conversion = self
            .converter
            .convert(SourceKind::Html, "page.html", html)
            .await?;

        let title = conversion
            .title
            .clone()
            .or(page_title)
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| "page".to_string());
        let folder = folder_name(&format!("URL_{}.txt", title));

        let base = format!("{}{}", WEB_PREFIX, folder);
        self.store
            .put(&format!("{}/source.txt", base), url.as_bytes())
            .await?;
        let ingested = self.store_conversion(&base, folder, conversion).await?;

        tracing::info!("Ingested {} into {}", url, ingested.markdown_key);
        Ok(ingested)
    }

    /// Store images, link them into the markdown and store the markdown.
    async fn store_conversion(
        &self,
        base: &str,
        folder: String,
        conversion: Conversion,
    ) -> Result<Ingested> {
        let mut markdown = conversion.markdown;

        for image in &conversion.images {
            let image_key = format!("{}/images/{}", base, image_file_name(&image.name));
            self.store.put(&image_key, &image.data).await?;
            markdown = markdown.replacen(IMAGE_PLACEHOLDER, &format!("![Image]({})", image_key), 1);
        }

        let markdown_key = format!("{}/{}", base, MARKDOWN_FILE);
        self.store.put(&markdown_key, markdown.as_bytes()).await?;

        Ok(Ingested {
            folder,
            markdown_key,
            markdown,
        })
    }
}

/// Image names come from the converter; keep the extension but drop separators.
fn image_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\'))
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "image.png".to_string(),
        _ => cleaned,
    }
}
