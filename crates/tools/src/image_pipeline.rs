//! Image pipeline: download, compress, describe and store images.
//!
//! Every URL of a batch gets its identifier up front. The download stage and
//! the description stage then run concurrently for every URL; a failure in
//! one stage never affects the other, and a failure for one URL never affects
//! the rest of the batch.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use glimpse_core::message::{ContentPart, Turn};
use glimpse_core::provider::{Provider, ProviderRequest};
use glimpse_session::ImageIdAllocator;
use image::imageops::FilterType;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Images larger than this in either dimension are downscaled before storage.
pub const MAX_DIMENSION: u32 = 1024;

/// Shown in place of a description the vision model could not provide.
pub const DESCRIPTION_UNAVAILABLE: &str = "Description unavailable.";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const VISION_TIMEOUT: Duration = Duration::from_secs(120);
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

const DESCRIBE_PROMPT: &str = "Describe this image in two or three sentences. Focus on what is \
visibly shown: subjects, setting, notable details and any legible text. Do not speculate beyond \
what is visible and do not mention the image identifier.";

const RASTER_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Identifier echoes such as `img_3:`, `[img_3]` or `Image img_3 -`.
static ID_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    // A constant pattern; failing to compile is a programming error.
    Regex::new(r"(?i)^\s*(?:image\s+)?[\[(]?\s*img_\d+\s*[\])]?\s*[:\-–—.]?\s*")
        .expect("ID_PREFIX is a valid pattern")
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Source of raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches images over HTTP with a browser-like user agent.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request_err = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(request_err)?;
        Ok(bytes.to_vec())
    }
}

/// What the vision model said about an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum Description {
    Described(String),
    Unavailable,
}

impl Description {
    /// Display text; never empty.
    pub fn text(&self) -> &str {
        match self {
            Self::Described(text) => text,
            Self::Unavailable => DESCRIPTION_UNAVAILABLE,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Described(_))
    }
}

/// One analyzed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub id: String,
    pub url: String,
    /// Absent when the download or write failed
    pub storage_path: Option<PathBuf>,
    pub description: Description,
}

impl ImageAnalysis {
    /// File name shown in labels: the stored file, or the URL's last segment.
    pub fn file_name(&self) -> String {
        if let Some(name) = self
            .storage_path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        {
            return name.to_string();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(String::from))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// The concurrent download + description pipeline.
pub struct ImagePipeline {
    fetcher: Arc<dyn ImageFetcher>,
    describer: Arc<dyn Provider>,
    vision_model: String,
    images_dir: PathBuf,
    ids: ImageIdAllocator,
}

impl ImagePipeline {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        describer: Arc<dyn Provider>,
        vision_model: impl Into<String>,
        images_dir: impl Into<PathBuf>,
        ids: ImageIdAllocator,
    ) -> Self {
        Self {
            fetcher,
            describer,
            vision_model: vision_model.into(),
            images_dir: images_dir.into(),
            ids,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Analyze a batch. One entry per input URL, in input order.
    ///
    /// A URL repeated within the batch is fetched and described once; every
    /// occurrence shares that analysis and its identifier.
    ///
    /// `context_query` is the most recent search query; it steers the
    /// description toward what the user asked about.
    pub async fn analyze(&self, urls: &[String], context_query: Option<&str>) -> Vec<ImageAnalysis> {
        let mut seen = HashSet::new();
        let tasks: Vec<(String, String)> = urls
            .iter()
            .filter(|u| seen.insert(u.as_str()))
            .map(|u| (self.ids.next_id(), u.clone()))
            .collect();

        debug!(count = tasks.len(), "Analyzing image batch");

        let futures = tasks.into_iter().map(|(id, url)| async move {
            let (storage_path, description) = tokio::join!(
                self.download(&id, &url),
                self.describe(&url, context_query)
            );
            ImageAnalysis {
                id,
                url,
                storage_path,
                description,
            }
        });

        let analyzed = join_all(futures).await;
        urls.iter()
            .filter_map(|u| analyzed.iter().find(|a| &a.url == u).cloned())
            .collect()
    }

    async fn download(&self, id: &str, url: &str) -> Option<PathBuf> {
        let bytes = match self.fetcher.fetch(url).await {
            Ok(b) => b,
            Err(e) => {
                warn!(id, error = %e, "Image download failed");
                return None;
            }
        };

        let bytes = match tokio::task::spawn_blocking(move || compress(bytes)).await {
            Ok(b) => b,
            Err(e) => {
                warn!(id, error = %e, "Image compression task failed");
                return None;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.images_dir).await {
            warn!(dir = %self.images_dir.display(), error = %e, "Failed to create images directory");
            return None;
        }

        let path = self.images_dir.join(format!("{id}.{}", extension_for(url)));
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                debug!(id, path = %path.display(), size = bytes.len(), "Image stored");
                Some(path)
            }
            Err(e) => {
                warn!(id, path = %path.display(), error = %e, "Failed to write image");
                None
            }
        }
    }

    async fn describe(&self, url: &str, context_query: Option<&str>) -> Description {
        let mut prompt = DESCRIBE_PROMPT.to_string();
        if let Some(query) = context_query.filter(|q| !q.trim().is_empty()) {
            prompt.push_str(&format!(
                " The user is researching \"{query}\"; mention details relevant to it."
            ));
        }

        let mut request = ProviderRequest::new(
            &self.vision_model,
            vec![Turn::user_parts(vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    url: url.to_string(),
                },
            ])],
        );
        request.temperature = 0.2;
        request.max_tokens = Some(300);

        match tokio::time::timeout(VISION_TIMEOUT, self.describer.complete(request)).await {
            Ok(Ok(response)) => {
                let text = strip_id_prefix(&response.content);
                if text.is_empty() {
                    Description::Unavailable
                } else {
                    Description::Described(text)
                }
            }
            Ok(Err(e)) => {
                warn!(url, error = %e, "Image description failed");
                Description::Unavailable
            }
            Err(_) => {
                warn!(url, timeout_secs = VISION_TIMEOUT.as_secs(), "Image description timed out");
                Description::Unavailable
            }
        }
    }
}

/// Downscale oversized raster images, re-encoded in their own format.
///
/// Anything that cannot be decoded or re-encoded is returned unchanged.
pub fn compress(bytes: Vec<u8>) -> Vec<u8> {
    let Ok(format) = image::guess_format(&bytes) else {
        return bytes;
    };
    let Ok(img) = image::load_from_memory_with_format(&bytes, format) else {
        return bytes;
    };
    if img.width() <= MAX_DIMENSION && img.height() <= MAX_DIMENSION {
        return bytes;
    }

    let resized = img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle);
    let mut out = Vec::new();
    match resized.write_to(&mut Cursor::new(&mut out), format) {
        Ok(()) => out,
        Err(e) => {
            debug!(error = %e, "Re-encoding failed; storing original bytes");
            bytes
        }
    }
}

/// File extension for a stored image, inferred from the URL path.
pub fn extension_for(image_url: &str) -> &'static str {
    let path = url::Url::parse(image_url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    path.rsplit_once('.')
        .and_then(|(_, ext)| RASTER_EXTENSIONS.iter().find(|e| **e == ext))
        .copied()
        .unwrap_or("jpg")
}

/// Remove an echoed identifier prefix from a model description.
pub fn strip_id_prefix(text: &str) -> String {
    ID_PREFIX.replace(text.trim(), "").trim().to_string()
}

/// The model-facing summary of a batch.
pub fn format_analyses(analyses: &[ImageAnalysis]) -> String {
    if analyses.is_empty() {
        return "No images to analyze.".into();
    }

    let mut out = format!("Analyzed {} image(s); they are displayed to the user.\n", analyses.len());
    for a in analyses {
        out.push_str(&format!("\n{} ({})\n{}\n", a.id, a.url, a.description.text()));
        if a.storage_path.is_none() {
            out.push_str("(download failed; shown as a label only)\n");
        }
    }
    out
}
