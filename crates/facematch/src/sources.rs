//! Image references, fetching, and the resolve-once readiness of an image slot.

use base64::Engine;
use facematch_core::Frame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("empty image reference")]
    Empty,
    #[error("malformed data URL: {0}")]
    MalformedDataUrl(String),
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("reading {path} failed: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("decoding {image} failed: {reason}")]
    Decode { image: String, reason: String },
    #[error("loading {image} timed out after {after:?}")]
    Timeout { image: String, after: Duration },
}

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// `http://` or `https://` URL.
    Remote(String),
    /// Inline `data:` URL payload.
    Data { mime: String, bytes: Vec<u8> },
    /// Local file, already resolved against the base directory.
    File(PathBuf),
    /// A reference that cannot be loaded; loading it yields the error.
    Broken(SourceError),
}

impl ImageRef {
    /// Parse a user-supplied reference. Relative paths resolve against `base_dir`.
    ///
    /// Only the form is checked; reachability surfaces later, when the image is loaded.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SourceError::Empty);
        }

        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("data:") {
            return parse_data_url(&raw[5..]);
        }
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(ImageRef::Remote(raw.to_string()));
        }

        let path = match lower.strip_prefix("file://") {
            Some(_) => {
                let decoded = urlencoding::decode_binary(raw[7..].as_bytes());
                PathBuf::from(String::from_utf8_lossy(&decoded).into_owned())
            }
            None => PathBuf::from(raw),
        };
        if path.is_absolute() {
            Ok(ImageRef::File(path))
        } else {
            Ok(ImageRef::File(base_dir.join(path)))
        }
    }

    /// Inline a local upload the way a browser `FileReader` produces a data URL.
    pub fn from_upload(path: &Path, bytes: Vec<u8>) -> Self {
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        ImageRef::Data { mime, bytes }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRef::Remote(url) => f.write_str(url),
            ImageRef::Data { mime, bytes } => write!(f, "data:{mime} ({} bytes)", bytes.len()),
            ImageRef::File(path) => write!(f, "{}", path.display()),
            ImageRef::Broken(error) => write!(f, "unusable reference ({error})"),
        }
    }
}

/// `rest` is everything after `data:`: `[<mime>][;param]*[;base64],<payload>`.
fn parse_data_url(rest: &str) -> Result<ImageRef, SourceError> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| SourceError::MalformedDataUrl("missing ',' separator".into()))?;

    let mut params = header.split(';');
    let mime = match params.next().map(str::trim) {
        Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| SourceError::MalformedDataUrl(format!("base64: {e}")))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    Ok(ImageRef::Data { mime, bytes })
}

/// Fetches and decodes images.
///
/// Remote requests are anonymous: no cookies or credentials are sent.
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ImageFetcher {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    /// Fetch and decode `image` into an RGB frame.
    pub async fn load(&self, image: &ImageRef) -> Result<Arc<Frame>, SourceError> {
        let work = async {
            let bytes = self.bytes(image).await?;
            let label = image.to_string();
            let frame = tokio::task::spawn_blocking(move || Frame::decode(&bytes))
                .await
                .map_err(|e| SourceError::Decode {
                    image: label.clone(),
                    reason: e.to_string(),
                })?
                .map_err(|e| SourceError::Decode {
                    image: label,
                    reason: e.to_string(),
                })?;
            tracing::debug!(%image, width = frame.width, height = frame.height, "image ready");
            Ok(Arc::new(frame))
        };

        match self.timeout {
            Some(after) => tokio::time::timeout(after, work).await.map_err(|_| SourceError::Timeout {
                image: image.to_string(),
                after,
            })?,
            None => work.await,
        }
    }

    async fn bytes(&self, image: &ImageRef) -> Result<Vec<u8>, SourceError> {
        match image {
            ImageRef::Broken(error) => Err(error.clone()),
            ImageRef::Data { bytes, .. } => Ok(bytes.clone()),
            ImageRef::File(path) => tokio::fs::read(path).await.map_err(|e| SourceError::Read {
                path: path.clone(),
                reason: e.to_string(),
            }),
            ImageRef::Remote(url) => {
                let fetch_err = |e: reqwest::Error| SourceError::Fetch {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(fetch_err)?;
                Ok(response.bytes().await.map_err(fetch_err)?.to_vec())
            }
        }
    }
}

/// An image bound to a display slot.
///
/// [`ImageSlot::ready`] can be awaited any number of times, from any number of
/// callers; the image is fetched and decoded once and every caller observes
/// that single outcome, failures included.
#[derive(Clone)]
pub struct ImageSlot {
    source: Arc<ImageRef>,
    ready: Arc<OnceCell<Result<Arc<Frame>, SourceError>>>,
}

impl ImageSlot {
    pub fn new(source: ImageRef) -> Self {
        Self {
            source: Arc::new(source),
            ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.ready.initialized()
    }

    /// Wait until the image is loaded, loading it on first call.
    pub async fn ready(&self, fetcher: &ImageFetcher) -> Result<Arc<Frame>, SourceError> {
        self.ready
            .get_or_init(|| fetcher.load(&self.source))
            .await
            .clone()
    }
}

impl std::fmt::Debug for ImageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSlot")
            .field("source", &self.source.to_string())
            .field("settled", &self.is_settled())
            .finish()
    }
}
