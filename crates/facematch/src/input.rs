//! Input acquisition strategies: where the two images of a comparison come from.

use crate::presenter::Failure;
use crate::sources::{ImageRef, SourceError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An image reference that is absent. References that are present but
/// unusable are not input errors; they fail when the image is loaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),
    #[error("no image given for {0}")]
    MissingImage(&'static str),
}

impl InputError {
    pub fn failure(&self) -> Failure {
        match self {
            InputError::MissingParam(_) => Failure::MissingInput,
            InputError::MissingImage(_) => Failure::MissingImage,
        }
    }
}

/// Produces the two image references of a comparison.
pub trait InputSource {
    fn resolve(&self) -> Result<[ImageRef; 2], InputError>;
}

/// Reads `p1` and `p2` from a page query string.
///
/// Accepts a bare query (`p1=..&p2=..`), one with a leading `?`, or a full
/// URL whose query carries the parameters.
pub struct QuerySource {
    query: String,
    base_dir: PathBuf,
}

impl QuerySource {
    pub fn new(query: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            base_dir: base_dir.into(),
        }
    }
}

impl InputSource for QuerySource {
    fn resolve(&self) -> Result<[ImageRef; 2], InputError> {
        let p1 = query_param(&self.query, "p1").ok_or(InputError::MissingParam("p1"))?;
        let p2 = query_param(&self.query, "p2").ok_or(InputError::MissingParam("p2"))?;
        Ok([
            bind_field("p1", &p1, &self.base_dir).ok_or(InputError::MissingParam("p1"))?,
            bind_field("p2", &p2, &self.base_dir).ok_or(InputError::MissingParam("p2"))?,
        ])
    }
}

/// Two references given directly.
pub struct PairSource {
    first: String,
    second: String,
    base_dir: PathBuf,
}

impl PairSource {
    pub fn new(first: impl Into<String>, second: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            base_dir: base_dir.into(),
        }
    }
}

impl InputSource for PairSource {
    fn resolve(&self) -> Result<[ImageRef; 2], InputError> {
        Ok([
            bind_field("first image", &self.first, &self.base_dir)
                .ok_or(InputError::MissingImage("first image"))?,
            bind_field("second image", &self.second, &self.base_dir)
                .ok_or(InputError::MissingImage("second image"))?,
        ])
    }
}

/// The URL field and file-upload field of the interactive front end.
#[derive(Debug, Default)]
pub struct InteractiveInputs {
    url: Option<ImageRef>,
    upload: Option<ImageRef>,
}

impl InteractiveInputs {
    /// Apply a new value of the URL field. A blank value is ignored.
    pub fn set_url(&mut self, raw: &str, base_dir: &Path) -> Result<&ImageRef, InputError> {
        let image = bind_field("url", raw, base_dir).ok_or(InputError::MissingImage("url"))?;
        Ok(self.url.insert(image))
    }

    /// Read a selected file and inline it as a data URL.
    ///
    /// An unreadable file still replaces the previous upload; the read error
    /// is reported when the image is loaded.
    pub async fn upload(&mut self, path: &Path) -> &ImageRef {
        let image = match tokio::fs::read(path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), bytes = bytes.len(), "file uploaded");
                ImageRef::from_upload(path, bytes)
            }
            Err(e) => {
                let error = SourceError::Read {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                };
                tracing::warn!(%error, "upload unreadable");
                ImageRef::Broken(error)
            }
        };
        self.upload.insert(image)
    }
}

impl InputSource for InteractiveInputs {
    fn resolve(&self) -> Result<[ImageRef; 2], InputError> {
        let url = self.url.clone().ok_or(InputError::MissingImage("url"))?;
        let upload = self.upload.clone().ok_or(InputError::MissingImage("file"))?;
        Ok([url, upload])
    }
}

/// `None` for a blank reference; a malformed one is bound as broken.
fn bind_field(field: &'static str, raw: &str, base_dir: &Path) -> Option<ImageRef> {
    match ImageRef::parse(raw, base_dir) {
        Ok(image) => Some(image),
        Err(SourceError::Empty) => None,
        Err(error) => {
            tracing::warn!(field, %error, "unusable image reference");
            Some(ImageRef::Broken(error))
        }
    }
}

/// First non-empty value of `name` in a query string, percent- and `+`-decoded.
fn query_param(query: &str, name: &str) -> Option<String> {
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    let query = query.split_once('?').map_or(query, |(_, q)| q);

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| decode_component(key) == name)
        .map(|(_, value)| decode_component(value))
        .filter(|value| !value.is_empty())
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}
