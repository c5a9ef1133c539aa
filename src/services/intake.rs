//! Submission-time checks: resolve the request's image source into validated
//! bytes, or reject it before any job exists.

use base64::Engine;
use image::ImageFormat;
use std::path::{Path, PathBuf};

use crate::models::image::ImageData;

const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Where the caller said the image is.
#[derive(Debug)]
pub enum ImageSource {
    Upload {
        filename: Option<String>,
        bytes: Vec<u8>,
    },
    Path(String),
    Base64(String),
}

/// Turn an image source into validated image data.
pub async fn resolve_image(source: Option<ImageSource>) -> Result<ImageData, ValidationError> {
    match source.ok_or(ValidationError::MissingImage)? {
        ImageSource::Upload { filename, bytes } => image_from_upload(filename.as_deref(), bytes),
        ImageSource::Path(path) => image_from_path(&path).await,
        ImageSource::Base64(encoded) => image_from_base64(&encoded),
    }
}

pub fn image_from_upload(
    filename: Option<&str>,
    bytes: Vec<u8>,
) -> Result<ImageData, ValidationError> {
    if let Some(name) = filename.filter(|n| !n.trim().is_empty()) {
        check_extension(Path::new(name.trim()))?;
    }
    sniff(bytes)
}

/// Read a server-side file. Surrounding quotes and whitespace are ignored.
pub async fn image_from_path(raw: &str) -> Result<ImageData, ValidationError> {
    let cleaned = raw.trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        return Err(ValidationError::MissingImage);
    }
    let path = PathBuf::from(cleaned);

    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ValidationError::FileNotFound { path });
    }
    check_extension(&path)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| ValidationError::Unreadable {
            path: path.clone(),
            source,
        })?;
    sniff(bytes)
}

pub fn image_from_base64(encoded: &str) -> Result<ImageData, ValidationError> {
    // Accept data URLs as well as bare base64.
    let payload = match encoded.trim().split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded.trim(),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ValidationError::InvalidImage(format!("bad base64: {e}")))?;
    sniff(bytes)
}

/// Parse the multipart `questions` field: a JSON array of questions.
///
/// Anything else (bad JSON, not a list, empty list) means "use the defaults".
pub fn parse_questions(raw: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let items = value.as_array()?;
    let questions: Vec<String> = items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    (!questions.is_empty()).then_some(questions)
}

/// Whether a free-form field value looks like an absolute filesystem path.
pub fn looks_like_path(value: &str) -> bool {
    let v = value.trim().trim_matches('"');
    let bytes = v.as_bytes();
    v.starts_with('/') || v.contains(":\\") || (bytes.len() >= 2 && bytes[1] == b':')
}

fn check_extension(path: &Path) -> Result<(), ValidationError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedType)
    }
}

fn sniff(bytes: Vec<u8>) -> Result<ImageData, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyImage);
    }
    let format = match image::guess_format(&bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
        Ok(_) => return Err(ValidationError::UnsupportedType),
        Err(e) => return Err(ValidationError::InvalidImage(e.to_string())),
    };
    // A valid signature is not enough: the whole image must decode.
    image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| ValidationError::InvalidImage(e.to_string()))?;
    Ok(ImageData::new(bytes, format))
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing image: upload a file as `image`, or pass `image_path` / `image_base64`")]
    MissingImage,

    #[error("Image is empty")]
    EmptyImage,

    #[error("Invalid image type; use PNG or JPEG")]
    UnsupportedType,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("File not found or not a file: {path:?}")]
    FileNotFound { path: PathBuf },

    #[error("Could not read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidOptions(String),
}
