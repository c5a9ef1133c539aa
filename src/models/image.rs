use base64::Engine;
use image::ImageFormat;
use std::fmt;
use std::sync::Arc;

/// Validated receipt image held in memory for the lifetime of its job.
#[derive(Clone)]
pub struct ImageData {
    bytes: Arc<[u8]>,
    format: ImageFormat,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, format: ImageFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Standard base64, the encoding the model-serving endpoints expect.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}
