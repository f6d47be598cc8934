//! Self-describing image blobs (`data:image/<subtype>;base64,<payload>`).
//!
//! Probe images coming out of the capture widget and reference photos stored
//! in the roster both travel as data URIs, since that is what the vision
//! router accepts in an `image_url` content part.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("Image is not a data URI")]
    NotDataUri,
    #[error("Data URI has no payload separator")]
    MissingPayload,
    #[error("Data URI is not base64-encoded")]
    NotBase64,
    #[error("Data URI media type is not an image: {0}")]
    NotAnImage(String),
    #[error("Data URI payload is empty")]
    EmptyPayload,
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// An encoded still image carried as a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedImage {
    uri: String,
    mime_type: String,
    byte_len: usize,
}

impl EncodedImage {
    /// Wrap raw JPEG bytes.
    pub fn from_jpeg_bytes(bytes: &[u8]) -> Self {
        Self::from_bytes("image/jpeg", bytes)
    }

    /// Wrap raw encoded bytes with the given image media type.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            uri: format!("{}{}{},{}", DATA_PREFIX, mime_type, BASE64_MARKER, payload),
            mime_type: mime_type.to_string(),
            byte_len: bytes.len(),
        }
    }

    /// Parse and validate a data URI. Only non-empty base64 image payloads pass.
    pub fn parse(uri: &str) -> Result<Self, ImageError> {
        let trimmed = uri.trim();
        let rest = trimmed.strip_prefix(DATA_PREFIX).ok_or(ImageError::NotDataUri)?;
        let (header, payload) = rest.split_once(',').ok_or(ImageError::MissingPayload)?;

        let mime_type = header
            .strip_suffix(BASE64_MARKER)
            .ok_or(ImageError::NotBase64)?
            .to_ascii_lowercase();

        match mime_type.strip_prefix("image/") {
            Some(subtype) if !subtype.is_empty() => {}
            _ => return Err(ImageError::NotAnImage(mime_type)),
        }

        if payload.is_empty() {
            return Err(ImageError::EmptyPayload);
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ImageError::InvalidBase64(e.to_string()))?;
        if decoded.is_empty() {
            return Err(ImageError::EmptyPayload);
        }

        Ok(Self {
            uri: trimmed.to_string(),
            mime_type,
            byte_len: decoded.len(),
        })
    }

    pub fn as_data_uri(&self) -> &str {
        &self.uri
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size of the decoded image in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Decode the payload back to raw bytes
    pub fn decode(&self) -> Result<Vec<u8>, ImageError> {
        let (_, payload) = self.uri.split_once(',').ok_or(ImageError::MissingPayload)?;
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ImageError::InvalidBase64(e.to_string()))
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EncodedImage> for String {
    fn from(image: EncodedImage) -> Self {
        image.uri
    }
}
