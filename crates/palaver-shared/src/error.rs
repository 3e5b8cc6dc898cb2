use thiserror::Error;

/// Errors produced by the media helpers.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Image decode/encode error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Base64 payload could not be decoded.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Malformed `data:` URL.
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),
}
