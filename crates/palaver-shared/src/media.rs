//! Image attachment helpers: allow-list validation, client-side resize,
//! and data-URL packing for optimistic previews.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;

use crate::constants::{IMAGE_JPEG_QUALITY, IMAGE_MAX_EDGE, SUPPORTED_IMAGE_TYPES};
use crate::error::MediaError;

/// Whether a MIME type is on the upload allow-list.
pub fn is_file_type_supported(mime_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&mime_type)
}

/// Downscale an image so its longest edge fits `IMAGE_MAX_EDGE` and
/// re-encode it as JPEG. Images already within bounds are still re-encoded
/// so every upload reaches the backend in one format.
pub fn resize_image(bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let img = image::load_from_memory(bytes)?;

    let resized = if img.width() > IMAGE_MAX_EDGE || img.height() > IMAGE_MAX_EDGE {
        img.thumbnail(IMAGE_MAX_EDGE, IMAGE_MAX_EDGE)
    } else {
        img
    };

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, IMAGE_JPEG_QUALITY);
    resized.into_rgb8().write_with_encoder(encoder)?;
    Ok(out)
}

/// Pack raw bytes into a `data:` URL.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Unpack a `data:` URL into its MIME type and raw bytes.
pub fn data_url_to_blob(data_url: &str) -> Result<(String, Vec<u8>), MediaError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| MediaError::InvalidDataUrl("missing data: scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaError::InvalidDataUrl("missing payload separator".into()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| MediaError::InvalidDataUrl("only base64 payloads are supported".into()))?;

    let bytes = BASE64.decode(payload)?;
    Ok((mime_type.to_string(), bytes))
}
