//! Image and text intake validation
//!
//! Pure checks run before any costed call. Images are accepted only when the
//! declared MIME type is allowed and the leading bytes carry a matching
//! image signature; queries are bounded by trimmed character count.

use thiserror::Error;


/// 10 MiB
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_QUERY_CHARS: usize = 100;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Why input was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeRejection {
    #[error("Image is empty")]
    EmptyImage,

    #[error("Image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("File content does not look like a supported image")]
    SignatureMismatch,

    #[error("Query must be at least {MIN_QUERY_CHARS} characters")]
    QueryTooShort,

    #[error("Query must be at most {MAX_QUERY_CHARS} characters")]
    QueryTooLong,
}

/// Detected image container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

/// Identify an image container from its leading bytes
pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::Webp),
        _ => None,
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Validate a photo upload
pub fn validate_image(bytes: &[u8], declared_mime: &str) -> Result<(), IntakeRejection> {
    if bytes.is_empty() {
        return Err(IntakeRejection::EmptyImage);
    }

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(IntakeRejection::TooLarge {
            size: bytes.len(),
            limit: MAX_IMAGE_BYTES,
        });
    }

    let mime = normalize_mime(declared_mime);
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(IntakeRejection::UnsupportedType(declared_mime.to_string()));
    }

    if sniff_image_format(bytes).is_none() {
        return Err(IntakeRejection::SignatureMismatch);
    }

    Ok(())
}

/// Validate a free-text query, returning it trimmed
pub fn validate_query(query: &str) -> Result<&str, IntakeRejection> {
    let trimmed = query.trim();
    let chars = trimmed.chars().count();

    if chars < MIN_QUERY_CHARS {
        return Err(IntakeRejection::QueryTooShort);
    }
    if chars > MAX_QUERY_CHARS {
        return Err(IntakeRejection::QueryTooLong);
    }

    Ok(trimmed)
}
