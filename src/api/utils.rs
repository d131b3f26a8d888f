//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from the
//! handlers so they can be unit tested.

use axum::http::{HeaderMap, header};

use crate::api::error::ApiError;

/// Header carrying the original name of the uploaded file
pub const FILE_NAME_HEADER: &str = "x-import-file-name";

/// Parses the Content-Type header and requires a CSV media type
///
/// Accepts any `*/csv` type (`text/csv`, `application/csv`) with or without
/// parameters.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::UnsupportedMediaType(format!("invalid Content-Type: {content_type}")))?;

    if media_type.subtype() != mime::CSV {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Only CSV files are supported, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Rejects empty bodies and bodies above `max_size`
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.is_empty() {
        return Err(ApiError::InvalidPayload("No file uploaded".to_string()));
    }
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Token from `Authorization: Bearer <token>`, if well-formed
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Uploaded file name: non-empty, no path components
pub fn file_name(headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("X-Import-File-Name header is required".to_string()))?;

    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    if name.is_empty() || name == "." || name == ".." {
        return Err(ApiError::InvalidPayload(format!("invalid file name: {raw}")));
    }
    Ok(name.to_string())
}
