//! Header validation run before any body byte is read.
//!
//! The gate rejects oversized declared lengths, resolves the effective media
//! type (override, then `content-type`, then the configured default, then
//! `application/octet-stream`) and enforces the allow-list.

use http::HeaderValue;
use mime::Mime;
use tracing::debug;

use crate::options::ParseOptions;
use crate::protocol::{ParseRequest, PayloadError};
use crate::utils::ensure;

pub(crate) fn check<B>(request: &ParseRequest<B>, options: &ParseOptions) -> Result<Mime, PayloadError> {
    if let (Some(max_bytes), Some(length)) = (options.max_bytes(), request.content_length()) {
        if length > max_bytes {
            debug!(length, max_bytes, "declared content-length exceeds the limit");
            return Err(PayloadError::too_large(max_bytes));
        }
    }

    let media_type = resolve(request.content_type(), options)?;

    let allow = options.allow();
    if !allow.is_empty() && !allow.iter().any(|allowed| allowed.essence_str() == media_type.essence_str()) {
        debug!(media_type = %media_type, "media type not in the allow list");
        return Err(PayloadError::unsupported_media_type(media_type.essence_str()));
    }

    Ok(media_type)
}

fn resolve(header: Option<&HeaderValue>, options: &ParseOptions) -> Result<Mime, PayloadError> {
    let media_type = match (options.override_content_type(), header, options.default_content_type()) {
        (Some(forced), _, _) => forced.clone(),
        (None, Some(header), _) => parse_header(header)?,
        (None, None, Some(default)) => default.clone(),
        (None, None, None) => mime::APPLICATION_OCTET_STREAM,
    };

    if media_type.type_() == mime::MULTIPART {
        ensure!(
            media_type.get_param(mime::BOUNDARY).is_some_and(|b| !b.as_str().is_empty()),
            PayloadError::invalid_media_type("multipart missing boundary")
        );
    }

    Ok(media_type)
}

fn parse_header(header: &HeaderValue) -> Result<Mime, PayloadError> {
    let value = header.to_str().map_err(|e| PayloadError::invalid_media_type(e.to_string()))?;
    value.trim().parse::<Mime>().map_err(|e| PayloadError::invalid_media_type(format!("{value}: {e}")))
}
