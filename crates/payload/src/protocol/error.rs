use bytes::Bytes;
use http::StatusCode;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Machine readable classification of a [`PayloadError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PayloadTooLarge,
    InvalidMediaType,
    UnsupportedMediaType,
    InvalidCompressedPayload,
    InvalidJson,
    InvalidForm,
    InvalidMultipartPayload,
    Timeout,
    EnvironmentFailure,
    Aborted,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload too large: {reason}")]
    PayloadTooLarge { reason: String },

    #[error("invalid content-type header: {reason}")]
    InvalidMediaType { reason: String },

    #[error("unsupported media type: {media_type}")]
    UnsupportedMediaType { media_type: String },

    #[error("invalid compressed payload: {source}")]
    InvalidCompressedPayload {
        #[source]
        source: io::Error,
    },

    #[error("invalid request payload JSON format: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        raw: Bytes,
    },

    #[error("invalid request payload form format: {reason}")]
    InvalidForm { reason: String },

    #[error("invalid multipart payload format: {reason}")]
    InvalidMultipartPayload { reason: String },

    #[error("request payload timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("{reason}: {source}")]
    EnvironmentFailure {
        reason: String,
        #[source]
        source: io::Error,
    },

    #[error("client connection aborted: {reason}")]
    Aborted { reason: String },
}

impl PayloadError {
    pub fn too_large(max_bytes: u64) -> Self {
        Self::PayloadTooLarge { reason: format!("payload content length greater than maximum allowed: {max_bytes}") }
    }

    pub fn too_many_parts(max_parts: usize) -> Self {
        Self::PayloadTooLarge { reason: format!("maximum parts exceeded: {max_parts}") }
    }

    pub fn invalid_media_type<S: ToString>(str: S) -> Self {
        Self::InvalidMediaType { reason: str.to_string() }
    }

    pub fn unsupported_media_type<S: ToString>(media_type: S) -> Self {
        Self::UnsupportedMediaType { media_type: media_type.to_string() }
    }

    pub fn invalid_compressed<E: Into<io::Error>>(e: E) -> Self {
        Self::InvalidCompressedPayload { source: e.into() }
    }

    pub fn invalid_json(source: serde_json::Error, raw: Bytes) -> Self {
        Self::InvalidJson { source, raw }
    }

    pub fn invalid_form<S: ToString>(str: S) -> Self {
        Self::InvalidForm { reason: str.to_string() }
    }

    pub fn invalid_multipart<S: ToString>(str: S) -> Self {
        Self::InvalidMultipartPayload { reason: str.to_string() }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    pub fn environment<S: ToString>(reason: S, source: io::Error) -> Self {
        Self::EnvironmentFailure { reason: reason.to_string(), source }
    }

    pub fn aborted<S: ToString>(str: S) -> Self {
        Self::Aborted { reason: str.to_string() }
    }

    /// Classifies a failure raised by the transport body.
    ///
    /// A `PayloadError` travelling through a boxed error keeps its kind, anything else means the
    /// body could no longer be read from the client.
    pub fn from_body_error(e: Box<dyn StdError + Send + Sync>) -> Self {
        match e.downcast::<PayloadError>() {
            Ok(payload_error) => *payload_error,
            Err(e) => Self::aborted(e),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::InvalidMediaType { .. } => ErrorKind::InvalidMediaType,
            Self::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            Self::InvalidCompressedPayload { .. } => ErrorKind::InvalidCompressedPayload,
            Self::InvalidJson { .. } => ErrorKind::InvalidJson,
            Self::InvalidForm { .. } => ErrorKind::InvalidForm,
            Self::InvalidMultipartPayload { .. } => ErrorKind::InvalidMultipartPayload,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::EnvironmentFailure { .. } => ErrorKind::EnvironmentFailure,
            Self::Aborted { .. } => ErrorKind::Aborted,
        }
    }

    /// The HTTP status a server should answer with.
    ///
    /// `Aborted` maps to `400`, although the client is usually gone by the time it is reported.
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::EnvironmentFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidMediaType
            | ErrorKind::InvalidCompressedPayload
            | ErrorKind::InvalidJson
            | ErrorKind::InvalidForm
            | ErrorKind::InvalidMultipartPayload
            | ErrorKind::Aborted => StatusCode::BAD_REQUEST,
        }
    }

    /// The undecodable bytes attached to an `InvalidJson` failure.
    pub fn raw(&self) -> Option<&Bytes> {
        match self {
            Self::InvalidJson { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
