//! The request view consumed by a parse.
//!
//! Only three headers matter to the parser: `content-length`, `content-type`
//! and `content-encoding`. The body is any [`http_body::Body`] producing
//! [`bytes::Bytes`]; the optional abort token lets the transport signal that
//! the client disconnected while a file was being written.

use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Request};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct ParseRequest<B> {
    headers: HeaderMap,
    body: B,
    aborted: Option<CancellationToken>,
}

impl<B> ParseRequest<B> {
    pub fn new(headers: HeaderMap, body: B) -> Self {
        Self { headers, body, aborted: None }
    }

    /// Attaches the token cancelled by the transport when the client goes away.
    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.aborted = Some(token);
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The declared `content-length`, `None` when absent or not a number.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }

    /// The `content-encoding` token, trimmed and lower-cased.
    pub fn content_encoding(&self) -> Option<String> {
        let value = self.headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        Some(value.trim().to_ascii_lowercase())
    }

    pub fn abort_signal(&self) -> Option<&CancellationToken> {
        self.aborted.as_ref()
    }

    pub(crate) fn into_parts(self) -> (HeaderMap, B, Option<CancellationToken>) {
        (self.headers, self.body, self.aborted)
    }
}

impl<B> From<Request<B>> for ParseRequest<B> {
    fn from(request: Request<B>) -> Self {
        let (Parts { headers, .. }, body) = request.into_parts();
        Self::new(headers, body)
    }
}
