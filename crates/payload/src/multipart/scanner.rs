use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use tracing::trace;

use crate::protocol::{PayloadBody, PayloadError};

/// Chunks a part may run ahead of its consumer before the scanner waits.
const PART_BUFFER: usize = 8;

/// What the scanner found in the multipart stream.
///
/// The end of the event stream is the close event, an `Err` item is terminal.
#[derive(Debug)]
pub enum ScanEvent {
    /// A part without a filename, read as text.
    Field { name: String, value: String },
    /// A part carrying a filename, its bytes still flowing.
    Part(Part),
}

pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub headers: HeaderMap,
    pub body: PayloadBody,
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ScanLimits {
    /// Cap on the whole multipart stream, boundaries and headers included.
    pub max_bytes: Option<u64>,
}

pub type ScanStream = BoxStream<'static, Result<ScanEvent, PayloadError>>;

/// Turns a multipart byte stream into [`ScanEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait MultipartScanner: Send + Sync {
    fn scan(&self, source: PayloadBody, boundary: &str, limits: ScanLimits) -> ScanStream;
}

/// The scanner backed by [`multer`].
///
/// `multer` hands out one field at a time, so the bytes of a part are pumped
/// into a bounded channel whenever the event stream is polled. A consumer has
/// to keep polling the event stream while it reads a part body.
#[derive(Debug, Copy, Clone, Default)]
pub struct MulterScanner;

impl MultipartScanner for MulterScanner {
    fn scan(&self, source: PayloadBody, boundary: &str, limits: ScanLimits) -> ScanStream {
        let mut constraints = multer::Constraints::new();
        if let Some(max_bytes) = limits.max_bytes {
            constraints = constraints.size_limit(multer::SizeLimit::new().whole_stream(max_bytes));
        }

        let multipart = multer::Multipart::with_constraints(source.into_data_stream(), boundary, constraints);
        let pump = Pump { multipart, current: None };

        futures::stream::unfold(Some(pump), |pump| async move {
            let mut pump = pump?;
            match pump.advance().await {
                Ok(Some(event)) => Some((Ok(event), Some(pump))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

struct Pump {
    multipart: multer::Multipart<'static>,
    current: Option<(multer::Field<'static>, mpsc::Sender<Bytes>)>,
}

impl Pump {
    async fn advance(&mut self) -> Result<Option<ScanEvent>, PayloadError> {
        if let Some((mut field, mut sender)) = self.current.take() {
            while let Some(chunk) = field.chunk().await.map_err(into_payload_error)? {
                if sender.send(chunk).await.is_err() {
                    // the consumer dropped the part, multer skips the rest
                    trace!("part body dropped before its end");
                    break;
                }
            }
        }

        let Some(field) = self.multipart.next_field().await.map_err(into_payload_error)? else {
            return Ok(None);
        };

        let name = field.name().unwrap_or_default().to_string();
        let Some(filename) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(into_payload_error)?;
            return Ok(Some(ScanEvent::Field { name, value }));
        };

        let headers = field.headers().clone();
        let (sender, receiver) = mpsc::channel(PART_BUFFER);
        self.current = Some((field, sender));

        let body = StreamBody::new(receiver.map(|chunk| Ok::<_, PayloadError>(Frame::data(chunk)))).boxed_unsync();
        Ok(Some(ScanEvent::Part(Part { name, filename: Some(filename), headers, body })))
    }
}

fn into_payload_error(e: multer::Error) -> PayloadError {
    match e {
        multer::Error::StreamSizeExceeded { limit } => PayloadError::too_large(limit),
        multer::Error::StreamReadFailed(e) => PayloadError::from_body_error(e),
        e => PayloadError::invalid_multipart(e),
    }
}
