//! `multipart/form-data` aggregation.
//!
//! The [`MultipartScanner`] turns the body into [`ScanEvent`]s. Fields are
//! stored as they arrive; parts are materialized concurrently according to
//! the part output and tracked as pending until they settle. Every event is
//! numbered on arrival and the [`Aggregate`] is assembled in that order once
//! the scanner closed and no part is pending, so a slow upload never reorders
//! the values of a name.
//!
//! On failure the pending parts are dropped, which removes their partial
//! files, and the files of settled parts are removed before the error is
//! reported.

mod aggregate;
pub use aggregate::Aggregate;
pub use aggregate::Entry;
pub use aggregate::PartValue;

mod scanner;
#[cfg(test)]
pub(crate) use scanner::MockMultipartScanner;
pub use scanner::MulterScanner;
pub use scanner::MultipartScanner;
pub use scanner::Part;
pub use scanner::ScanEvent;
pub use scanner::ScanLimits;
pub use scanner::ScanStream;

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use mime::Mime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{decode_value, read_to_limit};
use crate::file::write_file;
use crate::options::{ParseOptions, PartOutput};
use crate::protocol::body::once;
use crate::protocol::{ErrorKind, PayloadBody, PayloadError, Value};
use crate::utils::ensure;

/// Scans `source` and collects its fields and parts.
pub(crate) async fn aggregate(
    source: PayloadBody,
    media_type: &Mime,
    options: &ParseOptions,
    aborted: Option<&CancellationToken>,
) -> Result<Aggregate, PayloadError> {
    let boundary = media_type
        .get_param(mime::BOUNDARY)
        .ok_or_else(|| PayloadError::invalid_media_type("missing multipart boundary"))?;

    let limits = ScanLimits { max_bytes: options.max_bytes() };
    let events = options.scanner().scan(source, boundary.as_str(), limits);

    Aggregator::new(options, aborted).run(events).await
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AggregatorState {
    /// No event seen yet.
    Idle,
    Active,
    /// The scanner closed, parts are still pending.
    Closing,
    Finalized,
    Failed,
}

#[derive(Debug)]
struct PendingPart {
    name: String,
    filename: Option<String>,
}

type Settlement<'a> = BoxFuture<'a, (u64, Result<PartValue, PayloadError>)>;

struct Aggregator<'a> {
    options: &'a ParseOptions,
    aborted: Option<&'a CancellationToken>,
    state: AggregatorState,
    next_id: u64,
    settled: BTreeMap<u64, (String, PartValue)>,
    pending: BTreeMap<u64, PendingPart>,
    in_flight: FuturesUnordered<Settlement<'a>>,
}

impl<'a> Aggregator<'a> {
    fn new(options: &'a ParseOptions, aborted: Option<&'a CancellationToken>) -> Self {
        Self {
            options,
            aborted,
            state: AggregatorState::Idle,
            next_id: 0,
            settled: BTreeMap::new(),
            pending: BTreeMap::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    async fn run(mut self, mut events: ScanStream) -> Result<Aggregate, PayloadError> {
        match self.drive(&mut events).await {
            Ok(()) => {
                self.transition(AggregatorState::Finalized);
                Ok(self.finalize())
            }
            Err(e) => {
                self.transition(AggregatorState::Failed);
                warn!(cause = %e, pending = self.pending.len(), "multipart payload failed");
                // dropping the aggregator removes every partial and settled file
                drop(self);
                Err(classify(e))
            }
        }
    }

    async fn drive(&mut self, events: &mut ScanStream) -> Result<(), PayloadError> {
        loop {
            tokio::select! {
                biased;

                Some((id, result)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.settle(id, result)?;
                }
                event = events.next(), if self.state != AggregatorState::Closing => match event {
                    Some(event) => self.on_event(event?)?,
                    None => self.close(),
                },
                else => return Ok(()),
            }
        }
    }

    fn on_event(&mut self, event: ScanEvent) -> Result<(), PayloadError> {
        if self.state == AggregatorState::Idle {
            self.transition(AggregatorState::Active);
        }

        if let Some(max_parts) = self.options.max_parts() {
            ensure!(self.next_id < max_parts as u64, PayloadError::too_many_parts(max_parts));
        }

        let id = self.next_id;
        self.next_id += 1;

        match event {
            ScanEvent::Field { name, value } => {
                trace!(id, name = %name, "multipart field");
                self.settled.insert(id, (name, PartValue::Field(value)));
            }
            ScanEvent::Part(part) => {
                debug!(id, name = %part.name, filename = ?part.filename, "multipart part started");
                self.pending.insert(id, PendingPart { name: part.name.clone(), filename: part.filename.clone() });

                let settlement = materialize(part, self.options, self.aborted).map(move |result| (id, result));
                self.in_flight.push(settlement.boxed());
            }
        }
        Ok(())
    }

    fn settle(&mut self, id: u64, result: Result<PartValue, PayloadError>) -> Result<(), PayloadError> {
        let Some(PendingPart { name, filename }) = self.pending.remove(&id) else {
            return Err(PayloadError::invalid_multipart(format!("settled an unknown part {id}")));
        };

        let value = result.inspect_err(|e| debug!(id, name = %name, cause = %e, "multipart part failed"))?;
        debug!(id, name = %name, filename = ?filename, pending = self.pending.len(), "multipart part settled");
        self.settled.insert(id, (name, value));
        Ok(())
    }

    fn close(&mut self) {
        debug!(events = self.next_id, pending = self.pending.len(), "multipart scanner closed");
        self.transition(AggregatorState::Closing);
    }

    fn finalize(&mut self) -> Aggregate {
        let mut aggregate = Aggregate::default();
        for (name, value) in std::mem::take(&mut self.settled).into_values() {
            aggregate.insert(name, value);
        }
        aggregate
    }

    fn transition(&mut self, state: AggregatorState) {
        trace!(from = ?self.state, to = ?state, "multipart aggregator transition");
        self.state = state;
    }
}

impl Drop for Aggregator<'_> {
    fn drop(&mut self) {
        // partial files go with their write futures
        self.in_flight.clear();

        for (_, value) in std::mem::take(&mut self.settled).into_values() {
            if let PartValue::File { file, .. } = value {
                debug!(path = %file.path.display(), "removing multipart upload file");
                if let Err(e) = std::fs::remove_file(&file.path) {
                    warn!(cause = %e, path = %file.path.display(), "failed to remove multipart upload file");
                }
            }
        }
    }
}

async fn materialize(
    part: Part,
    options: &ParseOptions,
    aborted: Option<&CancellationToken>,
) -> Result<PartValue, PayloadError> {
    let Part { filename, headers, body, .. } = part;

    let value = match options.part_output() {
        PartOutput::File => {
            let file = write_file(body, options.uploads(), options.max_bytes(), aborted).await?;
            PartValue::File { filename, headers, file }
        }
        PartOutput::Stream => {
            let bytes = read_to_limit(body, options.max_bytes()).await?;
            PartValue::Stream { filename, headers, body: once(bytes) }
        }
        PartOutput::Data => {
            let bytes = read_to_limit(body, options.max_bytes()).await?;
            PartValue::Data(decode_part(bytes, &headers, options))
        }
        PartOutput::Annotated => {
            let bytes = read_to_limit(body, options.max_bytes()).await?;
            let payload = decode_part(bytes, &headers, options);
            PartValue::Annotated { filename, headers, payload }
        }
    };
    Ok(value)
}

/// Decodes a part declaring a content type, keeping the raw bytes when that fails.
fn decode_part(bytes: Bytes, headers: &HeaderMap, options: &ParseOptions) -> Value {
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok());

    match media_type {
        Some(media_type) if !bytes.is_empty() => decode_value(bytes.clone(), &media_type, options)
            .unwrap_or_else(|e| {
                trace!(cause = %e, "keeping the raw part bytes");
                Value::Binary(bytes)
            }),
        _ => Value::Binary(bytes),
    }
}

fn classify(e: PayloadError) -> PayloadError {
    match e.kind() {
        ErrorKind::PayloadTooLarge
        | ErrorKind::Timeout
        | ErrorKind::Aborted
        | ErrorKind::EnvironmentFailure
        | ErrorKind::InvalidMultipartPayload => e,
        _ => PayloadError::invalid_multipart(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{MultipartOptions, Output, ParseMode};
    use http::HeaderValue;
    use http_body::Frame;
    use http_body_util::{BodyExt, StreamBody};
    use serde_json::json;
    use std::io;
    use std::time::Duration;

    fn media_type() -> Mime {
        "multipart/form-data; boundary=AaB03x".parse().unwrap()
    }

    fn field(name: &str, value: &str) -> Result<ScanEvent, PayloadError> {
        Ok(ScanEvent::Field { name: name.into(), value: value.into() })
    }

    fn part(name: &str, content_type: Option<&'static str>, body: PayloadBody) -> Result<ScanEvent, PayloadError> {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        Ok(ScanEvent::Part(Part { name: name.into(), filename: Some(format!("{name}.bin")), headers, body }))
    }

    fn scanning(events: Vec<Result<ScanEvent, PayloadError>>) -> MockMultipartScanner {
        let mut scanner = MockMultipartScanner::new();
        scanner
            .expect_scan()
            .withf(|_, boundary, _| boundary == "AaB03x")
            .times(1)
            .return_once(move |_, _, _| futures::stream::iter(events).boxed());
        scanner
    }

    /// A body yielding `content` after `delay`.
    fn slow(content: &'static [u8], delay: Duration) -> PayloadBody {
        let stream = futures::stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok::<_, PayloadError>(Frame::data(Bytes::from_static(content)))
        });
        StreamBody::new(stream).boxed_unsync()
    }

    async fn run(options: &ParseOptions) -> Result<Aggregate, PayloadError> {
        aggregate(once(Bytes::new()), &media_type(), options, None).await
    }

    #[tokio::test]
    async fn arrival_order_survives_slow_parts() {
        let events = vec![
            field("x", "1"),
            part("x", Some("text/plain"), slow(b"two", Duration::from_millis(20))),
            field("x", "3"),
            field("y", "a"),
        ];
        let options = ParseOptions::builder(ParseMode::On, Output::Data).scanner(scanning(events)).build();

        let aggregate = run(&options).await.unwrap();

        let names: Vec<_> = aggregate.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["x", "y"]);

        let x = aggregate.get("x").unwrap().values();
        assert_eq!(x.len(), 3);
        assert_eq!(x[0].as_field(), Some("1"));
        assert_eq!(x[1].as_data(), Some(&Value::Text("two".into())));
        assert_eq!(x[2].as_field(), Some("3"));
    }

    #[tokio::test]
    async fn part_decoding_falls_back_to_raw_bytes() {
        let events = vec![
            part("json", Some("application/json"), once(Bytes::from_static(br#"{"a":1}"#))),
            part("broken", Some("application/json"), once(Bytes::from_static(b"{"))),
            part("untyped", None, once(Bytes::from_static(b"abc"))),
            part("empty", Some("application/json"), once(Bytes::new())),
        ];
        let options = ParseOptions::builder(ParseMode::On, Output::Data).scanner(scanning(events)).build();

        let aggregate = run(&options).await.unwrap();

        let data = |name: &str| aggregate.get(name).and_then(Entry::first).and_then(PartValue::as_data).cloned();
        assert_eq!(data("json"), Some(Value::Json(json!({"a": 1}))));
        assert_eq!(data("broken"), Some(Value::Binary(Bytes::from_static(b"{"))));
        assert_eq!(data("untyped"), Some(Value::Binary(Bytes::from_static(b"abc"))));
        assert_eq!(data("empty"), Some(Value::Binary(Bytes::new())));
    }

    #[tokio::test]
    async fn annotated_and_stream_parts_keep_their_metadata() {
        let events = vec![part("a", Some("text/plain"), once(Bytes::from_static(b"hi")))];
        let options = ParseOptions::builder(ParseMode::On, Output::Data)
            .multipart(MultipartOptions::with_output(PartOutput::Annotated))
            .scanner(scanning(events))
            .build();

        let aggregate = run(&options).await.unwrap();
        let Some(Entry::Single(PartValue::Annotated { filename, headers, payload })) = aggregate.get("a") else {
            panic!("expected an annotated part");
        };
        assert_eq!(filename.as_deref(), Some("a.bin"));
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(payload, &Value::Text("hi".into()));

        let events = vec![part("s", None, once(Bytes::from_static(b"streamed")))];
        let options = ParseOptions::builder(ParseMode::On, Output::Stream).scanner(scanning(events)).build();

        let mut aggregate = run(&options).await.unwrap().into_iter();
        let Some((_, Entry::Single(PartValue::Stream { body, .. }))) = aggregate.next() else {
            panic!("expected a stream part");
        };
        assert_eq!(body.collect().await.unwrap().to_bytes(), Bytes::from_static(b"streamed"));
    }

    #[tokio::test]
    async fn close_waits_for_pending_files() {
        let dir = tempfile::tempdir().unwrap();
        let events = vec![part("upload", None, slow(b"late bytes", Duration::from_millis(30)))];
        let options =
            ParseOptions::builder(ParseMode::On, Output::File).uploads(dir.path()).scanner(scanning(events)).build();

        let aggregate = run(&options).await.unwrap();

        let file = aggregate.get("upload").and_then(Entry::first).and_then(PartValue::as_file).unwrap();
        assert_eq!(file.bytes, 10);
        assert_eq!(std::fs::read(&file.path).unwrap(), b"late bytes");
    }

    #[tokio::test]
    async fn too_many_parts() {
        let events = vec![field("a", "1"), field("b", "2"), field("c", "3")];
        let options =
            ParseOptions::builder(ParseMode::On, Output::Data).max_parts(2).scanner(scanning(events)).build();

        let error = run(&options).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PayloadTooLarge);
    }

    #[tokio::test]
    async fn failure_removes_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let events = vec![
            part("first", None, once(Bytes::from_static(b"complete"))),
            part("second", None, slow(b"never written", Duration::from_secs(10))),
            Err(PayloadError::invalid_multipart("unexpected end of stream")),
        ];
        let options =
            ParseOptions::builder(ParseMode::On, Output::File).uploads(dir.path()).scanner(scanning(events)).build();

        let error = run(&options).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InvalidMultipartPayload);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn part_failures_are_classified() {
        let failing = |e: PayloadError| {
            let stream = futures::stream::iter(vec![Err::<Frame<Bytes>, _>(e)]);
            StreamBody::new(stream).boxed_unsync()
        };

        let events = vec![part("a", None, failing(PayloadError::invalid_compressed(io::Error::other("bad block"))))];
        let options = ParseOptions::builder(ParseMode::On, Output::Data).scanner(scanning(events)).build();
        assert_eq!(run(&options).await.unwrap_err().kind(), ErrorKind::InvalidMultipartPayload);

        let events = vec![part("a", None, failing(PayloadError::aborted("connection reset")))];
        let options = ParseOptions::builder(ParseMode::On, Output::Data).scanner(scanning(events)).build();
        assert_eq!(run(&options).await.unwrap_err().kind(), ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn part_limit_keeps_its_kind() {
        let events = vec![part("big", None, once(Bytes::from_static(b"0123456789")))];
        let options =
            ParseOptions::builder(ParseMode::On, Output::Data).max_bytes(4).scanner(scanning(events)).build();

        assert_eq!(run(&options).await.unwrap_err().kind(), ErrorKind::PayloadTooLarge);
    }
}
