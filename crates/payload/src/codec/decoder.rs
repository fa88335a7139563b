use std::collections::HashMap;
use std::fmt;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use flate2::write::{GzDecoder, MultiGzDecoder, ZlibDecoder};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};
use zstd::stream::write::Decoder as ZstdDecoder;

use crate::options::ParseOptions;
use crate::protocol::{PayloadBody, PayloadError};

/// Tuning knobs passed to a decoder factory, configured per encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderOptions {
    /// Accept concatenated gzip members.
    pub multi_member: bool,
    /// Internal buffer size of the brotli decoder.
    pub buffer_size: Option<usize>,
    /// Largest back-reference window accepted by the zstd decoder, as a power of two.
    pub window_log_max: Option<u32>,
}

/// A push based decompressor: compressed bytes are written in, plain bytes are taken out.
pub trait Decompress: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Takes the bytes decompressed so far.
    fn take(&mut self) -> Bytes;

    /// Caps the total decompressed output, writes past it fail with [`OutputLimitExceeded`].
    ///
    /// Decoders that ignore the cap are still stopped once their output is taken.
    fn limit(&mut self, _max_bytes: u64) {}

    /// Flushes the tail of the stream, failing when it is truncated.
    fn finish(self: Box<Self>) -> io::Result<Bytes>;
}

pub type DecoderFactory = Arc<dyn Fn(Option<&DecoderOptions>) -> io::Result<Box<dyn Decompress>> + Send + Sync>;

/// The decoders shipped with the crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Builtin {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl Builtin {
    fn factory(self) -> DecoderFactory {
        Arc::new(move |options: Option<&DecoderOptions>| {
            let options = options.cloned().unwrap_or_default();
            let decoder = match self {
                Builtin::Gzip => Decoder::gzip(&options),
                Builtin::Deflate => Decoder::deflate(),
                Builtin::Brotli => Decoder::br(&options),
                Builtin::Zstd => Decoder::zstd(&options)?,
            };
            Ok(Box::new(decoder) as Box<dyn Decompress>)
        })
    }
}

/// The registry mapping a `content-encoding` token to its decoder.
///
/// The default registry knows `gzip`, `x-gzip` and `deflate`.
#[derive(Clone)]
pub struct Decoders {
    factories: HashMap<String, DecoderFactory>,
}

impl Decoders {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registers `factory` for `encoding`, replacing any previous entry.
    pub fn with<F>(mut self, encoding: &str, factory: F) -> Self
    where
        F: Fn(Option<&DecoderOptions>) -> io::Result<Box<dyn Decompress>> + Send + Sync + 'static,
    {
        self.factories.insert(encoding.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn with_builtin(mut self, encoding: &str, builtin: Builtin) -> Self {
        self.factories.insert(encoding.to_ascii_lowercase(), builtin.factory());
        self
    }

    pub fn get(&self, encoding: &str) -> Option<&DecoderFactory> {
        self.factories.get(encoding)
    }
}

impl Default for Decoders {
    fn default() -> Self {
        Self::empty()
            .with_builtin("gzip", Builtin::Gzip)
            .with_builtin("x-gzip", Builtin::Gzip)
            .with_builtin("deflate", Builtin::Deflate)
    }
}

impl fmt::Debug for Decoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_tuple("Decoders").field(&names).finish()
    }
}

/// The decompressed output would pass the configured `max_bytes`.
#[derive(Debug, Error)]
#[error("decompressed payload exceeds the limit of {max_bytes} bytes")]
pub struct OutputLimitExceeded {
    pub max_bytes: u64,
}

impl OutputLimitExceeded {
    fn find(error: &io::Error) -> Option<&Self> {
        error.get_ref().and_then(|inner| inner.downcast_ref::<Self>())
    }
}

// collects the output of the write side decoders
struct Writer {
    buf: BytesMut,
    written: u64,
    max_bytes: Option<u64>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096), written: 0, max_bytes: None }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.written + buf.len() as u64;
        if let Some(max_bytes) = self.max_bytes.filter(|&max_bytes| written > max_bytes) {
            return Err(io::Error::other(OutputLimitExceeded { max_bytes }));
        }

        self.written = written;
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Decoder {
    Gzip(GzDecoder<Writer>),
    MultiGzip(MultiGzDecoder<Writer>),
    Deflate(ZlibDecoder<Writer>),
    Zstd(ZstdDecoder<'static, Writer>),
    Br(Box<brotli::DecompressorWriter<Writer>>),
}

impl Decoder {
    fn gzip(options: &DecoderOptions) -> Self {
        if options.multi_member {
            Self::MultiGzip(MultiGzDecoder::new(Writer::new()))
        } else {
            Self::Gzip(GzDecoder::new(Writer::new()))
        }
    }

    fn deflate() -> Self {
        Self::Deflate(ZlibDecoder::new(Writer::new()))
    }

    fn zstd(options: &DecoderOptions) -> io::Result<Self> {
        let mut decoder = ZstdDecoder::new(Writer::new())?;
        if let Some(window_log_max) = options.window_log_max {
            decoder.window_log_max(window_log_max)?;
        }
        Ok(Self::Zstd(decoder))
    }

    fn br(options: &DecoderOptions) -> Self {
        // 32 KiB unless configured
        let buffer_size = options.buffer_size.unwrap_or(32 * 1024);
        Self::Br(Box::new(brotli::DecompressorWriter::new(Writer::new(), buffer_size)))
    }
}

impl Decompress for Decoder {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(decoder) => decoder.write_all(data),
            Self::MultiGzip(decoder) => decoder.write_all(data),
            Self::Deflate(decoder) => decoder.write_all(data),
            Self::Zstd(decoder) => decoder.write_all(data).and_then(|()| decoder.flush()),
            Self::Br(decoder) => decoder.write_all(data),
        };

        if let Err(e) = &result {
            trace!("error decoding payload: {}", e);
        }
        result
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(decoder) => decoder.get_mut().take(),
            Self::MultiGzip(decoder) => decoder.get_mut().take(),
            Self::Deflate(decoder) => decoder.get_mut().take(),
            Self::Zstd(decoder) => decoder.get_mut().take(),
            Self::Br(decoder) => decoder.get_mut().take(),
        }
    }

    fn limit(&mut self, max_bytes: u64) {
        let writer = match self {
            Self::Gzip(decoder) => decoder.get_mut(),
            Self::MultiGzip(decoder) => decoder.get_mut(),
            Self::Deflate(decoder) => decoder.get_mut(),
            Self::Zstd(decoder) => decoder.get_mut(),
            Self::Br(decoder) => decoder.get_mut(),
        };
        writer.max_bytes = Some(max_bytes);
    }

    fn finish(self: Box<Self>) -> io::Result<Bytes> {
        match *self {
            Self::Gzip(decoder) => decoder.finish().map(|writer| writer.buf.freeze()),
            Self::MultiGzip(decoder) => decoder.finish().map(|writer| writer.buf.freeze()),
            Self::Deflate(decoder) => decoder.finish().map(|writer| writer.buf.freeze()),
            Self::Zstd(mut decoder) => {
                decoder.flush()?;
                Ok(decoder.into_inner().buf.freeze())
            }
            Self::Br(mut decoder) => {
                decoder.flush()?;
                match decoder.into_inner() {
                    Ok(writer) => Ok(writer.buf.freeze()),
                    Err(_) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete brotli stream")),
                }
            }
        }
    }
}

pin_project! {
    /// A body stage decompressing every data frame of the inner body.
    ///
    /// The stage fails with `PayloadTooLarge` as soon as the decompressed total passes `max_bytes`.
    pub(crate) struct DecodedBody<B> {
        #[pin]
        inner: B,
        decoder: Option<Box<dyn Decompress>>,
        decoded: u64,
        max_bytes: Option<u64>,
    }
}

impl<B> DecodedBody<B> {
    pub(crate) fn new(inner: B, mut decoder: Box<dyn Decompress>, max_bytes: Option<u64>) -> Self {
        if let Some(max_bytes) = max_bytes {
            decoder.limit(max_bytes);
        }
        Self { inner, decoder: Some(decoder), decoded: 0, max_bytes }
    }
}

fn decode_error(error: io::Error) -> PayloadError {
    match OutputLimitExceeded::find(&error) {
        Some(exceeded) => PayloadError::too_large(exceeded.max_bytes),
        None => PayloadError::invalid_compressed(error),
    }
}

// counts the bytes handed out, for decoders that do not honor the cap themselves
fn check_output(decoded: &mut u64, max_bytes: Option<u64>, bytes: &Bytes) -> Result<(), PayloadError> {
    *decoded += bytes.len() as u64;
    match max_bytes {
        Some(max_bytes) if *decoded > max_bytes => Err(PayloadError::too_large(max_bytes)),
        _ => Ok(()),
    }
}

impl<B> Body for DecodedBody<B>
where
    B: Body<Data = Bytes, Error = PayloadError>,
{
    type Data = Bytes;
    type Error = PayloadError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            // the decoder is gone once the stream finished or failed
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            return match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        // trailers carry nothing to decode
                        continue;
                    };

                    if let Err(e) = decoder.write(&data) {
                        this.decoder.take();
                        let error = decode_error(e);
                        debug!(cause = %error, "decoding payload failed");
                        return Poll::Ready(Some(Err(error)));
                    }

                    let bytes = decoder.take();
                    if let Err(e) = check_output(this.decoded, *this.max_bytes, &bytes) {
                        this.decoder.take();
                        return Poll::Ready(Some(Err(e)));
                    }
                    if bytes.is_empty() {
                        continue;
                    }
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Some(Err(e)) => {
                    this.decoder.take();
                    Poll::Ready(Some(Err(e)))
                }
                None => match this.decoder.take().map(|decoder| decoder.finish()) {
                    Some(Ok(bytes)) => match check_output(this.decoded, *this.max_bytes, &bytes) {
                        Err(e) => Poll::Ready(Some(Err(e))),
                        Ok(()) if bytes.is_empty() => Poll::Ready(None),
                        Ok(()) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    },
                    Some(Err(e)) => Poll::Ready(Some(Err(decode_error(e)))),
                    None => Poll::Ready(None),
                },
            };
        }
    }

    fn is_end_stream(&self) -> bool {
        self.decoder.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        // the decoded length is unknown whatever the inner body says
        SizeHint::default()
    }
}

/// Splices the decoder registered for `encoding` in front of `body`.
///
/// Unknown encodings, and requests without one, pass through untouched.
pub(crate) fn decode(body: PayloadBody, encoding: Option<&str>, options: &ParseOptions) -> Result<PayloadBody, PayloadError> {
    let Some(encoding) = encoding else {
        return Ok(body);
    };

    let Some(factory) = options.decoders().get(encoding) else {
        debug!(encoding, "no decoder registered, passing payload through");
        return Ok(body);
    };

    let decoder = factory(options.compression(encoding)).map_err(PayloadError::invalid_compressed)?;
    debug!(encoding, "decoding payload");
    Ok(DecodedBody::new(body, decoder, options.max_bytes()).boxed_unsync())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Output, ParseMode};
    use crate::protocol::ErrorKind;
    use crate::protocol::body::once;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use futures::StreamExt;
    use http_body_util::StreamBody;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn split(data: Vec<u8>, size: usize) -> PayloadBody {
        let chunks: Vec<Bytes> = data.chunks(size).map(Bytes::copy_from_slice).collect();
        StreamBody::new(futures::stream::iter(chunks).map(|c| Ok(Frame::data(c)))).boxed_unsync()
    }

    fn options() -> ParseOptions {
        ParseOptions::builder(ParseMode::On, Output::Data).build()
    }

    #[tokio::test]
    async fn gzip_round_trip_across_chunks() {
        let source = "the quick brown fox jumps over the lazy dog ".repeat(200);
        let body = decode(split(gzip(source.as_bytes()), 7), Some("gzip"), &options()).unwrap();

        let decoded = body.collect().await.unwrap().to_bytes();
        assert_eq!(decoded, source.as_bytes());
    }

    #[tokio::test]
    async fn deflate_round_trip() {
        let source = b"{\"hello\":\"world\"}";
        let body = decode(once(Bytes::from(zlib(source))), Some("deflate"), &options()).unwrap();

        let decoded = body.collect().await.unwrap().to_bytes();
        assert_eq!(&decoded[..], source);
    }

    #[tokio::test]
    async fn zstd_and_brotli_can_be_registered() {
        let source = b"registered decoders".repeat(10);
        let decoders = Decoders::default().with_builtin("zstd", Builtin::Zstd).with_builtin("br", Builtin::Brotli);
        let options = ParseOptions::builder(ParseMode::On, Output::Data).decoders(decoders).build();

        let compressed = zstd::stream::encode_all(&source[..], 3).unwrap();
        let body = decode(once(Bytes::from(compressed)), Some("zstd"), &options).unwrap();
        assert_eq!(body.collect().await.unwrap().to_bytes(), source);

        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(&source).unwrap();
        }
        let body = decode(once(Bytes::from(compressed)), Some("br"), &options).unwrap();
        assert_eq!(body.collect().await.unwrap().to_bytes(), source);
    }

    #[tokio::test]
    async fn corrupt_payload_is_invalid_compressed() {
        let body = decode(once(Bytes::from_static(b"definitely not gzip")), Some("gzip"), &options()).unwrap();

        let error = body.collect().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidCompressedPayload);
        assert_eq!(error.status(), http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_encoding_passes_through() {
        let body = decode(once(Bytes::from_static(b"plain")), Some("compress"), &options()).unwrap();
        assert_eq!(body.collect().await.unwrap().to_bytes(), Bytes::from_static(b"plain"));
    }

    #[tokio::test]
    async fn multi_member_gzip_needs_option() {
        let mut data = gzip(b"first ");
        data.extend(gzip(b"second"));

        let options = ParseOptions::builder(ParseMode::On, Output::Data)
            .compression("gzip", DecoderOptions { multi_member: true, ..DecoderOptions::default() })
            .build();
        let body = decode(once(Bytes::from(data)), Some("gzip"), &options).unwrap();
        assert_eq!(body.collect().await.unwrap().to_bytes(), Bytes::from_static(b"first second"));
    }

    #[tokio::test]
    async fn decompressed_output_is_capped() {
        // 8 MiB of zeros shrink to a few KiB
        let bomb = gzip(&vec![0; 8 * 1024 * 1024]);
        assert!(bomb.len() < 64 * 1024);

        let options = ParseOptions::builder(ParseMode::On, Output::Data).max_bytes(1024).build();
        let mut body = decode(once(Bytes::from(bomb)), Some("gzip"), &options).unwrap();

        let mut decoded = 0;
        let error = loop {
            match body.frame().await {
                Some(Ok(frame)) => decoded += frame.into_data().unwrap().len(),
                Some(Err(e)) => break e,
                None => panic!("the payload should not decode completely"),
            }
        };
        assert!(decoded <= 1024);
        assert_eq!(error.kind(), ErrorKind::PayloadTooLarge);
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn output_within_the_limit_decodes() {
        let source = b"x".repeat(1024);
        let options = ParseOptions::builder(ParseMode::On, Output::Data).max_bytes(1024).build();
        let body = decode(once(Bytes::from(gzip(&source))), Some("gzip"), &options).unwrap();
        assert_eq!(body.collect().await.unwrap().to_bytes(), source);
    }

    // ignores the cap, emitting every input byte ten times
    struct Echo(BytesMut);

    impl Decompress for Echo {
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            for _ in 0..10 {
                self.0.extend_from_slice(data);
            }
            Ok(())
        }

        fn take(&mut self) -> Bytes {
            self.0.split().freeze()
        }

        fn finish(self: Box<Self>) -> io::Result<Bytes> {
            Ok(self.0.freeze())
        }
    }

    #[tokio::test]
    async fn custom_decoders_are_capped_on_output() {
        let decoders = Decoders::empty().with("echo", |_| Ok(Box::new(Echo(BytesMut::new())) as Box<dyn Decompress>));
        let options = ParseOptions::builder(ParseMode::On, Output::Data).decoders(decoders).max_bytes(50).build();

        let body = decode(split(b"0123456789".to_vec(), 4), Some("echo"), &options).unwrap();
        let error = body.collect().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn default_registry() {
        let decoders = Decoders::default();
        assert!(decoders.get("gzip").is_some());
        assert!(decoders.get("x-gzip").is_some());
        assert!(decoders.get("deflate").is_some());
        assert!(decoders.get("br").is_none());
        assert!(Decoders::empty().get("gzip").is_none());
    }
}
