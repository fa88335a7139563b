//! The parse entry point.
//!
//! A parse runs the content gate, then races the pipeline against the
//! timeout timer and the client abort signal. Whichever source finishes
//! first settles the [`Latch`]; the losing futures are dropped, which removes
//! any file they were writing.

use std::error::Error as StdError;
use std::future;

use bytes::Bytes;
use http_body::Body;
use mime::Mime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{ContentKind, decode, decode_value, read_to_limit};
use crate::file::write_file;
use crate::gate;
use crate::latch::Latch;
use crate::multipart;
use crate::options::{Output, ParseMode, ParseOptions};
use crate::protocol::body::{self, PayloadBody};
use crate::protocol::{ParseRequest, Parsed, Payload, PayloadError, Tap};
use crate::utils::ensure;

/// Parses the body of `request` according to `options`.
///
/// `tap` observes every payload chunk after decompression. The returned
/// [`Parsed`] carries the effective media type and exactly one payload
/// representation.
pub async fn parse<B>(request: ParseRequest<B>, tap: Option<Tap>, options: &ParseOptions) -> Result<Parsed, PayloadError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let media_type = gate::check(&request, options)?;
    let aborted = request.abort_signal().cloned();

    let latch = Latch::new();
    let work = deliver(request, tap, &media_type, options);

    // started after the gate, an oversized or unacceptable request never waits for it
    let timer = async {
        match options.timeout() {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                timeout
            }
            None => future::pending().await,
        }
    };

    let abort = async {
        match &aborted {
            Some(token) => token.cancelled().await,
            None => future::pending().await,
        }
    };

    tokio::select! {
        result = work => {
            latch.settle(result);
        }
        timeout = timer => {
            warn!(?timeout, media_type = %media_type, "payload timed out");
            latch.settle(Err(PayloadError::timeout(timeout)));
        }
        () = abort => {
            debug!(media_type = %media_type, "client aborted while reading payload");
            latch.settle(Err(PayloadError::aborted("client disconnected")));
        }
    }

    let payload = latch.into_outcome().ok_or_else(|| PayloadError::aborted("parse finished without an outcome"))??;
    Ok(Parsed { media_type, payload })
}

async fn deliver<B>(
    request: ParseRequest<B>,
    tap: Option<Tap>,
    media_type: &Mime,
    options: &ParseOptions,
) -> Result<Payload, PayloadError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let encoding = request.content_encoding();
    let (_headers, transport, aborted) = request.into_parts();
    let source = body::source(transport);

    match options.parse() {
        ParseMode::Off => output(body::tap(source, tap), media_type, options, aborted.as_ref(), false).await,
        ParseMode::DecompressOnly => {
            let source = decode(source, encoding.as_deref(), options)?;
            output(body::tap(source, tap), media_type, options, aborted.as_ref(), false).await
        }
        ParseMode::On => {
            let source = body::tap(decode(source, encoding.as_deref(), options)?, tap);

            if ContentKind::classify(media_type) == ContentKind::Multipart {
                ensure!(options.multipart().enabled, PayloadError::unsupported_media_type(media_type.essence_str()));
                let aggregate = multipart::aggregate(source, media_type, options, aborted.as_ref()).await?;
                return Ok(Payload::Multipart(aggregate));
            }

            output(source, media_type, options, aborted.as_ref(), true).await
        }
    }
}

async fn output(
    source: PayloadBody,
    media_type: &Mime,
    options: &ParseOptions,
    aborted: Option<&CancellationToken>,
    decode_content: bool,
) -> Result<Payload, PayloadError> {
    match options.output() {
        Output::Stream => Ok(Payload::Stream(source)),
        Output::File => {
            let file = write_file(source, options.uploads(), options.max_bytes(), aborted).await?;
            Ok(Payload::File(file))
        }
        Output::Data => {
            let bytes = read_to_limit(source, options.max_bytes()).await?;
            if decode_content {
                decode_value(bytes, media_type, options).map(Payload::Data)
            } else {
                Ok(Payload::Raw(bytes))
            }
        }
    }
}
