//! Body types flowing through the parse pipeline.
//!
//! Every stage of the pipeline (transport source, decompression, tap) is an
//! [`http_body::Body`] yielding [`Bytes`] frames and failing with [`PayloadError`].
//! Stages are boxed into a [`PayloadBody`] so they can be composed at runtime
//! depending on the request headers and the parse options.

use std::error::Error as StdError;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::mpsc;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;

use crate::protocol::PayloadError;

/// The body handed between pipeline stages and returned for `stream` output.
pub type PayloadBody = UnsyncBoxBody<Bytes, PayloadError>;

/// Wraps the transport body, converting its errors into [`PayloadError`].
pub(crate) fn source<B>(body: B) -> PayloadBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    body.map_err(|e| PayloadError::from_body_error(e.into())).boxed_unsync()
}

/// A body replaying bytes that were already buffered.
pub fn once(bytes: Bytes) -> PayloadBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Receives a copy of every chunk passing through a [`Tap`].
pub trait TapSink: Send {
    fn on_chunk(&mut self, chunk: &Bytes);

    /// Called once the body has been read to its end.
    fn on_end(&mut self) {}
}

impl TapSink for mpsc::UnboundedSender<Bytes> {
    fn on_chunk(&mut self, chunk: &Bytes) {
        // the observer may have gone away, the payload must flow regardless
        let _ = self.unbounded_send(chunk.clone());
    }

    fn on_end(&mut self) {
        self.close_channel();
    }
}

struct FnSink<F>(F);

impl<F> TapSink for FnSink<F>
where
    F: FnMut(&Bytes) + Send,
{
    fn on_chunk(&mut self, chunk: &Bytes) {
        (self.0)(chunk)
    }
}

/// Observes the payload bytes without consuming or altering them.
pub struct Tap {
    sink: Box<dyn TapSink>,
}

impl Tap {
    pub fn new<S: TapSink + 'static>(sink: S) -> Self {
        Self { sink: Box::new(sink) }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&Bytes) + Send + 'static,
    {
        Self::new(FnSink(f))
    }

    /// Creates a tap forwarding every chunk into an unbounded channel.
    ///
    /// The receiver ends once the body is fully read or the pipeline is dropped.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self::new(sender), receiver)
    }
}

impl std::fmt::Debug for Tap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tap").finish_non_exhaustive()
    }
}

pin_project! {
    /// A body stage handing every data frame to a [`Tap`] before passing it on.
    pub(crate) struct TapBody<B> {
        #[pin]
        inner: B,
        tap: Option<Tap>,
    }
}

impl<B> TapBody<B> {
    pub(crate) fn new(inner: B, tap: Tap) -> Self {
        Self { inner, tap: Some(tap) }
    }
}

impl<B> Body for TapBody<B>
where
    B: Body<Data = Bytes, Error = PayloadError>,
{
    type Data = Bytes;
    type Error = PayloadError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let (Some(tap), Some(data)) = (this.tap.as_mut(), frame.data_ref()) {
                    tap.sink.on_chunk(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                // dropping the sink tells the observer the stream will not complete
                this.tap.take();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some(mut tap) = this.tap.take() {
                    tap.sink.on_end();
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Splices `tap` behind `body` when one is configured.
pub(crate) fn tap(body: PayloadBody, tap: Option<Tap>) -> PayloadBody {
    match tap {
        Some(tap) => TapBody::new(body, tap).boxed_unsync(),
        None => body,
    }
}
