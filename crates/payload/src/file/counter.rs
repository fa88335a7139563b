use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;

pin_project! {
    /// Counts the bytes written into `inner`, refusing any write that would exceed `max_bytes`.
    ///
    /// Once the limit is hit the counter stays failed, every further write errors.
    #[derive(Debug)]
    pub struct ByteCounter<W> {
        #[pin]
        inner: W,
        bytes: u64,
        max_bytes: Option<u64>,
        exceeded: bool,
    }
}

impl<W> ByteCounter<W> {
    pub fn new(inner: W, max_bytes: Option<u64>) -> Self {
        Self { inner, bytes: 0, max_bytes, exceeded: false }
    }

    /// Bytes accepted so far, including the chunk that broke the limit.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

fn limit_error(max_bytes: u64) -> io::Error {
    io::Error::other(format!("byte counter exceeded the limit of {max_bytes} bytes"))
}

impl<W: AsyncWrite> AsyncWrite for ByteCounter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();

        if let Some(max_bytes) = *this.max_bytes {
            if *this.exceeded {
                return Poll::Ready(Err(limit_error(max_bytes)));
            }

            let next = *this.bytes + buf.len() as u64;
            if next > max_bytes {
                *this.bytes = next;
                *this.exceeded = true;
                return Poll::Ready(Err(limit_error(max_bytes)));
            }
        }

        let written = ready!(this.inner.poll_write(cx, buf))?;
        *this.bytes += written as u64;
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
