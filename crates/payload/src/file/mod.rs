//! Materializes a body into a temporary file.
//!
//! The file is created exclusively under the uploads directory (the system
//! temp dir by default) with a `<millis>-<pid>-<random>` name. It is only kept
//! once every byte was written; a write error, the byte limit, a failing body,
//! the client abort signal or simply dropping the write removes it again.

mod counter;
pub use counter::ByteCounter;

use std::path::{Path, PathBuf};
use std::pin::pin;

use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{PayloadError, SavedFile};
use crate::utils::unix_millis;

pub(crate) async fn write_file<B>(
    body: B,
    uploads: Option<&Path>,
    max_bytes: Option<u64>,
    aborted: Option<&CancellationToken>,
) -> Result<SavedFile, PayloadError>
where
    B: Body<Data = Bytes, Error = PayloadError>,
{
    let dir = uploads.map_or_else(std::env::temp_dir, Path::to_path_buf);
    let prefix = format!("{}-{}-", unix_millis(), std::process::id());

    let temp_file = tempfile::Builder::new()
        .prefix(&prefix)
        .rand_bytes(16)
        .tempfile_in(&dir)
        .map_err(|e| PayloadError::environment(format!("failed to create upload file in {}", dir.display()), e))?;

    // the temp path deletes the file when dropped, until it is kept
    let (file, temp_path) = temp_file.into_parts();
    debug!(path = %temp_path.display(), "writing payload to file");

    let mut sink = ByteCounter::new(File::from_std(file), max_bytes);

    let result = match aborted {
        Some(token) => {
            tokio::select! {
                result = copy(body, &mut sink) => result,
                () = token.cancelled() => Err(PayloadError::aborted("client disconnected while writing file")),
            }
        }
        None => copy(body, &mut sink).await,
    };

    let bytes = sink.bytes();
    drop(sink);

    match result {
        Ok(()) => {
            let path: PathBuf =
                temp_path.keep().map_err(|e| PayloadError::environment("failed to keep upload file", e.error))?;
            debug!(path = %path.display(), bytes, "payload written to file");
            Ok(SavedFile { path, bytes })
        }
        Err(e) => {
            debug!(cause = %e, path = %temp_path.display(), "removing partial upload file");
            if let Err(remove_error) = temp_path.close() {
                warn!(cause = %remove_error, "failed to remove partial upload file");
            }
            Err(e)
        }
    }
}

async fn copy<B, W>(body: B, sink: &mut ByteCounter<W>) -> Result<(), PayloadError>
where
    B: Body<Data = Bytes, Error = PayloadError>,
    W: AsyncWrite + Unpin,
{
    let mut body = pin!(body);

    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };

        if let Err(e) = sink.write_all(&data).await {
            return Err(match (sink.is_exceeded(), sink.max_bytes()) {
                (true, Some(max_bytes)) => PayloadError::too_large(max_bytes),
                _ => PayloadError::environment("failed to write upload file", e),
            });
        }
    }

    sink.flush().await.map_err(|e| PayloadError::environment("failed to flush upload file", e))
}
