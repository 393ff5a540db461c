//! Tar archiving of mount directories.
//!
//! Archives are built and unpacked with blocking `tar` I/O on the blocking
//! thread pool; [`spawn_archive`] and [`extract_stream`] bridge that to the
//! async [`ByteReader`] streams the backends consume and produce.

use crate::types::ByteReader;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};
use stow_core::{Compression, Error, Result};
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

/// Capacity of the in-memory pipe between the archiver and the upload.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Write the tree under `mount_dir` to `writer` as a tar archive.
///
/// Entry names are relative to `mount_dir`. Symlinks are stored as links.
pub fn create_archive<W: Write>(writer: W, mount_dir: &Path, compression: Compression) -> Result<()> {
    let mut writer = match compression {
        Compression::None => append_tree(writer, mount_dir)?,
        Compression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
            append_tree(encoder, mount_dir)?
                .finish()
                .map_err(|e| Error::Archive(format!("Gzip finish failed: {}", e)))?
        }
        Compression::Zstd => {
            let encoder = zstd::stream::write::Encoder::new(writer, 3)
                .map_err(|e| Error::Archive(format!("Zstd init failed: {}", e)))?;
            append_tree(encoder, mount_dir)?
                .finish()
                .map_err(|e| Error::Archive(format!("Zstd finish failed: {}", e)))?
        }
    };
    writer
        .flush()
        .map_err(|e| Error::Archive(format!("Failed to flush archive: {}", e)))
}

fn append_tree<W: Write>(writer: W, mount_dir: &Path) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", mount_dir).map_err(|e| {
        Error::Archive(format!("Failed to pack dir {}: {}", mount_dir.display(), e))
    })?;
    builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("Failed to finish tar: {}", e)))
}

/// Extract an archive into `dest`, overwriting existing files.
pub fn extract_archive<R: Read>(reader: R, dest: &Path, compression: Compression) -> Result<()> {
    match compression {
        Compression::None => unpack(reader, dest),
        Compression::Gzip => unpack(flate2::read::GzDecoder::new(reader), dest),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(reader)
                .map_err(|e| Error::Archive(format!("Failed to create decoder: {}", e)))?;
            unpack(decoder, dest)
        }
    }
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dest).map_err(|e| {
        Error::Archive(format!("Failed to unpack archive into {}: {}", dest.display(), e))
    })
}

/// Outcome of an archiving task, published before its end of the pipe closes.
type ArchiveOutcome = Arc<OnceLock<std::result::Result<(), String>>>;

/// Read half of the archive pipe.
///
/// End of stream is only reported once the archiving task has finished
/// successfully. If it failed, or went away without finishing, the read
/// fails instead so a consumer never commits a truncated archive.
struct ArchiveStream {
    inner: DuplexStream,
    outcome: ArchiveOutcome,
}

impl AsyncRead for ArchiveStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match self.outcome.get() {
            Some(Ok(())) => Poll::Ready(Ok(())),
            Some(Err(msg)) => Poll::Ready(Err(io::Error::other(msg.clone()))),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive stream closed before the archive was complete",
            ))),
        }
    }
}

/// Start archiving `mount_dir` on the blocking pool.
///
/// Returns the read half of the archive stream and the archiving task. The
/// task fails if the reader is dropped before the archive is complete, and
/// the reader fails at end of stream if the task did.
pub fn spawn_archive(
    mount_dir: PathBuf,
    compression: Compression,
) -> (ByteReader, JoinHandle<Result<()>>) {
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    let outcome = ArchiveOutcome::default();
    let task_outcome = Arc::clone(&outcome);
    let mut bridge = SyncIoBridge::new(writer);

    let task = tokio::task::spawn_blocking(move || {
        let out = BufWriter::with_capacity(PIPE_CAPACITY, &mut bridge);
        let result = create_archive(out, &mount_dir, compression);
        // Must be set before the writer is shut down or dropped
        let _ = task_outcome.set(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result?;
        bridge
            .shutdown()
            .map_err(|e| Error::Archive(format!("Failed to close archive stream: {}", e)))
    });

    let reader: ByteReader = Box::pin(ArchiveStream {
        inner: reader,
        outcome,
    });
    (reader, task)
}

/// Extract an archive stream into `dest` on the blocking pool.
pub async fn extract_stream(src: ByteReader, dest: PathBuf, compression: Compression) -> Result<()> {
    let bridge = BufReader::with_capacity(PIPE_CAPACITY, SyncIoBridge::new(src));
    tokio::task::spawn_blocking(move || extract_archive(bridge, &dest, compression))
        .await
        .map_err(|e| Error::Internal(format!("Extract task failed: {}", e)))?
}
