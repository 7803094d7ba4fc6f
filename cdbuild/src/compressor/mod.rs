mod tar_gz_compressor;

pub use tar_gz_compressor::TarGzCompressor;

use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Compressed archive bytes, ending with an `Err` item if archiving failed.
pub type ArchiveStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const CHUNK_SIZE: usize = 256 * 1024;
const CHANNEL_DEPTH: usize = 4;

/// Archive `source_dir` on a blocking thread and stream the compressed bytes.
///
/// At most a few chunks are in flight, so the archive is never held in memory
/// as a whole. The handle resolves to the number of compressed bytes produced,
/// or to the first error hit while walking or writing.
pub fn archive_stream(
    source_dir: impl Into<PathBuf>,
) -> (ArchiveStream, JoinHandle<io::Result<u64>>) {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let compressor = TarGzCompressor::new(source_dir);

    let handle = tokio::task::spawn_blocking(move || {
        let writer = ChannelWriter::new(tx.clone());
        match compressor.compress_to(writer) {
            Ok(writer) => writer.finish(),
            Err(err) => {
                tracing::debug!(
                    "Archiving {} failed: {err}",
                    compressor.source_dir().display()
                );
                // fail the consumer so it aborts instead of committing
                let _ = tx.blocking_send(Err(io::Error::new(err.kind(), err.to_string())));
                Err(err)
            }
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (Box::pin(stream), handle)
}

/// Buffers writes into fixed-size chunks and hands them to an async consumer.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    written: u64,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            written: 0,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.written += chunk.len() as u64;
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }

    fn finish(mut self) -> io::Result<u64> {
        self.send_buffered()?;
        Ok(self.written)
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buf.len();
        let n = room.min(buf.len());
        self.buf.extend_from_slice(&buf[..n]);
        if self.buf.len() == CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
