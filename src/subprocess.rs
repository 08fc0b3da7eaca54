//! Spooled communication with child processes. Output streams are
//! captured into memory up to a threshold and spill to an anonymous
//! temp file beyond it; input is fed from a background task that closes
//! the child's stdin on EOF.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::process::ExitStatus;
use std::task::{Context as TaskContext, Poll};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Per-stream memory cap before captured output spills to disk.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Bytes to feed to the child's stdin.
pub enum Input {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// One fully captured output stream, memory- or file-backed. The file
/// backing is anonymous and disappears when the capture drops.
pub struct Captured {
    size: u64,
    backing: Backing,
}

enum Backing {
    Memory(Bytes),
    // rewound to the start
    File(tokio::fs::File),
}

impl Captured {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Reads the whole capture back into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self.backing {
            Backing::Memory(bytes) => Ok(bytes),
            Backing::File(mut file) => {
                let mut contents = Vec::with_capacity(self.size as usize);
                file.read_to_end(&mut contents).await?;
                Ok(Bytes::from(contents))
            }
        }
    }

    /// Turns the capture into a chunked byte stream for response bodies.
    pub fn into_stream(self) -> CapturedStream {
        CapturedStream(match self.backing {
            Backing::Memory(bytes) => Inner::Memory(Some(bytes)),
            Backing::File(file) => Inner::File(ReaderStream::with_capacity(file, DEFAULT_BUFFER_SIZE)),
        })
    }
}

pub struct CapturedStream(Inner);

enum Inner {
    Memory(Option<Bytes>),
    File(ReaderStream<tokio::fs::File>),
}

impl Stream for CapturedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.0 {
            Inner::Memory(bytes) => Poll::Ready(bytes.take().filter(|b| !b.is_empty()).map(Ok)),
            Inner::File(stream) => Pin::new(stream).poll_next(cx),
        }
    }
}

/// Everything a reaped child left behind.
pub struct ChildOutput {
    pub status: ExitStatus,
    pub stdout: Option<Captured>,
    pub stderr: Option<Captured>,
}

/// Feeds `input` to the child and captures its redirected outputs,
/// spooling each up to `buffer_size` bytes in memory. Output drains run
/// concurrently with the stdin feeder so neither side can deadlock on a
/// full pipe; streams are joined in order (stdout, stderr, stdin when
/// nothing was redirected) before the child is reaped.
pub async fn communicate(
    mut child: Child,
    input: Option<Input>,
    buffer_size: usize,
) -> Result<ChildOutput> {
    let feeder = child
        .stdin
        .take()
        .map(|stdin| tokio::spawn(feed(stdin, input)));

    let out_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(spool(stdout, buffer_size)));
    let err_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(spool(stderr, buffer_size)));

    let stdout = match out_task {
        Some(task) => Some(
            task.await
                .context("failed to join stdout reader")?
                .context("failed to capture child stdout")?,
        ),
        None => None,
    };
    let stderr = match err_task {
        Some(task) => Some(
            task.await
                .context("failed to join stderr reader")?
                .context("failed to capture child stderr")?,
        ),
        None => None,
    };

    if stdout.is_none() && stderr.is_none() {
        if let Some(feeder) = feeder {
            feeder.await.context("failed to join stdin feeder")?;
        }
    }

    let status = child.wait().await.context("failed to reap child process")?;

    Ok(ChildOutput {
        status,
        stdout,
        stderr,
    })
}

async fn feed(mut stdin: ChildStdin, input: Option<Input>) {
    let result = match input {
        None => Ok(()),
        Some(Input::Bytes(bytes)) => stdin.write_all(&bytes).await,
        Some(Input::Reader(mut reader)) => tokio::io::copy(&mut reader, &mut stdin)
            .await
            .map(|_| ()),
    };

    if let Err(error) = result {
        debug!(%error, "child closed its stdin before the input drained");
    }

    // dropping the handle closes the child's stdin
}

async fn spool(mut reader: impl AsyncRead + Unpin, buffer_size: usize) -> io::Result<Captured> {
    let mut buffered = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut file: Option<tokio::fs::File> = None;
    let mut size: u64 = 0;

    loop {
        let read = reader.read_buf(&mut buffered).await?;
        if read == 0 {
            break;
        }
        size += read as u64;

        if let Some(file) = &mut file {
            file.write_all(&buffered.split()).await?;
        } else if buffered.len() > buffer_size {
            // memory threshold crossed, move what we have to disk and
            // keep appending there
            let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
                .await
                .map_err(io::Error::other)??;
            let mut spilled = tokio::fs::File::from_std(std_file);
            spilled.write_all(&buffered.split()).await?;
            file = Some(spilled);
        }
    }

    let backing = match file {
        Some(mut file) => {
            file.flush().await?;
            file.seek(SeekFrom::Start(0)).await?;
            Backing::File(file)
        }
        None => Backing::Memory(buffered.freeze()),
    };

    Ok(Captured { size, backing })
}
