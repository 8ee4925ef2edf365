/*!
 * Stream Pumps
 * Feed bridged input into the child and collect what it writes
 */

use crate::core::limits::STDIO_CHUNK_SIZE;
use crate::core::types::Size;
use crate::stdio::{BoxWriter, InputBridge, InputSource, OutputBridge, OutputTarget, TransformChain};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Append-only accumulator bounded by `max` bytes
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    max: Size,
    overflowed: bool,
}

impl OutputBuffer {
    pub fn new(max: Size) -> Self {
        Self {
            data: Vec::new(),
            max,
            overflowed: false,
        }
    }

    /// Append a chunk, truncating at the bound
    pub fn append(&mut self, chunk: &[u8]) {
        let room = self.max.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.overflowed = true;
            self.data.extend_from_slice(&chunk[..room]);
        } else {
            self.data.extend_from_slice(chunk);
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn max(&self) -> Size {
        self.max
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Accumulator shared by stdout and stderr for `all`
pub type SharedBuffer = Arc<Mutex<OutputBuffer>>;

/// What an output collector gathered, even when it failed midway
#[derive(Debug)]
pub struct Collected {
    pub buffer: Option<OutputBuffer>,
    pub result: io::Result<()>,
}

/// Write every input source into the child, in order, then close its stdin
///
/// The child may exit without reading its input: a broken pipe ends the
/// feed quietly.
pub async fn feed_input<W>(bridge: InputBridge, mut stdin: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut chain = TransformChain::new(bridge.transforms);
    match feed_sources(bridge.sources, &mut chain, &mut stdin).await {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed stdin before all input was written");
            Ok(())
        }
        result => result,
    }
}

async fn feed_sources<W>(
    sources: Vec<InputSource>,
    chain: &mut TransformChain,
    stdin: &mut W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for source in sources {
        match source {
            InputSource::Chunks(chunks) => {
                for chunk in chunks {
                    write_chunks(stdin, chain.push(&chunk)).await?;
                }
            }
            InputSource::File(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|err| {
                    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
                })?;
                copy_through(file, chain, stdin).await?;
            }
            InputSource::Reader(reader) => copy_through(reader, chain, stdin).await?,
            InputSource::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    write_chunks(stdin, chain.push(&chunk?)).await?;
                }
            }
            InputSource::ParentStdin => copy_through(tokio::io::stdin(), chain, stdin).await?,
        }
    }

    if let Some(rest) = chain.finish() {
        stdin.write_all(&rest).await?;
    }
    stdin.flush().await?;
    stdin.shutdown().await
}

async fn copy_through<R, W>(mut reader: R, chain: &mut TransformChain, stdin: &mut W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; STDIO_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        write_chunks(stdin, chain.push(&buf[..n])).await?;
    }
}

async fn write_chunks<W>(stdin: &mut W, chunks: Vec<Bytes>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in chunks {
        stdin.write_all(&chunk).await?;
    }
    Ok(())
}

/// Read everything the child writes on one descriptor
///
/// Each chunk goes through the transforms, then to every target, then into
/// the descriptor's buffer and the shared `all` buffer when those are on.
pub async fn collect_output<R>(
    reader: R,
    bridge: OutputBridge,
    max_buffer: Size,
    all: Option<SharedBuffer>,
) -> Collected
where
    R: AsyncRead + Unpin,
{
    let mut buffer = bridge.buffer.then(|| OutputBuffer::new(max_buffer));
    let mut chain = TransformChain::new(bridge.transforms);
    let result = pump_output(reader, bridge.targets, &mut chain, |chunk| {
        if let Some(buffer) = buffer.as_mut() {
            buffer.append(chunk);
        }
        if let Some(all) = all.as_ref() {
            all.lock().append(chunk);
        }
    })
    .await;
    Collected { buffer, result }
}

async fn pump_output<R, F>(
    mut reader: R,
    targets: Vec<OutputTarget>,
    chain: &mut TransformChain,
    mut record: F,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut sinks = open_targets(targets).await?;
    let mut buf = vec![0u8; STDIO_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for chunk in chain.push(&buf[..n]) {
            emit(&mut sinks, &chunk).await?;
            record(&chunk);
        }
    }
    if let Some(rest) = chain.finish() {
        emit(&mut sinks, &rest).await?;
        record(&rest);
    }

    for sink in &mut sinks {
        sink.writer.flush().await?;
        if sink.owned {
            sink.writer.shutdown().await?;
        }
    }
    Ok(())
}

struct Sink {
    writer: BoxWriter,
    /// Closed when the descriptor ends; the parent's own streams are only flushed
    owned: bool,
}

async fn open_targets(targets: Vec<OutputTarget>) -> io::Result<Vec<Sink>> {
    let mut sinks = Vec::with_capacity(targets.len());
    for target in targets {
        let sink = match target {
            OutputTarget::File { path, append } => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(&path)
                    .await
                    .map_err(|err| io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))?;
                Sink {
                    writer: Box::new(file),
                    owned: true,
                }
            }
            OutputTarget::Writer(writer) => Sink { writer, owned: true },
            OutputTarget::Parent(1) => Sink {
                writer: Box::new(tokio::io::stdout()),
                owned: false,
            },
            OutputTarget::Parent(_) => Sink {
                writer: Box::new(tokio::io::stderr()),
                owned: false,
            },
        };
        sinks.push(sink);
    }
    Ok(sinks)
}

async fn emit(sinks: &mut [Sink], chunk: &[u8]) -> io::Result<()> {
    for sink in sinks.iter_mut() {
        sink.writer.write_all(chunk).await?;
    }
    Ok(())
}

/// Drop one trailing newline (`\n` or `\r\n`)
pub fn strip_final_newline(data: &mut Vec<u8>) {
    if data.last() == Some(&b'\n') {
        data.pop();
        if data.last() == Some(&b'\r') {
            data.pop();
        }
    }
}
