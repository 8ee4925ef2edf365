/*!
 * Stream Synthesizer
 * Builds the in-process source or sink standing in for a bridged descriptor
 *
 * Synthesis never touches the filesystem: file targets are resolved to
 * absolute paths and opened by the process layer at spawn time.
 */

use super::classify::StdioSource;
use super::transform::LineTransform;
use super::types::{
    BoxChunkStream, BoxReader, BoxWriter, BufferOption, Direction, StdioError, StdioResult,
};
use crate::core::types::Fd;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// One source drained into the child's stdin
pub enum InputSource {
    /// Materialized payload, finite and not restartable
    Chunks(Vec<Bytes>),
    File(PathBuf),
    Reader(BoxReader),
    Stream(BoxChunkStream),
    /// The parent's own stdin
    ParentStdin,
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunks(chunks) => write!(f, "Chunks({})", chunks.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::ParentStdin => f.write_str("ParentStdin"),
        }
    }
}

/// One destination for what the child writes
pub enum OutputTarget {
    File { path: PathBuf, append: bool },
    Writer(BoxWriter),
    /// The parent's own stdout or stderr
    Parent(Fd),
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path, append } => f
                .debug_struct("File")
                .field("path", path)
                .field("append", append)
                .finish(),
            Self::Writer(_) => f.write_str("Writer(..)"),
            Self::Parent(fd) => f.debug_tuple("Parent").field(fd).finish(),
        }
    }
}

/// Input side of a bridged descriptor
#[derive(Debug, Default)]
pub struct InputBridge {
    pub sources: Vec<InputSource>,
    pub transforms: Vec<LineTransform>,
}

/// Output side of a bridged descriptor
#[derive(Debug)]
pub struct OutputBridge {
    pub targets: Vec<OutputTarget>,
    pub transforms: Vec<LineTransform>,
    /// Append collected bytes to the descriptor's accumulator
    pub buffer: bool,
}

impl OutputBridge {
    /// Bridge for a plain `pipe` output: collect only
    pub fn passthrough(buffer: bool) -> Self {
        Self {
            targets: Vec::new(),
            transforms: Vec::new(),
            buffer,
        }
    }
}

/// Messaging descriptor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcBridge {
    pub buffer: bool,
}

/// The synthesized stream of a bridged descriptor
#[derive(Debug)]
pub enum ResolvedStream {
    Input(InputBridge),
    Output(OutputBridge),
    Ipc(IpcBridge),
}

impl ResolvedStream {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Input(_) => Direction::Input,
            Self::Output(_) | Self::Ipc(_) => Direction::Output,
        }
    }
}

/// Builds resolved streams for validated descriptors
pub struct Synthesizer<'a> {
    cwd: &'a Path,
    buffer: &'a BufferOption,
}

impl<'a> Synthesizer<'a> {
    pub fn new(cwd: &'a Path, buffer: &'a BufferOption) -> Self {
        Self { cwd, buffer }
    }

    pub fn synthesize(
        &self,
        option_name: &str,
        direction: Direction,
        sources: Vec<StdioSource>,
    ) -> StdioResult<ResolvedStream> {
        if sources.iter().any(|source| matches!(source, StdioSource::Ipc)) {
            return Ok(ResolvedStream::Ipc(IpcBridge {
                buffer: self.buffer.for_slot("ipc"),
            }));
        }

        match direction {
            Direction::Input => self.input_bridge(option_name, sources).map(ResolvedStream::Input),
            Direction::Output => self
                .output_bridge(option_name, sources)
                .map(ResolvedStream::Output),
        }
    }

    fn input_bridge(&self, option_name: &str, sources: Vec<StdioSource>) -> StdioResult<InputBridge> {
        let mut bridge = InputBridge::default();
        for source in sources {
            match source {
                StdioSource::Native(_) => {}
                StdioSource::Payload(chunks) => bridge.sources.push(InputSource::Chunks(chunks)),
                StdioSource::File(file) => bridge.sources.push(InputSource::File(self.resolve(&file.path))),
                StdioSource::Url(url) => bridge
                    .sources
                    .push(InputSource::File(self.resolve(&url_path(option_name, &url)?))),
                StdioSource::Reader(reader) => bridge.sources.push(InputSource::Reader(reader)),
                StdioSource::Stream(stream) => bridge.sources.push(InputSource::Stream(stream)),
                StdioSource::Parent(_) => bridge.sources.push(InputSource::ParentStdin),
                StdioSource::Generator(transform) => bridge.transforms.push(transform),
                source @ (StdioSource::Writer(_) | StdioSource::Ipc | StdioSource::Unresolved(_)) => {
                    return Err(StdioError::NotCombinable {
                        option_name: option_name.to_string(),
                        value: source.label(),
                    })
                }
            }
        }
        Ok(bridge)
    }

    fn output_bridge(&self, option_name: &str, sources: Vec<StdioSource>) -> StdioResult<OutputBridge> {
        let mut bridge = OutputBridge::passthrough(self.buffer.for_slot(option_name));
        for source in sources {
            match source {
                StdioSource::Native(_) => {}
                StdioSource::File(file) => bridge.targets.push(OutputTarget::File {
                    path: self.resolve(&file.path),
                    append: file.append,
                }),
                StdioSource::Url(url) => bridge.targets.push(OutputTarget::File {
                    path: self.resolve(&url_path(option_name, &url)?),
                    append: false,
                }),
                StdioSource::Writer(writer) => bridge.targets.push(OutputTarget::Writer(writer)),
                StdioSource::Parent(fd) => bridge.targets.push(OutputTarget::Parent(fd)),
                StdioSource::Generator(transform) => bridge.transforms.push(transform),
                source @ (StdioSource::Payload(_)
                | StdioSource::Reader(_)
                | StdioSource::Stream(_)
                | StdioSource::Ipc
                | StdioSource::Unresolved(_)) => {
                    return Err(StdioError::NotCombinable {
                        option_name: option_name.to_string(),
                        value: source.label(),
                    })
                }
            }
        }
        Ok(bridge)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path_clean::clean(path)
        } else {
            path_clean::clean(self.cwd.join(path))
        }
    }
}

/// Local path of a `file:` URL
pub(super) fn url_path(option_name: &str, url: &Url) -> StdioResult<PathBuf> {
    if url.scheme() != "file" {
        return Err(StdioError::UrlScheme {
            option_name: option_name.to_string(),
            scheme: url.scheme().to_string(),
        });
    }
    url.to_file_path().map_err(|_| StdioError::UrlPath {
        option_name: option_name.to_string(),
        url: url.to_string(),
    })
}
