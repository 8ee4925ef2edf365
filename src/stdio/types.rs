/*!
 * Stdio Types
 * Stdio values, classified sources, descriptors, and configuration errors
 */

use super::transform::LineTransform;
use crate::core::types::Fd;
use bytes::Bytes;
use futures::stream::BoxStream;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

/// Stdio operation result
pub type StdioResult<T> = Result<T, StdioError>;

/// Caller-supplied readable source
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Caller-supplied writable sink
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Caller-supplied chunk producer
pub type BoxChunkStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Configuration errors raised while building a stdio plan
///
/// Every variant names the offending option so callers can fix their
/// configuration deterministically. Always raised before any process exists.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum StdioError {
    #[error("The `{option_name}: URL` option must use the `file:` scheme, not `{scheme}:`.\nFor example, you can use the `Url::from_file_path()` constructor of the `url` crate.")]
    #[diagnostic(
        code(stdio::url_scheme),
        help("Convert the URL to a `file:` URL or pass a file path instead.")
    )]
    UrlScheme { option_name: String, scheme: String },

    #[error("The `{option_name}: URL` option must point to a local file path: {url}")]
    #[diagnostic(code(stdio::url_path))]
    UrlPath { option_name: String, url: String },

    #[error("The `{option_name}: filePath` option must either be an absolute file path or start with `.`.")]
    #[diagnostic(
        code(stdio::file_path),
        help("Strings that are not stdio keywords are file paths; `{value}` is neither.")
    )]
    FilePath { option_name: String, value: String },

    #[error("The `{option_name}` option cannot be {kind}: it is only valid for {expected} descriptors.")]
    #[diagnostic(code(stdio::direction))]
    Direction {
        option_name: String,
        kind: &'static str,
        expected: Direction,
    },

    #[error("The `input` and `inputFile` options cannot be both set.")]
    #[diagnostic(code(stdio::input_conflict))]
    InputConflict,

    #[error("The `{shortcut}` option cannot be combined with an explicit `stdin` value.")]
    #[diagnostic(
        code(stdio::stdin_conflict),
        help("Either leave `stdin` unset (or `pipe`) or drop the `{shortcut}` option.")
    )]
    StdinConflict { shortcut: &'static str },

    #[error("It's not possible to provide `stdio` in combination with one of `stdin`, `stdout`, `stderr`.")]
    #[diagnostic(code(stdio::stdio_conflict))]
    StdioConflict,

    #[error("The `stdio` option cannot share one {kind} between descriptors: pass an array instead.")]
    #[diagnostic(code(stdio::not_shareable))]
    NotShareable { kind: &'static str },

    #[error("The `{option_name}` option cannot combine `{value}` with other values.")]
    #[diagnostic(code(stdio::not_combinable))]
    NotCombinable { option_name: String, value: String },

    #[error("The `{option_name}` option must not be an empty array.")]
    #[diagnostic(code(stdio::empty))]
    Empty { option_name: String },

    #[error("The `{option_name}` option cannot be `ipc`: messaging needs a descriptor after stderr.")]
    #[diagnostic(code(stdio::ipc_slot))]
    IpcSlot { option_name: String },

    #[error("Only one `ipc` descriptor can be provided, found both `{first}` and `{second}`.")]
    #[diagnostic(code(stdio::duplicate_ipc))]
    DuplicateIpc { first: String, second: String },
}

impl StdioError {
    /// Option name of the slot at fault, when the error is slot-specific
    pub fn option_name(&self) -> Option<&str> {
        match self {
            Self::UrlScheme { option_name, .. }
            | Self::UrlPath { option_name, .. }
            | Self::FilePath { option_name, .. }
            | Self::Direction { option_name, .. }
            | Self::NotCombinable { option_name, .. }
            | Self::Empty { option_name }
            | Self::IpcSlot { option_name } => Some(option_name),
            Self::StdinConflict { .. } => Some("stdin"),
            Self::InputConflict
            | Self::StdioConflict
            | Self::NotShareable { .. }
            | Self::DuplicateIpc { .. } => None,
        }
    }
}

/// Which side supplies data on a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Parent feeds the child (stdin)
    Input,
    /// Child feeds the parent (stdout, stderr, extra descriptors)
    Output,
}

impl Direction {
    #[inline]
    pub const fn for_index(index: usize) -> Self {
        if index == 0 {
            Self::Input
        } else {
            Self::Output
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Semantic type assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioType {
    Native,
    Payload,
    File,
    Url,
    Stream,
    Ipc,
    Generator,
    Unresolved,
}

impl StdioType {
    /// Whether a descriptor of this type needs an in-process stream
    #[inline]
    pub const fn is_bridged(self) -> bool {
        !matches!(self, Self::Native | Self::Unresolved)
    }
}

/// Low-level open mode handed to process creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioMode {
    Pipe,
    Overlapped,
    Ignore,
    Inherit,
    /// Share the parent's descriptor with this number
    Fd(Fd),
}

impl StdioMode {
    /// Parse a native keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "pipe" => Some(Self::Pipe),
            "overlapped" => Some(Self::Overlapped),
            "ignore" => Some(Self::Ignore),
            "inherit" => Some(Self::Inherit),
            _ => None,
        }
    }

    /// Modes that hand the parent a stream end
    #[inline]
    pub const fn is_piped(self) -> bool {
        matches!(self, Self::Pipe | Self::Overlapped)
    }
}

impl fmt::Display for StdioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => f.write_str("pipe"),
            Self::Overlapped => f.write_str("overlapped"),
            Self::Ignore => f.write_str("ignore"),
            Self::Inherit => f.write_str("inherit"),
            Self::Fd(fd) => write!(f, "{}", fd),
        }
    }
}

/// Structured file reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileRef {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "crate::core::serde::is_false")]
    pub append: bool,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
        }
    }

    #[must_use]
    pub fn append(mut self) -> Self {
        self.append = true;
        self
    }
}

/// In-memory data sent to the child
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Bytes),
    Text(String),
    /// Serialized as JSON text
    Json(serde_json::Value),
    /// Ordered chunks, written back to back
    Sequence(Vec<Payload>),
}

impl Payload {
    /// Materialize into the chunks written to the child
    pub fn into_chunks(self) -> Vec<Bytes> {
        match self {
            Self::Bytes(bytes) => vec![bytes],
            Self::Text(text) => vec![Bytes::from(text)],
            Self::Json(value) => vec![Bytes::from(value.to_string())],
            Self::Sequence(items) => items.into_iter().flat_map(Payload::into_chunks).collect(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// Source of the `inputFile` shortcut
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFile {
    Path(PathBuf),
    Url(Url),
}

impl From<&str> for InputFile {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for InputFile {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Url> for InputFile {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

/// A raw, user-supplied stdio value before classification
pub enum StdioValue {
    /// Keyword or file path string, sniffed by the classifier
    Text(String),
    /// Typed native keyword
    Mode(StdioMode),
    Payload(Payload),
    File(FileRef),
    Url(Url),
    Reader(BoxReader),
    Stream(BoxChunkStream),
    Writer(BoxWriter),
    Transform(LineTransform),
    Ipc,
}

impl StdioValue {
    /// Duplicate the value for broadcasting; streams cannot be shared
    pub fn try_clone(&self) -> StdioResult<Self> {
        Ok(match self {
            Self::Text(text) => Self::Text(text.clone()),
            Self::Mode(mode) => Self::Mode(*mode),
            Self::Payload(payload) => Self::Payload(payload.clone()),
            Self::File(file) => Self::File(file.clone()),
            Self::Url(url) => Self::Url(url.clone()),
            Self::Transform(transform) => Self::Transform(transform.clone()),
            Self::Ipc => Self::Ipc,
            Self::Reader(_) => return Err(StdioError::NotShareable { kind: "reader" }),
            Self::Stream(_) => return Err(StdioError::NotShareable { kind: "stream" }),
            Self::Writer(_) => return Err(StdioError::NotShareable { kind: "writer" }),
        })
    }
}

impl fmt::Debug for StdioValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Mode(mode) => f.debug_tuple("Mode").field(mode).finish(),
            Self::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
            Self::File(file) => f.debug_tuple("File").field(file).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Writer(_) => f.write_str("Writer(..)"),
            Self::Transform(transform) => f.debug_tuple("Transform").field(transform).finish(),
            Self::Ipc => f.write_str("Ipc"),
        }
    }
}

impl From<&str> for StdioValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for StdioValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<StdioMode> for StdioValue {
    fn from(mode: StdioMode) -> Self {
        Self::Mode(mode)
    }
}

impl From<Payload> for StdioValue {
    fn from(payload: Payload) -> Self {
        Self::Payload(payload)
    }
}

impl From<FileRef> for StdioValue {
    fn from(file: FileRef) -> Self {
        Self::File(file)
    }
}

impl From<Url> for StdioValue {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<LineTransform> for StdioValue {
    fn from(transform: LineTransform) -> Self {
        Self::Transform(transform)
    }
}

/// Value of one stdio slot: a single value or an ordered list
#[derive(Debug)]
pub enum StdioOption {
    Single(StdioValue),
    Many(Vec<StdioValue>),
}

impl StdioOption {
    pub fn into_values(self) -> Vec<StdioValue> {
        match self {
            Self::Single(value) => vec![value],
            Self::Many(values) => values,
        }
    }

    fn try_clone(&self) -> StdioResult<Self> {
        Ok(match self {
            Self::Single(value) => Self::Single(value.try_clone()?),
            Self::Many(values) => Self::Many(
                values
                    .iter()
                    .map(StdioValue::try_clone)
                    .collect::<StdioResult<_>>()?,
            ),
        })
    }
}

macro_rules! single_stdio_option {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StdioOption {
                fn from(value: $ty) -> Self {
                    Self::Single(value.into())
                }
            }
        )*
    };
}

single_stdio_option!(StdioValue, &str, String, StdioMode, Payload, FileRef, Url, LineTransform);

impl From<Vec<StdioValue>> for StdioOption {
    fn from(values: Vec<StdioValue>) -> Self {
        Self::Many(values)
    }
}

/// The `stdio` option: one value shared by stdin/stdout/stderr, or one per fd
#[derive(Debug)]
pub enum StdioConfig {
    Shared(StdioOption),
    PerFd(Vec<StdioOption>),
}

impl StdioConfig {
    /// Broadcast a shared value to the three standard slots
    pub(super) fn broadcast(shared: &StdioOption) -> StdioResult<Vec<StdioOption>> {
        Ok(vec![shared.try_clone()?, shared.try_clone()?, shared.try_clone()?])
    }
}

/// The `buffer` option: one flag for every slot or per-slot overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BufferOption {
    All(bool),
    /// Keys: `stdout`, `stderr`, `all`, `ipc`, `fd3`.. Missing keys default to true.
    PerSlot(HashMap<String, bool>),
}

impl BufferOption {
    /// Whether the named slot accumulates its output
    pub fn for_slot(&self, option_name: &str) -> bool {
        match self {
            Self::All(enabled) => *enabled,
            Self::PerSlot(slots) => slots.get(option_name).copied().unwrap_or(true),
        }
    }

    pub fn per_slot<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        Self::PerSlot(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Default for BufferOption {
    fn default() -> Self {
        Self::All(true)
    }
}

impl From<bool> for BufferOption {
    fn from(enabled: bool) -> Self {
        Self::All(enabled)
    }
}

/// Stdio and messaging configuration surface
#[derive(Debug, Default)]
pub struct StdioOptions {
    pub stdio: Option<StdioConfig>,
    pub stdin: Option<StdioOption>,
    pub stdout: Option<StdioOption>,
    pub stderr: Option<StdioOption>,
    pub input: Option<Payload>,
    pub input_file: Option<InputFile>,
    pub ipc: bool,
    pub buffer: BufferOption,
}

/// Option name for a descriptor index (`stdin`, `stdout`, `stderr`, `fd3`..)
pub fn option_name(index: usize) -> String {
    use crate::core::limits::STANDARD_OPTION_NAMES;
    STANDARD_OPTION_NAMES
        .get(index)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("fd{}", index))
}
