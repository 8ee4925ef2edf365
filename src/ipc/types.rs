/*!
 * IPC Types
 * Common types for the parent/child message channel
 */

use crate::core::limits::{DEFAULT_MAX_IPC_MESSAGES, MAX_IPC_MESSAGE_SIZE};
use crate::core::types::Size;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// IPC operation result
///
/// # Must Use
/// Channel operations can fail and must be handled so no message is lost silently
pub type IpcResult<T> = Result<T, IpcError>;

/// A structured message: anything serializable to JSON
pub type Message = serde_json::Value;

/// Unified IPC error type with miette diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum IpcError {
    /// Send on a channel that is no longer open
    #[error("IPC channel closed: the subprocess is disconnected")]
    #[diagnostic(
        code(ipc::channel_closed),
        help("Messages can only be sent while the subprocess keeps its IPC descriptor open.")
    )]
    ChannelClosed,

    /// Transport failure while reading or writing frames
    #[error("IPC channel broken: {0}")]
    #[diagnostic(
        code(ipc::broken_pipe),
        help("The other side closed the channel abruptly or sent a malformed frame.")
    )]
    BrokenPipe(String),

    /// Bounded receive gave up
    #[error("IPC receive timed out after {elapsed_ms}ms (timeout: {timeout_ms}ms)")]
    #[diagnostic(
        code(ipc::timeout),
        help("No message arrived in time. Increase the timeout or check that the subprocess sends one.")
    )]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    /// Message could not be encoded or decoded
    #[error("IPC message serialization failed: {0}")]
    #[diagnostic(
        code(ipc::serialization),
        help("Messages must be JSON values; the received payload was not valid UTF-8 JSON.")
    )]
    Serialization(String),

    /// Frame length beyond the configured bound
    #[error("IPC message of {size} bytes exceeds the {max} byte limit")]
    #[diagnostic(code(ipc::frame_too_large))]
    FrameTooLarge { size: Size, max: Size },

    /// Messaging was not enabled for the subprocess
    #[error("IPC is not enabled: {0}")]
    #[diagnostic(
        code(ipc::disabled),
        help("Set the `ipc` option, or add an `ipc` entry to `stdio`, before spawning.")
    )]
    Disabled(String),

    /// Child side could not find or open the inherited descriptor
    #[error("IPC connection failed: {0}")]
    #[diagnostic(code(ipc::connect))]
    Connect(String),
}

/// A reset or broken pipe means the peer went away, which closes the
/// channel without breaking it
impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::InvalidData => IpcError::Serialization(err.to_string()),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                IpcError::ChannelClosed
            }
            _ => IpcError::BrokenPipe(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::Serialization(err.to_string())
    }
}

/// Lifecycle of a message channel
///
/// `Open` until the other side closes, `Draining` while already-received
/// messages are still being consumed, then `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Open,
    Draining,
    Closed,
}

impl ChannelState {
    #[inline]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    /// Keep a log of every received message for the final result
    pub buffer: bool,
    /// Log entries kept before the overflow flag is raised
    pub max_buffered: Size,
    /// Largest accepted frame payload
    pub max_message_size: Size,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: bool) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_max_buffered(mut self, max_buffered: Size) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: Size) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer: true,
            max_buffered: DEFAULT_MAX_IPC_MESSAGES,
            max_message_size: MAX_IPC_MESSAGE_SIZE,
        }
    }
}
