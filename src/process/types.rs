/*!
 * Process Types
 * Spawn options, run results and process errors
 */

use crate::core::limits::{DEFAULT_MAX_BUFFER, DEFAULT_MAX_IPC_MESSAGES};
use crate::core::serde::{is_empty_vec, is_false, is_none, lossy_text, lossy_text_slots};
use crate::core::types::{Pid, Size};
use crate::ipc::{IpcError, Message};
use crate::stdio::{
    BufferOption, ExtensionTable, InputFile, Payload, StdioConfig, StdioError, StdioOption,
    StdioOptions,
};
use miette::Diagnostic;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Process operation result
///
/// # Must Use
/// Process operations can fail and must be handled to prevent resource leaks
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum ProcessError {
    /// Invalid stdio or messaging configuration; nothing was spawned
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] StdioError),

    #[error("Invalid command: {0}")]
    #[diagnostic(code(process::invalid_command))]
    InvalidCommand(String),

    #[error("Spawn failed: {0}")]
    #[diagnostic(
        code(process::spawn_failed),
        help("Check that the command exists, is executable, and that the working directory is valid.")
    )]
    SpawnFailed(String),

    #[error("Waiting for the subprocess failed: {0}")]
    #[diagnostic(code(process::wait_failed))]
    WaitFailed(String),

    #[error("Kill failed: {0}")]
    #[diagnostic(code(process::kill_failed))]
    KillFailed(String),

    /// The subprocess ran but did not succeed; carries the full output
    #[error("{0}")]
    #[diagnostic(code(process::failed))]
    Failed(Box<Failure>),
}

impl ProcessError {
    /// Output of a failed run, if the process got that far
    pub fn output(&self) -> Option<&Output> {
        match self {
            Self::Failed(failure) => Some(&failure.output),
            _ => None,
        }
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "cause")]
pub enum FailureCause {
    ExitCode { code: i32 },
    Signal { signal: i32 },
    /// A bridged descriptor failed while feeding or collecting
    Stream { option_name: String, message: String },
    Ipc { error: IpcError },
    MaxBuffer { option_name: String, max: Size },
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode { code } => write!(f, "failed with exit code {}", code),
            Self::Signal { signal } => write!(f, "was killed with signal {}", signal),
            Self::Stream { option_name, message } => {
                write!(f, "failed on `{}`: {}", option_name, message)
            }
            Self::Ipc { error } => write!(f, "failed on IPC: {}", error),
            Self::MaxBuffer { option_name, max } => {
                write!(f, "exceeded `maxBuffer` ({}) on `{}`", max, option_name)
            }
            Self::Cancelled => f.write_str("was cancelled"),
        }
    }
}

/// A failed run: the cause plus everything that was collected
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    #[serde(flatten)]
    pub cause: FailureCause,
    pub output: Output,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command {}: {}", self.cause, self.output.command)
    }
}

/// Result of a run, populated on success and failure alike
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Output {
    pub command: String,
    #[serde(skip_serializing_if = "is_none")]
    pub pid: Option<Pid>,
    #[serde(skip_serializing_if = "is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "is_none")]
    pub signal: Option<i32>,
    /// Buffered output per descriptor index; `None` where nothing was collected
    #[serde(serialize_with = "lossy_text_slots")]
    pub stdio: Vec<Option<Vec<u8>>>,
    /// Interleaved stdout and stderr, when requested
    #[serde(skip_serializing_if = "is_none", serialize_with = "lossy_text")]
    pub all: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "is_empty_vec")]
    pub ipc_output: Vec<Message>,
    #[serde(skip_serializing_if = "is_false")]
    pub cancelled: bool,
}

impl Output {
    /// Buffered output of one descriptor
    pub fn fd(&self, index: usize) -> Option<&[u8]> {
        self.stdio.get(index).and_then(|slot| slot.as_deref())
    }

    pub fn stdout(&self) -> Option<&[u8]> {
        self.fd(1)
    }

    pub fn stderr(&self) -> Option<&[u8]> {
        self.fd(2)
    }

    /// Stdout as text, empty if it was not buffered
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(self.stdout().unwrap_or_default()).into_owned()
    }

    /// Stderr as text, empty if it was not buffered
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(self.stderr().unwrap_or_default()).into_owned()
    }

    pub fn all_text(&self) -> Option<String> {
        self.all
            .as_deref()
            .map(|all| String::from_utf8_lossy(all).into_owned())
    }
}

/// Spawn options
#[derive(Debug)]
pub struct Options {
    pub stdio: StdioOptions,
    /// Message sent as soon as the channel opens
    pub ipc_input: Option<Message>,
    /// Bytes per descriptor and messages for IPC; defaults differ per kind
    pub max_buffer: Option<Size>,
    /// Collect stdout and stderr interleaved
    pub all: bool,
    pub strip_final_newline: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Start from the parent's environment instead of an empty one
    pub extend_env: bool,
    pub cancel_signal: Option<CancellationToken>,
    pub extensions: ExtensionTable,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stdio: StdioOptions::default(),
            ipc_input: None,
            max_buffer: None,
            all: false,
            strip_final_newline: true,
            cwd: None,
            env: Vec::new(),
            extend_env: true,
            cancel_signal: None,
            extensions: ExtensionTable::default(),
        }
    }
}

impl Options {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stdio(mut self, stdio: StdioConfig) -> Self {
        self.stdio.stdio = Some(stdio);
        self
    }

    /// One value per descriptor, extra descriptors allowed
    #[must_use]
    pub fn with_stdio_array(mut self, slots: Vec<StdioOption>) -> Self {
        self.stdio.stdio = Some(StdioConfig::PerFd(slots));
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<StdioOption>) -> Self {
        self.stdio.stdin = Some(stdin.into());
        self
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<StdioOption>) -> Self {
        self.stdio.stdout = Some(stdout.into());
        self
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<StdioOption>) -> Self {
        self.stdio.stderr = Some(stderr.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: impl Into<Payload>) -> Self {
        self.stdio.input = Some(input.into());
        self
    }

    #[must_use]
    pub fn with_input_file(mut self, input_file: impl Into<InputFile>) -> Self {
        self.stdio.input_file = Some(input_file.into());
        self
    }

    #[must_use]
    pub fn with_ipc(mut self, ipc: bool) -> Self {
        self.stdio.ipc = ipc;
        self
    }

    /// Implies `ipc`
    #[must_use]
    pub fn with_ipc_input(mut self, message: Message) -> Self {
        self.stdio.ipc = true;
        self.ipc_input = Some(message);
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: impl Into<BufferOption>) -> Self {
        self.stdio.buffer = buffer.into();
        self
    }

    #[must_use]
    pub fn with_max_buffer(mut self, max_buffer: Size) -> Self {
        self.max_buffer = Some(max_buffer);
        self
    }

    #[must_use]
    pub fn with_all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    #[must_use]
    pub fn with_strip_final_newline(mut self, strip: bool) -> Self {
        self.strip_final_newline = strip;
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_extend_env(mut self, extend: bool) -> Self {
        self.extend_env = extend;
        self
    }

    #[must_use]
    pub fn with_cancel_signal(mut self, token: CancellationToken) -> Self {
        self.cancel_signal = Some(token);
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionTable) -> Self {
        self.extensions = extensions;
        self
    }

    /// Byte limit for each buffered descriptor
    pub fn stream_limit(&self) -> Size {
        self.max_buffer.unwrap_or(DEFAULT_MAX_BUFFER)
    }

    /// Message limit for the IPC output log
    pub fn ipc_limit(&self) -> Size {
        self.max_buffer.unwrap_or(DEFAULT_MAX_IPC_MESSAGES)
    }
}
