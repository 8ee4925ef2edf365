/*!
 * Process Executor
 * Spawns a subprocess from a resolved stdio plan and collects its output
 */

use super::fds::Wiring;
use super::pump::{collect_output, feed_input, strip_final_newline, Collected, OutputBuffer, SharedBuffer};
use super::types::{Failure, FailureCause, Options, Output, ProcessError, ProcessResult};
use crate::core::limits::IPC_FD_ENV;
use crate::core::types::{Pid, Size};
use crate::ipc::{ChannelConfig, IpcError, IpcResult, Message, MessageChannel};
use crate::monitoring::OperationSpan;
use crate::stdio::{
    BufferOption, OutputBridge, PlanBuilder, ResolvedStream, StdioDescriptor, StdioMode,
};
use futures::Stream;
use parking_lot::Mutex;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Background task tied to one descriptor
struct Task<T> {
    index: usize,
    option_name: String,
    handle: JoinHandle<T>,
}

/// Streams attached to a freshly spawned child
#[derive(Default)]
struct Attached {
    stdin: Option<ChildStdin>,
    feeders: Vec<Task<io::Result<()>>>,
    collectors: Vec<Task<Collected>>,
    channel: Option<MessageChannel>,
}

/// Settings the attach step needs from the options
struct AttachSettings<'a> {
    buffer: &'a BufferOption,
    stream_limit: Size,
    ipc_limit: Size,
    all: Option<SharedBuffer>,
}

/// A running subprocess
pub struct Subprocess {
    command: String,
    child: Child,
    pid: Option<Pid>,
    slot_count: usize,
    stdin: Option<ChildStdin>,
    feeders: Vec<Task<io::Result<()>>>,
    collectors: Vec<Task<Collected>>,
    channel: Option<MessageChannel>,
    ipc_input: Option<JoinHandle<IpcResult<()>>>,
    ipc_limit: Size,
    all: Option<SharedBuffer>,
    strip_final_newline: bool,
    cancel: Option<CancellationToken>,
    span: OperationSpan,
}

/// Spawn `command` with `args`
///
/// The stdio plan is resolved first; configuration errors are returned
/// before any process exists. Must be called within a tokio runtime.
pub fn spawn<I, S>(command: &str, args: I, options: Options) -> ProcessResult<Subprocess>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    validate_command(command)?;
    let args: Vec<OsString> = args.into_iter().map(|arg| arg.as_ref().to_os_string()).collect();
    let command_line = command_line(command, &args);

    // Lives as long as the child, so a long run is not a slow operation
    let span = OperationSpan::new("spawn").with_slow_threshold(None);
    span.record("command", &command_line);

    let stream_limit = options.stream_limit();
    let ipc_limit = options.ipc_limit();
    let Options {
        stdio,
        ipc_input,
        all,
        strip_final_newline,
        cwd,
        env,
        extend_env,
        cancel_signal,
        extensions,
        ..
    } = options;

    let cwd = match cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().map_err(|e| ProcessError::SpawnFailed(e.to_string()))?,
    };
    let buffer = stdio.buffer.clone();

    let plan = PlanBuilder::new(&cwd)
        .with_extensions(extensions)
        .build(stdio)
        .map_err(|err| {
            span.record_error(&err.to_string());
            err
        })?;
    let ipc_index = plan.ipc_index();
    let slot_count = plan.len();
    let (descriptors, modes) = plan.into_parts();

    let mut wiring = Wiring::prepare(&modes)
        .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", command_line, e)))?;

    let mut cmd = Command::new(command);
    cmd.args(&args).current_dir(&cwd);
    if !extend_env {
        cmd.env_clear();
    }
    cmd.envs(env);
    if let Some(index) = ipc_index {
        cmd.env(IPC_FD_ENV, index.to_string());
    }
    wiring.install(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| {
        span.record_error(&e.to_string());
        ProcessError::SpawnFailed(format!("{}: {}", command_line, e))
    })?;
    drop(cmd);

    let pid = child.id();
    if let Some(pid) = pid {
        span.record_pid(pid);
    }
    info!(command = %command_line, pid = ?pid, descriptors = slot_count, "spawned subprocess");

    let all = (all && buffer.for_slot("all")).then(|| Arc::new(Mutex::new(OutputBuffer::new(stream_limit))));
    let settings = AttachSettings {
        buffer: &buffer,
        stream_limit,
        ipc_limit,
        all: all.clone(),
    };

    let attached = match attach(&mut child, &mut wiring, descriptors, &modes, &settings, &span) {
        Ok(attached) => attached,
        Err(err) => {
            let _ = child.start_kill();
            span.record_error(&err.to_string());
            return Err(ProcessError::SpawnFailed(format!("{}: {}", command_line, err)));
        }
    };
    // Child-side descriptor ends must close in the parent or EOF never arrives
    drop(wiring);

    let ipc_input = match (ipc_input, attached.channel.clone()) {
        (Some(message), Some(channel)) => Some(tokio::spawn(
            async move { channel.send(message).await }.instrument(span.span().clone()),
        )),
        _ => None,
    };

    Ok(Subprocess {
        command: command_line,
        child,
        pid,
        slot_count,
        stdin: attached.stdin,
        feeders: attached.feeders,
        collectors: attached.collectors,
        channel: attached.channel,
        ipc_input,
        ipc_limit,
        all,
        strip_final_newline,
        cancel: cancel_signal,
        span,
    })
}

/// Spawn and wait
pub async fn run<I, S>(command: &str, args: I, options: Options) -> ProcessResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    spawn(command, args, options)?.wait().await
}

/// Start feeders, collectors and the message channel for each descriptor
fn attach(
    child: &mut Child,
    wiring: &mut Wiring,
    descriptors: Vec<StdioDescriptor>,
    modes: &[StdioMode],
    settings: &AttachSettings<'_>,
    span: &OperationSpan,
) -> io::Result<Attached> {
    let mut attached = Attached::default();

    for descriptor in descriptors {
        let StdioDescriptor {
            index,
            option_name,
            resolved,
            ..
        } = descriptor;
        let piped = modes.get(index).copied().is_some_and(StdioMode::is_piped);

        match (index, resolved) {
            (_, Some(ResolvedStream::Ipc(bridge))) => {
                let end = wiring
                    .take_parent_end(index)
                    .ok_or_else(|| missing_end(&option_name))?;
                let config = ChannelConfig::default()
                    .with_buffer(bridge.buffer)
                    .with_max_buffered(settings.ipc_limit);
                let channel = MessageChannel::from_std(end, config)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                debug!(option_name = %option_name, buffer = bridge.buffer, "IPC channel opened");
                attached.channel = Some(channel);
            }
            (0, Some(ResolvedStream::Input(bridge))) => {
                if let Some(stdin) = child.stdin.take() {
                    let handle = tokio::spawn(feed_input(bridge, stdin).instrument(span.span().clone()));
                    attached.feeders.push(Task {
                        index,
                        option_name,
                        handle,
                    });
                }
            }
            (0, _) => attached.stdin = child.stdin.take(),
            (_, resolved) if piped => {
                let bridge = match resolved {
                    Some(ResolvedStream::Output(bridge)) => bridge,
                    _ => OutputBridge::passthrough(settings.buffer.for_slot(&option_name)),
                };
                let all = if index == 1 || index == 2 {
                    settings.all.clone()
                } else {
                    None
                };
                let limit = settings.stream_limit;
                let collector = match index {
                    1 => child
                        .stdout
                        .take()
                        .map(|out| tokio::spawn(collect_output(out, bridge, limit, all).instrument(span.span().clone()))),
                    2 => child
                        .stderr
                        .take()
                        .map(|err| tokio::spawn(collect_output(err, bridge, limit, all).instrument(span.span().clone()))),
                    _ => {
                        let end = wiring
                            .take_parent_end(index)
                            .ok_or_else(|| missing_end(&option_name))?;
                        end.set_nonblocking(true)?;
                        let stream = tokio::net::UnixStream::from_std(end)?;
                        Some(tokio::spawn(
                            collect_output(stream, bridge, limit, all).instrument(span.span().clone()),
                        ))
                    }
                };
                if let Some(handle) = collector {
                    attached.collectors.push(Task {
                        index,
                        option_name,
                        handle,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(attached)
}

fn missing_end(option_name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no parent end for `{}`", option_name),
    )
}

impl Subprocess {
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Display form of the command line
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Trace ID correlating this subprocess in logs
    pub fn trace_id(&self) -> &str {
        self.span.trace_id()
    }

    /// The message channel, when messaging is enabled
    pub fn ipc(&self) -> Option<&MessageChannel> {
        self.channel.as_ref()
    }

    /// The child's stdin when it is a plain pipe with no bridged input
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    fn channel(&self) -> IpcResult<&MessageChannel> {
        self.channel
            .as_ref()
            .ok_or_else(|| IpcError::Disabled("the subprocess was spawned without `ipc`".to_string()))
    }

    pub async fn send_message(&self, message: Message) -> IpcResult<()> {
        self.channel()?.send(message).await
    }

    pub async fn get_one_message(&self) -> IpcResult<Option<Message>> {
        Ok(self.channel()?.receive_next().await)
    }

    pub async fn get_one_message_timeout(&self, timeout: Duration) -> IpcResult<Option<Message>> {
        self.channel()?.receive_timeout(timeout).await
    }

    /// Every message the child sends from now until the channel closes
    pub fn get_each_message(&self) -> IpcResult<impl Stream<Item = Message> + Send + 'static> {
        Ok(self.channel()?.receive_all())
    }

    /// Kill the child and force-close its message channel
    pub fn kill(&mut self) -> ProcessResult<()> {
        self.child
            .start_kill()
            .map_err(|e| ProcessError::KillFailed(format!("{}: {}", self.command, e)))?;
        if let Some(channel) = &self.channel {
            channel.abort();
        }
        info!(command = %self.command, pid = ?self.pid, "killed subprocess");
        Ok(())
    }

    /// Wait for exit and for every descriptor to drain
    ///
    /// Output is populated on success and failure alike; a failed run
    /// returns it inside `ProcessError::Failed`.
    pub async fn wait(mut self) -> ProcessResult<Output> {
        drop(self.stdin.take());

        let exited = match self.cancel.clone() {
            Some(token) => tokio::select! {
                status = self.child.wait() => Some(status),
                _ = token.cancelled() => None,
            },
            None => Some(self.child.wait().await),
        };
        let mut outcome = Outcome::default();
        let status = match exited {
            Some(status) => status,
            None => {
                warn!(command = %self.command, "subprocess cancelled");
                outcome.cancelled = true;
                let _ = self.child.start_kill();
                if let Some(channel) = &self.channel {
                    channel.abort();
                }
                self.child.wait().await
            }
        }
        .map_err(|e| ProcessError::WaitFailed(format!("{}: {}", self.command, e)))?;
        outcome.exit_code = status.code();
        outcome.signal = status.signal();

        for task in self.feeders.drain(..) {
            let result = match task.handle.await {
                Ok(result) => result,
                Err(join) => Err(io::Error::new(io::ErrorKind::Other, join.to_string())),
            };
            if let Err(err) = result {
                warn!(option_name = %task.option_name, error = %err, "input stream failed");
                outcome.stream_error(&task.option_name, err.to_string());
            }
        }

        let mut stdio: Vec<Option<Vec<u8>>> = vec![None; self.slot_count];
        for task in self.collectors.drain(..) {
            let collected = match task.handle.await {
                Ok(collected) => collected,
                Err(join) => Collected {
                    buffer: None,
                    result: Err(io::Error::new(io::ErrorKind::Other, join.to_string())),
                },
            };
            if let Err(err) = collected.result {
                warn!(option_name = %task.option_name, error = %err, "output stream failed");
                outcome.stream_error(&task.option_name, err.to_string());
            }
            if let Some(buffer) = collected.buffer {
                if buffer.overflowed() {
                    outcome.max_buffer(&task.option_name, buffer.max());
                }
                if let Some(slot) = stdio.get_mut(task.index) {
                    *slot = Some(buffer.into_inner());
                }
            }
        }

        let all = self.all.take().map(|shared| {
            let buffer = std::mem::replace(&mut *shared.lock(), OutputBuffer::new(0));
            if buffer.overflowed() {
                outcome.max_buffer("all", buffer.max());
            }
            buffer.into_inner()
        });

        if let Some(handle) = self.ipc_input.take() {
            match handle.await {
                Ok(Err(IpcError::ChannelClosed)) | Ok(Ok(())) => {}
                Ok(Err(err)) => outcome.ipc_error(err),
                Err(join) => outcome.ipc_error(IpcError::BrokenPipe(join.to_string())),
            }
        }

        let mut ipc_output = Vec::new();
        if let Some(channel) = &self.channel {
            channel.finished().await;
            ipc_output = channel.buffered_log();
            if let Some(err) = channel.error() {
                outcome.ipc_error(err);
            }
            if channel.overflowed() {
                outcome.max_buffer("ipc", self.ipc_limit);
            }
            channel.disconnect().await;
        }

        let mut all = all;
        if self.strip_final_newline {
            stdio.iter_mut().flatten().for_each(strip_final_newline);
            all.iter_mut().for_each(strip_final_newline);
        }

        let output = Output {
            command: self.command.clone(),
            pid: self.pid,
            exit_code: outcome.exit_code,
            signal: outcome.signal,
            stdio,
            all,
            ipc_output,
            cancelled: outcome.cancelled,
        };

        match outcome.cause() {
            None => {
                info!(command = %self.command, exit_code = ?output.exit_code, "subprocess succeeded");
                self.span.record_result(true);
                Ok(output)
            }
            Some(cause) => {
                warn!(command = %self.command, cause = %cause, "subprocess failed");
                self.span.record_error(&cause.to_string());
                Err(ProcessError::Failed(Box::new(Failure { cause, output })))
            }
        }
    }
}

impl std::fmt::Debug for Subprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subprocess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("descriptors", &self.slot_count)
            .field("ipc", &self.channel.is_some())
            .finish()
    }
}

/// Everything that can make a run fail, gathered while waiting
#[derive(Debug, Default)]
struct Outcome {
    cancelled: bool,
    stream_error: Option<(String, String)>,
    max_buffer: Option<(String, Size)>,
    ipc_error: Option<IpcError>,
    signal: Option<i32>,
    exit_code: Option<i32>,
}

impl Outcome {
    fn stream_error(&mut self, option_name: &str, message: String) {
        self.stream_error.get_or_insert_with(|| (option_name.to_string(), message));
    }

    fn max_buffer(&mut self, option_name: &str, max: Size) {
        self.max_buffer.get_or_insert_with(|| (option_name.to_string(), max));
    }

    fn ipc_error(&mut self, error: IpcError) {
        self.ipc_error.get_or_insert(error);
    }

    /// First applicable cause, most specific first
    fn cause(&self) -> Option<FailureCause> {
        if self.cancelled {
            return Some(FailureCause::Cancelled);
        }
        if let Some((option_name, message)) = &self.stream_error {
            return Some(FailureCause::Stream {
                option_name: option_name.clone(),
                message: message.clone(),
            });
        }
        if let Some((option_name, max)) = &self.max_buffer {
            return Some(FailureCause::MaxBuffer {
                option_name: option_name.clone(),
                max: *max,
            });
        }
        if let Some(error) = &self.ipc_error {
            return Some(FailureCause::Ipc { error: error.clone() });
        }
        if let Some(signal) = self.signal {
            return Some(FailureCause::Signal { signal });
        }
        match self.exit_code {
            Some(0) => None,
            Some(code) => Some(FailureCause::ExitCode { code }),
            None => Some(FailureCause::ExitCode { code: -1 }),
        }
    }
}

/// Validate command before spawning
fn validate_command(command: &str) -> ProcessResult<()> {
    if command.trim().is_empty() {
        return Err(ProcessError::InvalidCommand("Empty command".to_string()));
    }
    if command.contains('\0') {
        return Err(ProcessError::InvalidCommand(
            "Command contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

/// Shell-like display form of a command line
fn command_line(command: &str, args: &[OsString]) -> String {
    std::iter::once(quote(command))
        .chain(args.iter().map(|arg| quote(&arg.to_string_lossy())))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(part: &str) -> String {
    let plain = !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', r"'\''"))
    }
}
