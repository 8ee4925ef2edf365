/*!
 * Child-side IPC
 * Lets a subprocess talk back over the descriptor its parent opened
 */

use super::channel::MessageChannel;
use super::types::{ChannelConfig, IpcError, IpcResult, Message};
use crate::core::limits::IPC_FD_ENV;
use parking_lot::Mutex;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::OnceLock;
use tracing::info;

static CHANNEL: OnceLock<Mutex<Option<MessageChannel>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<MessageChannel>> {
    CHANNEL.get_or_init(|| Mutex::new(None))
}

/// Descriptor number exported by the parent, if messaging is enabled
pub fn ipc_fd() -> IpcResult<RawFd> {
    let value = std::env::var(IPC_FD_ENV)
        .map_err(|_| IpcError::Disabled(format!("{} is not set", IPC_FD_ENV)))?;
    value
        .trim()
        .parse::<RawFd>()
        .map_err(|_| IpcError::Connect(format!("{}={} is not a descriptor number", IPC_FD_ENV, value)))
}

/// Channel to the parent, opened on first use and shared afterwards
///
/// Must be called within a tokio runtime. The child does not keep a log of
/// what it receives.
pub fn connect() -> IpcResult<MessageChannel> {
    let mut slot = slot().lock();
    if let Some(channel) = slot.as_ref() {
        return Ok(channel.clone());
    }

    let fd = ipc_fd()?;
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(IpcError::Connect(format!(
            "descriptor {} is not open: {}",
            fd,
            std::io::Error::last_os_error()
        )));
    }

    // SAFETY: the descriptor is open and handed to us by the parent; from
    // here on this process owns it
    let stream = unsafe { UnixStream::from_raw_fd(fd) };
    let channel = MessageChannel::from_std(stream, ChannelConfig::default().with_buffer(false))?;
    info!(fd, "connected to parent IPC channel");
    *slot = Some(channel.clone());
    Ok(channel)
}

/// Send one message to the parent
pub async fn send_message(message: Message) -> IpcResult<()> {
    connect()?.send(message).await
}

/// Next message from the parent, `None` once the parent disconnects
pub async fn get_one_message() -> IpcResult<Option<Message>> {
    Ok(connect()?.receive_next().await)
}

/// Close the channel so the parent sees end of stream
pub async fn disconnect() {
    let channel = slot().lock().take();
    if let Some(channel) = channel {
        channel.disconnect().await;
    }
}
