/*!
 * Message Channel
 * Ordered, framed message exchange over a duplex socket
 *
 * One reader task decodes frames and hands each message to the oldest
 * waiting receiver, or queues it. Sends are serialized through an async
 * mutex, which is FIFO-fair, so concurrent sends flush in call order and a
 * full socket buffer suspends the sender.
 */

use super::codec::MessageCodec;
use super::types::{ChannelConfig, ChannelState, IpcError, IpcResult, Message};
use crate::core::limits::IPC_READ_BUFFER_SIZE;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Waiter = oneshot::Sender<Option<Message>>;

struct Inner {
    state: ChannelState,
    pending: VecDeque<Message>,
    waiters: VecDeque<Waiter>,
    log: Vec<Message>,
    overflowed: bool,
    error: Option<IpcError>,
}

impl Inner {
    /// Hand a message to the oldest live waiter, or queue it
    ///
    /// Waiters whose receive was abandoned give the message back and the
    /// next one is tried.
    fn dispatch(&mut self, message: Message, front: bool) {
        let mut next = Some(message);
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(next.take()) {
                Ok(()) => return,
                Err(returned) => next = returned,
            }
        }
        if let Some(message) = next {
            if front {
                self.pending.push_front(message);
            } else {
                self.pending.push_back(message);
            }
        }
    }

    fn settle(&mut self) {
        if self.state == ChannelState::Draining && self.pending.is_empty() {
            self.state = ChannelState::Closed;
        }
        if self.state == ChannelState::Closed && self.pending.is_empty() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(None);
            }
        }
    }

    fn stop_reading(&mut self) {
        if self.state == ChannelState::Open {
            self.state = ChannelState::Draining;
        }
        self.settle();
    }

    fn force_close(&mut self) {
        self.state = ChannelState::Closed;
        self.settle();
    }
}

struct Shared {
    inner: Mutex<Inner>,
    writer: AsyncMutex<Option<FramedWrite<OwnedWriteHalf, MessageCodec>>>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    config: ChannelConfig,
}

impl Shared {
    fn deliver(&self, message: Message) {
        let mut inner = self.inner.lock();
        // Log and queue are frozen once closed
        if inner.state == ChannelState::Closed {
            return;
        }
        if self.config.buffer {
            if inner.log.len() < self.config.max_buffered {
                inner.log.push(message.clone());
            } else if !inner.overflowed {
                warn!(max = self.config.max_buffered, "IPC output log is full");
                inner.overflowed = true;
            }
        }
        inner.dispatch(message, false);
    }

    fn requeue(&self, message: Message) {
        let mut inner = self.inner.lock();
        inner.dispatch(message, true);
    }

    fn fail(&self, error: IpcError) {
        warn!(%error, "IPC channel failed");
        {
            let mut inner = self.inner.lock();
            if inner.error.is_none() {
                inner.error = Some(error);
            }
            inner.stop_reading();
        }
        self.cancel.cancel();
    }
}

/// Receive in progress; puts the message back if abandoned after delivery
struct PendingReceive<'a> {
    rx: Option<oneshot::Receiver<Option<Message>>>,
    shared: &'a Shared,
}

impl Drop for PendingReceive<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(Some(message)) = rx.try_recv() {
                self.shared.requeue(message);
            }
        }
    }
}

/// Handle to a message channel; clones share the same channel
#[derive(Clone)]
pub struct MessageChannel {
    shared: Arc<Shared>,
}

impl MessageChannel {
    /// Layer a channel over a connected socket and start its reader task
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream(stream: UnixStream, config: ChannelConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        let codec = MessageCodec::with_max_message_size(config.max_message_size);
        let (done_tx, done_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ChannelState::Open,
                pending: VecDeque::new(),
                waiters: VecDeque::new(),
                log: Vec::new(),
                overflowed: false,
                error: None,
            }),
            writer: AsyncMutex::new(Some(FramedWrite::new(write_half, codec))),
            cancel: CancellationToken::new(),
            done: done_rx,
            config,
        });

        let frames = FramedRead::with_capacity(read_half, codec, IPC_READ_BUFFER_SIZE);
        tokio::spawn(read_loop(Arc::clone(&shared), frames, done_tx));

        Self { shared }
    }

    /// Layer a channel over a std socket, e.g. one end of a socketpair
    pub fn from_std(stream: std::os::unix::net::UnixStream, config: ChannelConfig) -> IpcResult<Self> {
        stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(stream)?;
        Ok(Self::from_stream(stream, config))
    }

    /// Two connected channels, handy for in-process use and tests
    pub fn pair(config: ChannelConfig) -> IpcResult<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_stream(a, config), Self::from_stream(b, config)))
    }

    /// Send one message
    ///
    /// Fails with `ChannelClosed` once the channel is not open. A write
    /// failure breaks the channel for every user.
    pub async fn send(&self, message: Message) -> IpcResult<()> {
        if !self.state().is_open() {
            return Err(IpcError::ChannelClosed);
        }

        let shared = &self.shared;
        let write = async {
            let mut writer = shared.writer.lock().await;
            if !shared.inner.lock().state.is_open() {
                return Err(IpcError::ChannelClosed);
            }
            let sink = writer.as_mut().ok_or(IpcError::ChannelClosed)?;
            sink.send(message).await
        };

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => Err(IpcError::ChannelClosed),
            result = write => result,
        };

        match result {
            Ok(()) => {
                debug!("IPC message sent");
                Ok(())
            }
            Err(IpcError::ChannelClosed) => Err(IpcError::ChannelClosed),
            Err(err @ (IpcError::FrameTooLarge { .. } | IpcError::Serialization(_))) => Err(err),
            Err(err) => {
                shared.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Next unconsumed message, or `None` once the channel is done
    pub async fn receive_next(&self) -> Option<Message> {
        let rx = {
            let mut inner = self.shared.inner.lock();
            if let Some(message) = inner.pending.pop_front() {
                inner.settle();
                return Some(message);
            }
            if inner.state == ChannelState::Closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        let mut receive = PendingReceive {
            rx: Some(rx),
            shared: &self.shared,
        };
        let message = match receive.rx.as_mut() {
            Some(rx) => rx.await.ok().flatten(),
            None => None,
        };
        receive.rx = None;
        message
    }

    /// `receive_next` bounded by a timeout
    ///
    /// A timeout leaves the queue untouched: a message arriving later goes
    /// to the next receiver.
    pub async fn receive_timeout(&self, timeout: Duration) -> IpcResult<Option<Message>> {
        let start = Instant::now();
        tokio::time::timeout(timeout, self.receive_next())
            .await
            .map_err(|_| IpcError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    /// Every subsequent message until the channel closes
    pub fn receive_all(&self) -> impl Stream<Item = Message> + Send + 'static {
        let channel = self.clone();
        async_stream::stream! {
            while let Some(message) = channel.receive_next().await {
                yield message;
            }
        }
    }

    /// Messages received so far, when buffering is enabled
    pub fn buffered_log(&self) -> Vec<Message> {
        self.shared.inner.lock().log.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.inner.lock().state
    }

    /// Transport error that broke the channel, if any
    pub fn error(&self) -> Option<IpcError> {
        self.shared.inner.lock().error.clone()
    }

    /// Whether the output log hit its bound and dropped messages
    pub fn overflowed(&self) -> bool {
        self.shared.inner.lock().overflowed
    }

    pub fn config(&self) -> ChannelConfig {
        self.shared.config
    }

    /// Wait until the reader task has stopped
    pub async fn finished(&self) {
        let mut done = self.shared.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    /// Close the channel and release the socket
    ///
    /// Pending sends fail with `ChannelClosed`; already-received messages
    /// stay available to `receive_next`.
    pub async fn disconnect(&self) {
        self.shared.inner.lock().force_close();
        self.shared.cancel.cancel();
        self.shared.writer.lock().await.take();
        self.finished().await;
    }

    /// Synchronous close used when the owning process is killed
    pub fn abort(&self) {
        self.shared.inner.lock().force_close();
        self.shared.cancel.cancel();
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            writer.take();
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("MessageChannel")
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .field("waiters", &inner.waiters.len())
            .field("logged", &inner.log.len())
            .finish()
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut frames: FramedRead<OwnedReadHalf, MessageCodec>,
    done: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                shared.inner.lock().stop_reading();
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(message)) => {
                    debug!("IPC message received");
                    shared.deliver(message);
                }
                Some(Err(IpcError::ChannelClosed)) => {
                    debug!("IPC peer closed the connection");
                    shared.inner.lock().stop_reading();
                    break;
                }
                Some(Err(err)) => {
                    shared.fail(err);
                    break;
                }
                None => {
                    debug!("IPC channel reached end of stream");
                    shared.inner.lock().stop_reading();
                    break;
                }
            }
        }
    }
    let _ = done.send(true);
}
