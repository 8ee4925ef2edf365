/*!
 * Message Channel Tests
 * Ordering, backpressure and failure propagation between two channel ends
 */

use futures::StreamExt;
use pretty_assertions::assert_eq;
use procbridge::ipc::encode_frame;
use procbridge::{ChannelConfig, ChannelState, IpcError, MessageChannel};
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_concurrent_sends_arrive_in_call_order() {
    let (parent, child) = MessageChannel::pair(ChannelConfig::default()).unwrap();

    let sends: Vec<_> = (0..50).map(|i| child.send(json!(i))).collect();
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    let received: Vec<_> = parent.receive_all().take(50).collect().await;
    assert_eq!(received, (0..50).map(|i| json!(i)).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_large_messages_apply_backpressure_without_loss() {
    let (parent, child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    let payload = "x".repeat(256 * 1024);

    let sender = tokio::spawn({
        let child = child.clone();
        let payload = payload.clone();
        async move {
            for i in 0..8 {
                child.send(json!({"i": i, "payload": payload})).await?;
            }
            Ok::<_, IpcError>(())
        }
    });

    for i in 0..8 {
        let message = parent.receive_next().await.unwrap();
        assert_eq!(message["i"], i);
        assert_eq!(message["payload"].as_str().map(str::len), Some(payload.len()));
    }
    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_receive_all_ends_when_peer_disconnects() {
    let (parent, child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    child.send(json!("a")).await.unwrap();
    child.send(json!("b")).await.unwrap();
    child.disconnect().await;

    let received: Vec<_> = parent.receive_all().collect().await;
    assert_eq!(received, vec![json!("a"), json!("b")]);
    assert_eq!(parent.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_send_after_disconnect_is_channel_closed() {
    let (parent, _child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    parent.disconnect().await;
    assert_eq!(parent.send(json!("late")).await, Err(IpcError::ChannelClosed));
    assert_eq!(parent.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_abort_wakes_waiting_receiver() {
    let (parent, _child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    let waiting = tokio::spawn({
        let parent = parent.clone();
        async move { parent.receive_next().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.abort();
    assert_eq!(waiting.await.unwrap(), None);
}

#[tokio::test]
async fn test_truncated_frame_breaks_channel_but_keeps_queue() {
    let (socket, mut raw) = tokio::net::UnixStream::pair().unwrap();
    let channel = MessageChannel::from_stream(socket, ChannelConfig::default());

    let frame = encode_frame(&json!("whole")).unwrap();
    raw.write_all(&frame).await.unwrap();
    raw.write_all(&frame[..3]).await.unwrap();
    drop(raw);
    channel.finished().await;

    assert!(matches!(channel.error(), Some(IpcError::BrokenPipe(_))));
    assert_eq!(channel.receive_next().await, Some(json!("whole")));
    assert_eq!(channel.receive_next().await, None);
    assert_eq!(channel.buffered_log(), vec![json!("whole")]);
}

#[tokio::test]
async fn test_timeout_then_receive() {
    let (parent, child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    for _ in 0..3 {
        assert!(matches!(
            parent.receive_timeout(Duration::from_millis(5)).await,
            Err(IpcError::Timeout { .. })
        ));
    }
    child.send(json!(1)).await.unwrap();
    assert_eq!(
        parent.receive_timeout(Duration::from_secs(5)).await,
        Ok(Some(json!(1)))
    );
}

#[tokio::test]
async fn test_abort_freezes_log_with_frames_in_flight() {
    let (parent, child) = MessageChannel::pair(ChannelConfig::default()).unwrap();
    child.send(json!("warm")).await.unwrap();
    assert_eq!(parent.receive_next().await, Some(json!("warm")));

    for i in 0..20 {
        child.send(json!(i)).await.unwrap();
    }
    tokio::task::yield_now().await;
    parent.abort();
    assert_eq!(parent.state(), ChannelState::Closed);
    let logged = parent.buffered_log().len();

    parent.finished().await;
    assert_eq!(parent.buffered_log().len(), logged);
    assert_eq!(parent.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_abort_fails_send_blocked_on_backpressure() {
    let (socket, _unread) = tokio::net::UnixStream::pair().unwrap();
    let channel = MessageChannel::from_stream(socket, ChannelConfig::default());
    let payload = "x".repeat(4 * 1024 * 1024);

    let sender = tokio::spawn({
        let channel = channel.clone();
        async move {
            for _ in 0..8 {
                channel.send(json!(payload)).await?;
            }
            Ok::<_, IpcError>(())
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sender.is_finished());

    channel.abort();
    let result = tokio::time::timeout(Duration::from_secs(2), sender)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(IpcError::ChannelClosed));
}
