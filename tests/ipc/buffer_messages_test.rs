/*!
 * IPC Output Buffering Tests
 * `ipc_output` on success and failure, driven by `sh` children that speak
 * the frame format over fd 3
 */

use pretty_assertions::assert_eq;
use procbridge::{run, spawn, BufferOption, FailureCause, Options, ProcessError};
use serde_json::json;
use std::time::Duration;

/// Frame carrying the JSON string `"foo"`
const FOO_FRAME: &str = r#"\000\000\000\005"foo""#;

fn sh(script: &str) -> [String; 2] {
    ["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn test_parent_sends_child_echoes() {
    // 4-byte header + 5-byte payload
    let process = spawn("sh", sh("head -c 9 <&3 >&3"), Options::new().with_ipc(true)).unwrap();

    process.send_message(json!("foo")).await.unwrap();
    let echoed = process
        .get_one_message_timeout(Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(echoed, Some(json!("foo")));

    let output = process.wait().await.unwrap();
    assert_eq!(output.ipc_output, vec![json!("foo")]);
}

#[tokio::test]
async fn test_child_sends_twice() {
    let script = format!("printf '{0}{0}' >&3", FOO_FRAME);
    let output = run("sh", sh(&script), Options::new().with_ipc(true)).await.unwrap();
    assert_eq!(output.ipc_output, vec![json!("foo"), json!("foo")]);
}

#[tokio::test]
async fn test_failure_keeps_ipc_output() {
    let script = format!("printf '{}' >&3; exit 1", FOO_FRAME);
    let err = run("sh", sh(&script), Options::new().with_ipc(true))
        .await
        .unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(failure.cause, FailureCause::ExitCode { code: 1 });
            assert_eq!(failure.output.ipc_output, vec![json!("foo")]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_without_buffer_has_empty_ipc_output() {
    let script = format!("printf '{}' >&3; exit 1", FOO_FRAME);
    let err = run(
        "sh",
        sh(&script),
        Options::new().with_ipc(true).with_buffer(false),
    )
    .await
    .unwrap_err();
    let output = err.output().unwrap();
    assert!(output.ipc_output.is_empty());
}

#[tokio::test]
async fn test_ipc_buffer_off_keeps_stdout() {
    let script = format!("printf foo; printf '{}' >&3", FOO_FRAME);
    let output = run(
        "sh",
        sh(&script),
        Options::new()
            .with_ipc(true)
            .with_buffer(BufferOption::per_slot([("ipc", false)])),
    )
    .await
    .unwrap();
    assert!(output.ipc_output.is_empty());
    assert_eq!(output.stdout_text(), "foo");
}

#[tokio::test]
async fn test_stdout_buffer_off_keeps_ipc_output() {
    let script = format!("printf foo; printf '{}' >&3", FOO_FRAME);
    let output = run(
        "sh",
        sh(&script),
        Options::new()
            .with_ipc(true)
            .with_buffer(BufferOption::per_slot([("stdout", false)])),
    )
    .await
    .unwrap();
    assert_eq!(output.ipc_output, vec![json!("foo")]);
    assert_eq!(output.stdout(), None);
}

#[tokio::test]
async fn test_ipc_output_empty_without_ipc() {
    let output = run("sh", sh("printf foo"), Options::new()).await.unwrap();
    assert!(output.ipc_output.is_empty());

    let err = run("sh", sh("exit 2"), Options::new()).await.unwrap_err();
    assert!(err.output().unwrap().ipc_output.is_empty());
}

#[tokio::test]
async fn test_ipc_input_is_delivered_first() {
    let output = run(
        "sh",
        sh("head -c 9 <&3 >&3"),
        Options::new().with_ipc_input(json!("foo")),
    )
    .await
    .unwrap();
    assert_eq!(output.ipc_output, vec![json!("foo")]);
}

#[tokio::test]
async fn test_get_each_message_streams_until_exit() {
    use futures::StreamExt;

    let script = format!("printf '{0}' >&3; printf '{0}' >&3; printf '{0}' >&3", FOO_FRAME);
    let process = spawn("sh", sh(&script), Options::new().with_ipc(true)).unwrap();
    let messages = process.get_each_message().unwrap();

    let collector = tokio::spawn(messages.collect::<Vec<_>>());
    let output = process.wait().await.unwrap();
    let streamed = collector.await.unwrap();

    assert_eq!(streamed, vec![json!("foo"); 3]);
    assert_eq!(output.ipc_output.len(), 3);
}

#[tokio::test]
async fn test_ipc_log_bound_is_max_buffer() {
    let script = format!("printf '{0}{0}' >&3", FOO_FRAME);
    let err = run(
        "sh",
        sh(&script),
        Options::new().with_ipc(true).with_max_buffer(1),
    )
    .await
    .unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(
                failure.cause,
                FailureCause::MaxBuffer {
                    option_name: "ipc".into(),
                    max: 1
                }
            );
            assert_eq!(failure.output.ipc_output, vec![json!("foo")]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_child_exiting_without_reading_succeeds() {
    let output = run(
        "sh",
        sh("sleep 0.3"),
        Options::new().with_ipc_input(json!("x")),
    )
    .await
    .unwrap();
    assert_eq!(output.exit_code, Some(0));
    assert!(output.ipc_output.is_empty());
}

#[tokio::test]
async fn test_unread_message_is_not_an_ipc_failure() {
    let process = spawn("sh", sh("sleep 0.3; exit 0"), Options::new().with_ipc(true)).unwrap();
    process.send_message(json!("hello")).await.unwrap();
    let output = process.wait().await.unwrap();
    assert_eq!(output.exit_code, Some(0));
}
