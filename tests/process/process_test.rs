/*!
 * Process Lifecycle Tests
 * Spawn, wait, failure causes, cancellation and environment
 */

use pretty_assertions::assert_eq;
use procbridge::{run, spawn, ChannelState, FailureCause, IpcError, Options, ProcessError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> [String; 2] {
    ["-c".to_string(), script.to_string()]
}

fn no_args() -> std::iter::Empty<&'static str> {
    std::iter::empty()
}

#[tokio::test]
async fn test_echo_strips_final_newline() {
    let output = run("echo", ["foo"], Options::new()).await.unwrap();
    assert_eq!(output.stdout_text(), "foo");
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.command, "echo foo");
    assert!(output.pid.is_some());
}

#[tokio::test]
async fn test_keep_final_newline() {
    let output = run(
        "echo",
        ["foo"],
        Options::new().with_strip_final_newline(false),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout(), Some(&b"foo\n"[..]));
}

#[tokio::test]
async fn test_exit_code_failure_carries_output() {
    let err = run("sh", sh("echo oops >&2; exit 3"), Options::new())
        .await
        .unwrap_err();
    let output = err.output().unwrap();
    assert_eq!(output.exit_code, Some(3));
    assert_eq!(output.stderr_text(), "oops");
    assert!(err.to_string().starts_with("Command failed with exit code 3"));

    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(failure.cause, FailureCause::ExitCode { code: 3 })
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_serializes_with_cause() {
    let err = run("sh", sh("exit 4"), Options::new()).await.unwrap_err();
    let ProcessError::Failed(failure) = err else {
        panic!("expected a failed run");
    };
    let value = serde_json::to_value(&*failure).unwrap();
    assert_eq!(value["cause"], "exit_code");
    assert_eq!(value["code"], 4);
    assert_eq!(value["output"]["exit_code"], 4);
}

#[tokio::test]
async fn test_invalid_command_is_rejected_before_spawn() {
    let err = run("", no_args(), Options::new()).await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidCommand(_)));
}

#[tokio::test]
async fn test_missing_binary_is_spawn_failure() {
    let err = run("procbridge-no-such-binary", no_args(), Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::SpawnFailed(_)));
    assert!(err.output().is_none());
}

#[tokio::test]
async fn test_max_buffer_truncates_and_fails() {
    let err = run("sh", sh("printf abcdef"), Options::new().with_max_buffer(3))
        .await
        .unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(
                failure.cause,
                FailureCause::MaxBuffer {
                    option_name: "stdout".into(),
                    max: 3
                }
            );
            assert_eq!(failure.output.stdout_text(), "abc");
            assert_eq!(failure.output.exit_code, Some(0));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_all_interleaves_stdout_and_stderr() {
    let script = "printf a; sleep 0.1; printf b >&2; sleep 0.1; printf c";
    let output = run("sh", sh(script), Options::new().with_all(true))
        .await
        .unwrap();
    assert_eq!(output.all_text().as_deref(), Some("abc"));
    assert_eq!(output.stdout_text(), "ac");
    assert_eq!(output.stderr_text(), "b");
}

#[tokio::test]
async fn test_all_is_absent_unless_requested() {
    let output = run("echo", ["foo"], Options::new()).await.unwrap();
    assert_eq!(output.all, None);
}

#[tokio::test]
async fn test_cancel_signal_kills_and_reports_cancelled() {
    let token = CancellationToken::new();
    let process = spawn(
        "sleep",
        ["5"],
        Options::new().with_cancel_signal(token.clone()),
    )
    .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(4), process.wait())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(failure.cause, FailureCause::Cancelled);
            assert!(failure.output.cancelled);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_signal_force_closes_ipc_channel() {
    let token = CancellationToken::new();
    let process = spawn(
        "sleep",
        ["5"],
        Options::new()
            .with_ipc(true)
            .with_cancel_signal(token.clone()),
    )
    .unwrap();
    let channel = process.ipc().unwrap().clone();
    assert_eq!(channel.state(), ChannelState::Open);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(4), process.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Failed(ref failure) if failure.cause == FailureCause::Cancelled
    ));
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(
        channel.send(serde_json::json!("late")).await,
        Err(IpcError::ChannelClosed)
    );
}

#[tokio::test]
async fn test_kill_reports_signal() {
    let mut process = spawn("sleep", ["5"], Options::new()).unwrap();
    process.kill().unwrap();
    let err = process.wait().await.unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert_eq!(failure.cause, FailureCause::Signal { signal: 9 });
            assert_eq!(failure.output.signal, Some(9));
            assert_eq!(failure.output.exit_code, None);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_env_is_passed_through() {
    let output = run(
        "sh",
        sh(r#"printf "$GREETING""#),
        Options::new().with_env("GREETING", "hi"),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout_text(), "hi");
}

#[tokio::test]
async fn test_extend_env_false_starts_from_empty_env() {
    std::env::set_var("PROCBRIDGE_TEST_INHERITED", "leaked");
    let output = run(
        "/bin/sh",
        sh(r#"printf "${PROCBRIDGE_TEST_INHERITED:-unset}""#),
        Options::new().with_extend_env(false),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout_text(), "unset");
}

#[tokio::test]
async fn test_cwd_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let output = run("pwd", no_args(), Options::new().with_cwd(dir.path()))
        .await
        .unwrap();
    let expected = dir.path().canonicalize().unwrap();
    let actual = std::path::Path::new(&output.stdout_text())
        .canonicalize()
        .unwrap();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_take_stdin_writes_to_plain_pipe() {
    let mut process = spawn("cat", no_args(), Options::new()).unwrap();
    let mut stdin = process.take_stdin().unwrap();
    stdin.write_all(b"typed").await.unwrap();
    drop(stdin);
    let output = process.wait().await.unwrap();
    assert_eq!(output.stdout_text(), "typed");
}

#[tokio::test]
async fn test_ignored_stdout_is_not_buffered() {
    let output = run("echo", ["foo"], Options::new().with_stdout("ignore"))
        .await
        .unwrap();
    assert_eq!(output.stdout(), None);
}

#[tokio::test]
async fn test_buffer_false_keeps_streams_flowing() {
    let output = run(
        "sh",
        sh("head -c 1048576 /dev/zero"),
        Options::new().with_buffer(false).with_max_buffer(16),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout(), None);
}
