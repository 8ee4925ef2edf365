/*!
 * Stdio Bridge Tests
 * Input payloads, file targets, extra descriptors and transforms on a live child
 */

use bytes::Bytes;
use pretty_assertions::assert_eq;
use procbridge::{
    run, FileRef, LineTransform, Options, ProcessError, StdioError, StdioOption, StdioValue,
};
use std::fs;
use url::Url;

fn sh(script: &str) -> [String; 2] {
    ["-c".to_string(), script.to_string()]
}

fn upper() -> LineTransform {
    LineTransform::new("upper", |line| Some(Bytes::from(line.to_ascii_uppercase())))
}

#[tokio::test]
async fn test_input_is_fed_to_stdin() {
    let output = run("cat", std::iter::empty::<&str>(), Options::new().with_input("hello\n"))
        .await
        .unwrap();
    assert_eq!(output.stdout_text(), "hello");
}

#[tokio::test]
async fn test_input_file_is_fed_to_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.txt");
    fs::write(&path, "from file").unwrap();

    let output = run("cat", std::iter::empty::<&str>(), Options::new().with_input_file(path))
        .await
        .unwrap();
    assert_eq!(output.stdout_text(), "from file");
}

#[tokio::test]
async fn test_child_ignoring_input_is_not_an_error() {
    let big = "x".repeat(4 * 1024 * 1024);
    let output = run("sh", sh("exit 0"), Options::new().with_input(big))
        .await
        .unwrap();
    assert_eq!(output.exit_code, Some(0));
}

#[tokio::test]
async fn test_relative_stdout_file_resolves_against_cwd() {
    let dir = tempfile::tempdir().unwrap();
    run(
        "echo",
        ["foo"],
        Options::new().with_cwd(dir.path()).with_stdout("./out.txt"),
    )
    .await
    .unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "foo\n");
}

#[tokio::test]
async fn test_append_keeps_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    fs::write(&path, "a\n").unwrap();

    run("echo", ["b"], Options::new().with_stdout(FileRef::new(&path).append()))
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
}

#[tokio::test]
async fn test_pipe_and_file_both_receive_output() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("copy.txt");
    let output = run(
        "echo",
        ["foo"],
        Options::new().with_stdout(StdioOption::Many(vec![
            StdioValue::from("pipe"),
            StdioValue::from(FileRef::new(&copy)),
        ])),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout_text(), "foo");
    assert_eq!(fs::read_to_string(&copy).unwrap(), "foo\n");
}

#[tokio::test]
async fn test_extra_descriptor_is_collected() {
    let output = run(
        "sh",
        sh("printf three >&3; printf out"),
        Options::new().with_stdio_array(vec![
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
        ]),
    )
    .await
    .unwrap();
    assert_eq!(output.fd(3), Some(&b"three"[..]));
    assert_eq!(output.stdout_text(), "out");
}

#[tokio::test]
async fn test_extra_descriptor_file_target() {
    let dir = tempfile::tempdir().unwrap();
    run(
        "sh",
        sh("echo side >&3"),
        Options::new().with_cwd(dir.path()).with_stdio_array(vec![
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
            "./fd3.log".into(),
        ]),
    )
    .await
    .unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("fd3.log")).unwrap(), "side\n");
}

#[tokio::test]
async fn test_stdout_transform_runs_per_line() {
    let output = run(
        "sh",
        sh(r"printf 'a\nb\n'"),
        Options::new().with_stdout(upper()),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout_text(), "A\nB");
}

#[tokio::test]
async fn test_stdin_transform_runs_before_child() {
    let output = run(
        "cat",
        std::iter::empty::<&str>(),
        Options::new().with_input("one\ntwo\n").with_stdin(upper()),
    )
    .await
    .unwrap();
    assert_eq!(output.stdout_text(), "ONE\nTWO");
}

#[tokio::test]
async fn test_bad_url_fails_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(
        "sh",
        sh("touch marker"),
        Options::new()
            .with_cwd(dir.path())
            .with_stdout(Url::parse("https://example.com/out").unwrap()),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ProcessError::Configuration(StdioError::UrlScheme { .. })
    ));
    assert!(!dir.path().join("marker").exists());
}

#[tokio::test]
async fn test_unopenable_output_file_is_stream_failure() {
    let err = run(
        "echo",
        ["foo"],
        Options::new().with_stdout("/procbridge-missing-dir/out.txt"),
    )
    .await
    .unwrap_err();
    match err {
        ProcessError::Failed(failure) => {
            assert!(matches!(
                failure.cause,
                procbridge::FailureCause::Stream { ref option_name, .. } if option_name == "stdout"
            ));
        }
        other => panic!("unexpected error {:?}", other),
    }
}
