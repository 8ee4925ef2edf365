/*!
 * Stdio Plan Tests
 * Classification, shortcuts and descriptor layout of built plans
 */

use pretty_assertions::assert_eq;
use procbridge::stdio::{InputSource, OutputTarget, ResolvedStream};
use procbridge::{
    Direction, FileRef, InputFile, Payload, PlanBuilder, StdioConfig, StdioError, StdioMode,
    StdioOption, StdioOptions, StdioType, StdioValue,
};
use std::path::Path;

fn build(options: StdioOptions) -> Result<procbridge::StdioPlan, StdioError> {
    PlanBuilder::new("/work").build(options)
}

#[test]
fn test_shared_keyword_applies_to_all_standard_slots() {
    let plan = build(StdioOptions {
        stdio: Some(StdioConfig::Shared("inherit".into())),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(plan.modes(), &[StdioMode::Inherit; 3]);
    assert!(plan
        .descriptors()
        .iter()
        .all(|d| d.stdio_type == StdioType::Native));
}

#[test]
fn test_extra_descriptors_are_outputs() {
    let plan = build(StdioOptions {
        stdio: Some(StdioConfig::PerFd(vec![
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
            "./fd3.log".into(),
            "ignore".into(),
        ])),
        ..Default::default()
    })
    .unwrap();
    let fd3 = plan.descriptor(3).unwrap();
    assert_eq!(fd3.option_name, "fd3");
    assert_eq!(fd3.direction, Direction::Output);
    assert_eq!(fd3.stdio_type, StdioType::File);
    assert_eq!(plan.modes()[3], StdioMode::Pipe);
    assert_eq!(plan.modes()[4], StdioMode::Ignore);
}

#[test]
fn test_input_shortcut_becomes_payload_source() {
    let plan = build(StdioOptions {
        input: Some(Payload::from("foo")),
        ..Default::default()
    })
    .unwrap();
    let stdin = plan.descriptor(0).unwrap();
    assert_eq!(stdin.stdio_type, StdioType::Payload);
    match &stdin.resolved {
        Some(ResolvedStream::Input(bridge)) => {
            assert!(matches!(&bridge.sources[..], [InputSource::Chunks(_)]));
        }
        other => panic!("unexpected stream {:?}", other),
    }
}

#[test]
fn test_input_file_resolves_against_cwd() {
    let plan = build(StdioOptions {
        input_file: Some(InputFile::from("./data/in.txt")),
        ..Default::default()
    })
    .unwrap();
    match &plan.descriptor(0).unwrap().resolved {
        Some(ResolvedStream::Input(bridge)) => match &bridge.sources[..] {
            [InputSource::File(path)] => assert_eq!(path, Path::new("/work/data/in.txt")),
            other => panic!("unexpected sources {:?}", other),
        },
        other => panic!("unexpected stream {:?}", other),
    }
}

#[test]
fn test_input_with_explicit_stdin_conflicts() {
    let err = build(StdioOptions {
        stdin: Some("inherit".into()),
        input: Some(Payload::from("foo")),
        ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err, StdioError::StdinConflict { shortcut: "input" });
}

#[test]
fn test_input_with_piped_stdin_is_allowed() {
    let plan = build(StdioOptions {
        stdin: Some("pipe".into()),
        input: Some(Payload::Json(serde_json::json!({"a": 1}))),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(plan.descriptor(0).unwrap().stdio_type, StdioType::Payload);
}

#[test]
fn test_file_output_with_pipe_keeps_buffering() {
    let plan = build(StdioOptions {
        stdout: Some(StdioOption::Many(vec![
            "pipe".into(),
            StdioValue::File(FileRef::new("/tmp/out.txt").append()),
        ])),
        ..Default::default()
    })
    .unwrap();
    match &plan.descriptor(1).unwrap().resolved {
        Some(ResolvedStream::Output(bridge)) => {
            assert!(bridge.buffer);
            assert!(matches!(
                &bridge.targets[..],
                [OutputTarget::File { append: true, .. }]
            ));
        }
        other => panic!("unexpected stream {:?}", other),
    }
}

#[test]
fn test_stdio_array_conflicts_with_stdout() {
    let err = build(StdioOptions {
        stdio: Some(StdioConfig::PerFd(vec!["pipe".into()])),
        stdout: Some("pipe".into()),
        ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err, StdioError::StdioConflict);
}

#[test]
fn test_ipc_in_array_enables_messaging() {
    let plan = build(StdioOptions {
        stdio: Some(StdioConfig::PerFd(vec![
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
            StdioValue::Ipc.into(),
        ])),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(plan.ipc_index(), Some(3));
    assert!(matches!(
        plan.descriptor(3).unwrap().resolved,
        Some(ResolvedStream::Ipc(_))
    ));
}

#[test]
fn test_ipc_combined_with_other_values_rejected() {
    let err = build(StdioOptions {
        stdio: Some(StdioConfig::PerFd(vec![
            "pipe".into(),
            "pipe".into(),
            "pipe".into(),
            StdioOption::Many(vec![StdioValue::Ipc, "./x".into()]),
        ])),
        ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.option_name(), Some("fd3"));
}
