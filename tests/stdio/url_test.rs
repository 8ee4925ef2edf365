/*!
 * URL and File Path Validation Tests
 */

use pretty_assertions::assert_eq;
use procbridge::stdio::{OutputTarget, ResolvedStream};
use procbridge::{PlanBuilder, StdioError, StdioOptions};
use std::path::Path;
use url::Url;

#[test]
fn test_file_url_is_accepted() {
    let url = Url::parse("file:///tmp/procbridge-out.txt").unwrap();
    let plan = PlanBuilder::new("/")
        .build(StdioOptions {
            stdout: Some(url.into()),
            ..Default::default()
        })
        .unwrap();
    match &plan.descriptor(1).unwrap().resolved {
        Some(ResolvedStream::Output(bridge)) => match &bridge.targets[..] {
            [OutputTarget::File { path, .. }] => {
                assert_eq!(path, Path::new("/tmp/procbridge-out.txt"))
            }
            other => panic!("unexpected targets {:?}", other),
        },
        other => panic!("unexpected stream {:?}", other),
    }
}

#[test]
fn test_non_file_url_names_the_slot() {
    for (slot, options) in [
        (
            "stdin",
            StdioOptions {
                stdin: Some(Url::parse("https://example.com").unwrap().into()),
                ..Default::default()
            },
        ),
        (
            "stderr",
            StdioOptions {
                stderr: Some(Url::parse("ftp://example.com/log").unwrap().into()),
                ..Default::default()
            },
        ),
    ] {
        let err = PlanBuilder::new("/").build(options).unwrap_err();
        assert!(matches!(err, StdioError::UrlScheme { .. }), "{}", err);
        assert_eq!(err.option_name(), Some(slot));
        assert!(err.to_string().contains(&format!("`{}: URL`", slot)));
    }
}

#[test]
fn test_unresolved_string_is_a_path_error() {
    let err = PlanBuilder::new("/")
        .build(StdioOptions {
            stdout: Some("some-relative-path".into()),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(
        err,
        StdioError::FilePath {
            option_name: "stdout".into(),
            value: "some-relative-path".into()
        }
    );
    assert!(err.to_string().contains("absolute file path or start with `.`"));
}

#[test]
fn test_non_file_input_file_url_rejected() {
    let err = PlanBuilder::new("/")
        .build(StdioOptions {
            input_file: Some(Url::parse("http://example.com/in").unwrap().into()),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.option_name(), Some("stdin"));
}
