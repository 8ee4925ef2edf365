/*!
 * Input Shortcuts
 * Merges the `input` and `inputFile` options into stdin
 */

use super::classify::StdioSource;
use super::types::{FileRef, InputFile, Payload, StdioError, StdioMode, StdioResult};

/// Apply `input`/`inputFile` to the classified stdin sources
///
/// A shortcut only replaces an unset stdin (`pipe`, or `overlapped` which is
/// kept so the mode resolver can honour it). Line transforms on stdin stay and
/// run over the shortcut data. Any other explicit stdin value conflicts with
/// the shortcut.
pub(super) fn merge_input_shortcuts(
    stdin: Vec<StdioSource>,
    input: Option<Payload>,
    input_file: Option<InputFile>,
) -> StdioResult<Vec<StdioSource>> {
    let (shortcut, source) = match (input, input_file) {
        (Some(_), Some(_)) => return Err(StdioError::InputConflict),
        (Some(payload), None) => ("input", StdioSource::Payload(payload.into_chunks())),
        (None, Some(InputFile::Path(path))) => ("inputFile", StdioSource::File(FileRef::new(path))),
        (None, Some(InputFile::Url(url))) => ("inputFile", StdioSource::Url(url)),
        (None, None) => return Ok(stdin),
    };

    let mut overlapped = false;
    let mut transforms = Vec::new();
    for existing in stdin {
        match existing {
            StdioSource::Native(StdioMode::Pipe) => {}
            StdioSource::Native(StdioMode::Overlapped) => overlapped = true,
            generator @ StdioSource::Generator(_) => transforms.push(generator),
            _ => return Err(StdioError::StdinConflict { shortcut }),
        }
    }

    let mut merged = Vec::with_capacity(2 + transforms.len());
    if overlapped {
        merged.push(StdioSource::Native(StdioMode::Overlapped));
    }
    merged.push(source);
    merged.extend(transforms);
    Ok(merged)
}
