/*!
 * Descriptor Classifier
 * Turns raw stdio values into tagged sources
 *
 * Classification is pure and never fails: values that cannot be used
 * (non-`file:` URLs, unresolved strings) are tagged and rejected later by
 * plan validation, which knows the slot they came from.
 */

use super::transform::LineTransform;
use super::types::{
    BoxChunkStream, BoxReader, BoxWriter, FileRef, StdioMode, StdioType, StdioValue,
};
use crate::core::types::Fd;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use url::Url;

/// A classified stdio value
///
/// Everything downstream of the classifier matches on this enum instead of
/// re-inspecting raw values.
pub enum StdioSource {
    Native(StdioMode),
    Payload(Vec<Bytes>),
    File(FileRef),
    /// Kept as a URL until validation checks its scheme
    Url(Url),
    Reader(BoxReader),
    Stream(BoxChunkStream),
    Writer(BoxWriter),
    /// The parent's own stream for this standard descriptor
    Parent(Fd),
    Generator(LineTransform),
    Ipc,
    Unresolved(String),
}

impl StdioSource {
    pub fn stdio_type(&self) -> StdioType {
        match self {
            Self::Native(_) => StdioType::Native,
            Self::Payload(_) => StdioType::Payload,
            Self::File(_) => StdioType::File,
            Self::Url(_) => StdioType::Url,
            Self::Reader(_) | Self::Stream(_) | Self::Writer(_) | Self::Parent(_) => {
                StdioType::Stream
            }
            Self::Generator(_) => StdioType::Generator,
            Self::Ipc => StdioType::Ipc,
            Self::Unresolved(_) => StdioType::Unresolved,
        }
    }

    /// Short label used in error messages
    pub fn label(&self) -> String {
        match self {
            Self::Native(mode) => mode.to_string(),
            Self::Payload(_) => "payload".to_string(),
            Self::File(file) => file.path.display().to_string(),
            Self::Url(url) => url.to_string(),
            Self::Reader(_) => "reader".to_string(),
            Self::Stream(_) => "stream".to_string(),
            Self::Writer(_) => "writer".to_string(),
            Self::Parent(_) => "inherit".to_string(),
            Self::Generator(transform) => transform.name().to_string(),
            Self::Ipc => "ipc".to_string(),
            Self::Unresolved(value) => value.clone(),
        }
    }
}

impl fmt::Debug for StdioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.stdio_type(), self.label())
    }
}

/// Classify one raw stdio value
pub fn classify(value: StdioValue) -> StdioSource {
    match value {
        StdioValue::Text(text) => classify_text(text),
        StdioValue::Mode(mode) => StdioSource::Native(mode),
        StdioValue::Payload(payload) => StdioSource::Payload(payload.into_chunks()),
        StdioValue::File(file) => StdioSource::File(file),
        StdioValue::Url(url) => StdioSource::Url(url),
        StdioValue::Reader(reader) => StdioSource::Reader(reader),
        StdioValue::Stream(stream) => StdioSource::Stream(stream),
        StdioValue::Writer(writer) => StdioSource::Writer(writer),
        StdioValue::Transform(transform) => StdioSource::Generator(transform),
        StdioValue::Ipc => StdioSource::Ipc,
    }
}

fn classify_text(text: String) -> StdioSource {
    if text == "ipc" {
        return StdioSource::Ipc;
    }
    if let Some(mode) = StdioMode::from_keyword(&text) {
        return StdioSource::Native(mode);
    }
    if is_file_path_string(&text) {
        return StdioSource::File(FileRef::new(text));
    }
    StdioSource::Unresolved(text)
}

/// File path strings must be absolute or start with `.`
#[inline]
pub fn is_file_path_string(text: &str) -> bool {
    text.starts_with('.') || Path::new(text).is_absolute()
}

/// Dominant type of a slot holding several sources
///
/// The first source that is neither native nor a generator decides; a slot
/// of only generators (plus keywords) is a generator slot; otherwise native.
pub fn descriptor_type(sources: &[StdioSource]) -> StdioType {
    let mut has_generator = false;
    for source in sources {
        match source.stdio_type() {
            StdioType::Native => {}
            StdioType::Generator => has_generator = true,
            other => return other,
        }
    }
    if has_generator {
        StdioType::Generator
    } else {
        StdioType::Native
    }
}
