/*!
 * Line Transforms
 * Generator-style transforms applied line by line to bridged descriptors
 */

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

type TransformFn = dyn Fn(Bytes) -> Option<Bytes> + Send + Sync;

/// A per-line transform
///
/// The function receives each line without its trailing newline and returns
/// the replacement line, or `None` to drop it.
#[derive(Clone)]
pub struct LineTransform {
    name: String,
    func: Arc<TransformFn>,
}

impl LineTransform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Bytes) -> Option<Bytes> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn apply(&self, line: Bytes) -> Option<Bytes> {
        (self.func)(line)
    }
}

impl fmt::Debug for LineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineTransform")
            .field("name", &self.name)
            .finish()
    }
}

/// Splits a chunked byte stream into lines and runs transforms in order
///
/// Without transforms, chunks pass through untouched.
#[derive(Debug, Default)]
pub struct TransformChain {
    transforms: Vec<LineTransform>,
    partial: BytesMut,
}

impl TransformChain {
    pub fn new(transforms: Vec<LineTransform>) -> Self {
        Self {
            transforms,
            partial: BytesMut::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Feed one chunk, returning the output ready so far
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if self.is_empty() {
            return vec![Bytes::copy_from_slice(chunk)];
        }

        self.partial.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line = self.partial.split_to(pos + 1);
            line.truncate(pos);
            if let Some(transformed) = self.run(line.freeze()) {
                let mut terminated = BytesMut::with_capacity(transformed.len() + 1);
                terminated.extend_from_slice(&transformed);
                terminated.extend_from_slice(b"\n");
                out.push(terminated.freeze());
            }
        }
        out
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.partial.is_empty() {
            return None;
        }
        let line = self.partial.split().freeze();
        self.run(line)
    }

    fn run(&self, line: Bytes) -> Option<Bytes> {
        self.transforms
            .iter()
            .try_fold(line, |line, transform| transform.apply(line))
    }
}
