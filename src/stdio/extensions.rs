/*!
 * Descriptor Extensions
 * Caller-supplied hooks keyed by (direction, type)
 *
 * Collaborators use these to attach derived properties to descriptors
 * without the plan builder knowing what they compute.
 */

use super::plan::StdioDescriptor;
use super::types::{Direction, StdioType};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Properties attached to a descriptor by an extension hook
pub type ExtensionProps = Map<String, Value>;

type ExtensionFn = dyn Fn(&StdioDescriptor) -> ExtensionProps + Send + Sync;

/// Lookup table of extension hooks
#[derive(Clone, Default)]
pub struct ExtensionTable {
    hooks: HashMap<(Direction, StdioType), Arc<ExtensionFn>>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hook for one (direction, type) pair, replacing any previous one
    #[must_use]
    pub fn with_hook<F>(mut self, direction: Direction, stdio_type: StdioType, hook: F) -> Self
    where
        F: Fn(&StdioDescriptor) -> ExtensionProps + Send + Sync + 'static,
    {
        self.hooks.insert((direction, stdio_type), Arc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the hook matching the descriptor, if any
    pub fn apply(&self, descriptor: &StdioDescriptor) -> ExtensionProps {
        self.hooks
            .get(&(descriptor.direction, descriptor.stdio_type))
            .map(|hook| hook(descriptor))
            .unwrap_or_default()
    }
}

impl fmt::Debug for ExtensionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionTable")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}
