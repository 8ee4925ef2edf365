/*!
 * Mode Resolver
 * Maps descriptors to the open modes handed to process creation
 */

use super::plan::StdioDescriptor;
use super::types::StdioMode;

/// Open mode for one descriptor
///
/// Bridged descriptors always need a stream end in the parent, so they open
/// as `pipe` unless `overlapped` was requested. Native descriptors open as
/// requested. Resolving the same descriptor twice yields the same mode.
#[inline]
pub fn resolve_mode(descriptor: &StdioDescriptor) -> StdioMode {
    if descriptor.resolved.is_some() {
        match descriptor.requested {
            StdioMode::Overlapped => StdioMode::Overlapped,
            _ => StdioMode::Pipe,
        }
    } else {
        descriptor.requested
    }
}

/// Open modes for a whole plan, index for index
pub fn resolve_modes(descriptors: &[StdioDescriptor]) -> Vec<StdioMode> {
    descriptors.iter().map(resolve_mode).collect()
}
