/*!
 * Stdio Normalization
 * Folds `stdio`, `stdin`, `stdout` and `stderr` into one list of slots
 */

use super::types::{StdioConfig, StdioError, StdioMode, StdioOption, StdioOptions, StdioResult};
use crate::core::limits::STANDARD_FD_COUNT;

/// Produce one raw option per descriptor, at least three
///
/// A shared `stdio` value is broadcast to stdin, stdout and stderr here, once,
/// so later stages only ever see the array form.
pub(super) fn normalize_stdio(options: &mut StdioOptions) -> StdioResult<Vec<StdioOption>> {
    let has_standard = options.stdin.is_some() || options.stdout.is_some() || options.stderr.is_some();

    let mut slots = match options.stdio.take() {
        Some(_) if has_standard => return Err(StdioError::StdioConflict),
        Some(StdioConfig::Shared(shared)) => StdioConfig::broadcast(&shared)?,
        Some(StdioConfig::PerFd(slots)) => slots,
        None => vec![
            options.stdin.take().unwrap_or_else(default_slot),
            options.stdout.take().unwrap_or_else(default_slot),
            options.stderr.take().unwrap_or_else(default_slot),
        ],
    };

    while slots.len() < STANDARD_FD_COUNT {
        slots.push(default_slot());
    }

    Ok(slots)
}

fn default_slot() -> StdioOption {
    StdioOption::Single(StdioMode::Pipe.into())
}
