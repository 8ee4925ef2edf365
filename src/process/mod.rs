/*!
 * Process Module
 * Spawning, descriptor wiring and output collection
 */

pub mod executor;
mod fds;
pub mod pump;
pub mod types;

pub use executor::{run, spawn, Subprocess};
pub use pump::{OutputBuffer, SharedBuffer};
pub use types::{Failure, FailureCause, Options, Output, ProcessError, ProcessResult};
