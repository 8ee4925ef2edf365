/*!
 * Core Types
 * Common types used across the stdio engine and the message channel
 */

/// Descriptor index as seen by the child (0 stdin, 1 stdout, 2 stderr, 3..)
pub type Fd = u32;

/// Size type for buffer accounting
pub type Size = usize;

/// OS-level process ID
pub type Pid = u32;
