/*!
 * System Limits and Constants
 *
 * Centralized location for buffer sizes, frame limits, and environment
 * variable names shared by the stdio engine and the message channel.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Wire-format constants are marked with [WIRE]
 */

// =============================================================================
// STDIO LIMITS
// =============================================================================

/// Default per-descriptor buffer limit (100MB)
/// Output beyond this is dropped and the run fails with a max-buffer error
pub const DEFAULT_MAX_BUFFER: usize = 100 * 1024 * 1024;

/// Default IPC output log limit, counted in messages
pub const DEFAULT_MAX_IPC_MESSAGES: usize = 100 * 1024 * 1024;

/// Read chunk size for output collectors (64KB)
/// [PERF] Matches the default Linux pipe capacity
pub const STDIO_CHUNK_SIZE: usize = 64 * 1024;

/// Number of standard descriptors (stdin, stdout, stderr)
pub const STANDARD_FD_COUNT: usize = 3;

/// Option names of the standard descriptors, indexed by fd
pub const STANDARD_OPTION_NAMES: [&str; STANDARD_FD_COUNT] = ["stdin", "stdout", "stderr"];

// =============================================================================
// IPC LIMITS
// =============================================================================

/// Length prefix size of one IPC frame (u32, big-endian)
/// [WIRE]
pub const IPC_FRAME_HEADER_SIZE: usize = 4;

/// Maximum IPC message payload (16MB)
/// [WIRE] Frames above this are rejected by both encoder and decoder
pub const MAX_IPC_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Initial read buffer capacity for the frame decoder (8KB)
/// [PERF]
pub const IPC_READ_BUFFER_SIZE: usize = 8 * 1024;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Environment variable carrying the child's IPC descriptor number
pub const IPC_FD_ENV: &str = "PROCBRIDGE_IPC_FD";

/// Environment variable enabling JSON trace output
pub const TRACE_JSON_ENV: &str = "PROCBRIDGE_TRACE_JSON";
