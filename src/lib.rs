/*!
 * procbridge Library
 * Stdio resolution, stream bridging and IPC for spawned processes
 *
 * A spawn first resolves every descriptor into a stdio plan, then wires the
 * plan into the child and layers the message channel over the dedicated
 * descriptor when messaging is enabled.
 */

pub mod core;
pub mod ipc;
pub mod monitoring;
pub mod process;
pub mod stdio;

// Re-exports
pub use ipc::{ChannelConfig, ChannelState, IpcError, IpcResult, Message, MessageChannel};
pub use monitoring::{init_tracing, span_operation, OperationSpan};
pub use process::{
    run, spawn, Failure, FailureCause, Options, Output, ProcessError, ProcessResult, Subprocess,
};
pub use stdio::{
    BufferOption, Direction, ExtensionTable, FileRef, InputFile, LineTransform, Payload,
    PlanBuilder, StdioConfig, StdioDescriptor, StdioError, StdioMode, StdioOption, StdioOptions,
    StdioPlan, StdioResult, StdioType, StdioValue,
};
