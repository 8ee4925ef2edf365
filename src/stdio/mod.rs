/*!
 * Stdio Module
 * Descriptor classification, plan building and stream synthesis
 */

pub mod classify;
pub mod extensions;
mod input;
pub mod mode;
mod normalize;
pub mod plan;
pub mod synth;
pub mod transform;
pub mod types;

pub use classify::{classify, descriptor_type, StdioSource};
pub use extensions::{ExtensionProps, ExtensionTable};
pub use mode::{resolve_mode, resolve_modes};
pub use plan::{PlanBuilder, StdioDescriptor, StdioPlan};
pub use synth::{InputBridge, InputSource, IpcBridge, OutputBridge, OutputTarget, ResolvedStream};
pub use transform::{LineTransform, TransformChain};
pub use types::{
    option_name, BoxChunkStream, BoxReader, BoxWriter, BufferOption, Direction, FileRef,
    InputFile, Payload, StdioConfig, StdioError, StdioMode, StdioOption, StdioOptions,
    StdioResult, StdioType, StdioValue,
};
