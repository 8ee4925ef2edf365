/*!
 * IPC Module
 * Structured message channel between a parent and its subprocess
 */

pub mod channel;
pub mod child;
pub mod codec;
pub mod types;

pub use channel::MessageChannel;
pub use codec::{decode_frames, encode_frame, MessageCodec};
pub use types::{ChannelConfig, ChannelState, IpcError, IpcResult, Message};
