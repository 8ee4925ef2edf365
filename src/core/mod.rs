/*!
 * Core Module
 * Shared types, limits, and serialization helpers
 */

pub mod limits;
pub mod serde;
pub mod types;

// Re-export for convenience
pub use types::*;
