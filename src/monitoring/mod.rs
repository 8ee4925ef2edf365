/*!
 * Monitoring
 * Structured tracing for plan building, spawning and channel activity
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, span_operation, OperationSpan};
