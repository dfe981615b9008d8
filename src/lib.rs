//! sqltrace - request-scoped SQL execution tracing for host applications.
//!
//! The host wires [`TraceListener::handle`] to its query-executed event
//! and hands it a [`RequestContext`] plus a [`QueryEvent`] per execution.
//! The listener decides whether the execution is worth keeping (slow
//! queries always, fast queries with a small random sample, everything in
//! local mode), appends a correlated SQL record and reduced call chain to
//! append-only sinks, feeds day-bucketed frequency/timing counters in an
//! external store, and optionally pushes a summary to a metric hook.
//! Tracing is strictly best-effort: no failure in this crate ever reaches
//! the host's query path.
//!
//! # Modules
//!
//! - [`listener`] - the per-notification orchestrator
//! - [`sampling`] - the analyse-and-continue decision and aggregation
//! - [`stack`] - call-stack capture and vendor-filtered reduction
//! - [`record`] - record formats and the append-only sink writer
//! - [`ids`] - request/query correlation identifiers
//! - [`store`] - the aggregate-store seam and its in-memory implementation
//!
//! # Example
//!
//! ```no_run
//! use sqltrace::{QueryEvent, RequestContext, TraceConfig, TraceListener};
//!
//! let config = TraceConfig::from_env();
//! let mut listener = TraceListener::new(config, None).expect("assemble tracer");
//!
//! // Once per inbound request:
//! let ctx = RequestContext::new(None, None);
//!
//! // Per executed query:
//! let event = QueryEvent::new("127.0.0.1", "select 1", vec![], 1.9);
//! listener.handle(&ctx, &event);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod listener;
pub mod push;
pub mod record;
pub mod sampling;
pub mod stack;
pub mod store;

// Re-export for convenience
pub use config::{Environment, TraceConfig};
pub use error::{Step, TraceError};
pub use event::QueryEvent;
pub use ids::RequestContext;
pub use listener::{TraceListener, TraceOutcome};
pub use push::{JsonLinePush, NoopPush, PushHook, PushRecord};
pub use record::RecordWriter;
pub use sampling::SamplingDecider;
pub use stack::{BacktraceSource, CallType, ReducedTrace, StackFrame, StackReducer, StackSource};
pub use store::{AggregateStore, MemoryStore};
