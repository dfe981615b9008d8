//! The query-executed listener driving the whole pipeline.
//!
//! One listener instance serves one request/connection context in the
//! host. Every notification runs the same sequence: check the sinks,
//! mint the per-call id, decide whether to continue, persist the SQL
//! record, persist the reduced call chain, and hand the collected fields
//! to the push hook. Failures at any step are caught here, tagged with
//! their step code, routed to the error sink, and swallowed; the host's
//! own query execution is never affected.

use std::sync::Arc;

use rand::RngCore;

use crate::config::TraceConfig;
use crate::error::{Step, TraceError};
use crate::event::QueryEvent;
use crate::ids::{self, RequestContext};
use crate::push::{NoopPush, PushHook, PushRecord};
use crate::record::RecordWriter;
use crate::sampling::SamplingDecider;
use crate::stack::{BacktraceSource, StackReducer, StackSource};
use crate::store::AggregateStore;

/// What happened to one query-executed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    /// Both records persisted and the push hook ran.
    Completed,
    /// The sampling decision said stop; nothing was written.
    Skipped,
    /// The primary sinks are not open; tracing is disabled for this
    /// listener.
    Aborted,
    /// A pipeline step failed; the error sink has the details.
    Failed(Step),
}

pub struct TraceListener {
    config: TraceConfig,
    writer: RecordWriter,
    decider: SamplingDecider,
    reducer: StackReducer,
    stacks: Box<dyn StackSource>,
    push: Box<dyn PushHook>,
}

impl TraceListener {
    /// Open the sinks and assemble the pipeline. `store` is the optional
    /// aggregate-store handle; pass `None` to run without statistics.
    ///
    /// Sink-open failures do not fail construction (the listener degrades
    /// to `Aborted` outcomes); only an invalid vendor pattern does.
    pub fn new(
        config: TraceConfig,
        store: Option<Arc<dyn AggregateStore>>,
    ) -> anyhow::Result<Self> {
        let writer = RecordWriter::open(&config);
        if config.analyse && store.is_none() {
            let err = TraceError::Store(anyhow::anyhow!(
                "no aggregate store configured, statistics disabled"
            ));
            writer.write_error(&err.to_string());
        }
        let reducer = StackReducer::new(&config.vendor_pattern)?;
        let decider = SamplingDecider::new(&config, store);
        Ok(TraceListener {
            config,
            writer,
            decider,
            reducer,
            stacks: Box::new(BacktraceSource),
            push: Box::new(NoopPush),
        })
    }

    /// Replace the default no-op push hook.
    pub fn with_push(mut self, push: Box<dyn PushHook>) -> Self {
        self.push = push;
        self
    }

    /// Replace the live-backtrace stack source.
    pub fn with_stack_source(mut self, stacks: Box<dyn StackSource>) -> Self {
        self.stacks = stacks;
        self
    }

    /// Handle one query-executed notification. Infallible by contract:
    /// every failure is reported through the returned outcome and the
    /// error sink only.
    pub fn handle(&mut self, ctx: &RequestContext, event: &QueryEvent) -> TraceOutcome {
        if !self.writer.sinks_ok() {
            self.writer.write_error(&TraceError::SinksUnavailable.to_string());
            return TraceOutcome::Aborted;
        }

        let mut rng = rand::rng();
        match self.trace(ctx, event, &mut rng) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.writer.write_error(&err.to_string());
                let step = match &err {
                    TraceError::Step { step, .. } => *step,
                    _ => Step::Identify,
                };
                TraceOutcome::Failed(step)
            }
        }
    }

    fn trace(
        &mut self,
        ctx: &RequestContext,
        event: &QueryEvent,
        rng: &mut dyn RngCore,
    ) -> Result<TraceOutcome, TraceError> {
        // Identify
        let app_trace_id = ctx.request_trace_id(rng).to_string();
        let sql_trace_id = ids::new_sql_trace_id(rng);
        let bindings = event.bindings_joined();

        // Decide
        if !self
            .decider
            .should_trace_and_continue(rng, &event.host, event.elapsed_ms, &event.sql)
        {
            return Ok(TraceOutcome::Skipped);
        }

        // Persist SQL
        self.writer
            .write_sql_record(
                &app_trace_id,
                &sql_trace_id,
                &event.host,
                event.elapsed_ms,
                &event.sql,
                &bindings,
            )
            .map_err(|cause| TraceError::Step {
                step: Step::PersistSql,
                cause,
            })?;

        // Reduce and persist the call chain
        let frames = self.stacks.capture(self.config.max_stack_depth);
        let reduced = self.reducer.reduce(&frames, &sql_trace_id);
        self.writer
            .write_chain_record(&reduced.block)
            .map_err(|cause| TraceError::Step {
                step: Step::PersistStack,
                cause,
            })?;

        // Push
        let record = PushRecord {
            app_trace_id: &app_trace_id,
            sql_trace_id: &sql_trace_id,
            db_host: &event.host,
            elapsed_ms: event.elapsed_ms,
            sql: &event.sql,
            bindings: &bindings,
            caller: &reduced.summary,
        };
        self.push.push(&record).map_err(|cause| TraceError::Step {
            step: Step::Push,
            cause,
        })?;

        Ok(TraceOutcome::Completed)
    }
}
