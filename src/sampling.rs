//! The analyse-and-continue sampling decision.
//!
//! Slow queries are always captured. Fast queries are captured with a
//! small fixed probability so log volume stays bounded while statistical
//! outliers still surface. Local environments trace everything.
//!
//! When aggregation is enabled, every call (sampled or not) also feeds
//! the day-bucketed frequency and timing counters in the aggregate store,
//! keyed by a hash of (host, sql). Store failures are swallowed here and
//! never influence the decision itself, which is computed first.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use rand::RngCore;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{Environment, TraceConfig};
use crate::error::TraceError;
use crate::store::AggregateStore;

/// Size of the uniform sampling draw.
const SAMPLE_SCALE: u32 = 20_000;
/// How many draws out of [`SAMPLE_SCALE`] are captured.
const SAMPLE_KEEP: u32 = 20;
/// Day-bucket keys expire this long after their first traced sample.
const AGGREGATE_TTL: Duration = Duration::from_secs(2 * 86_400);

const META_KEY_PREFIX: &str = "SQL_TRACE_HASH_KEY";
const CALLS_KEY_PREFIX: &str = "SQL_TRACE_HASH_KEY_INCR";
const TIME_KEY_PREFIX: &str = "SQL_TRACE_HASH_KEY_TIME_INCR";

pub struct SamplingDecider {
    environment: Environment,
    slow_ms: f64,
    analyse: bool,
    app_host: String,
    store: Option<Arc<dyn AggregateStore>>,
}

impl SamplingDecider {
    pub fn new(config: &TraceConfig, store: Option<Arc<dyn AggregateStore>>) -> Self {
        SamplingDecider {
            environment: config.environment,
            slow_ms: config.slow_ms,
            analyse: config.analyse,
            app_host: config.app_host.clone(),
            store,
        }
    }

    /// Decide whether this execution is traced in full, updating the
    /// aggregate counters along the way when enabled.
    ///
    /// Returns `false` when the caller must stop all further work for
    /// this query. Never fails: aggregate-store trouble downgrades to a
    /// warning and the slow/random decision stands.
    pub fn should_trace_and_continue(
        &self,
        rng: &mut dyn RngCore,
        host: &str,
        elapsed_ms: f64,
        sql: &str,
    ) -> bool {
        let is_continue = self.decide(rng, elapsed_ms);

        if self.analyse {
            if let Some(store) = &self.store {
                if let Err(err) =
                    self.record_aggregates(store.as_ref(), host, elapsed_ms, sql, is_continue)
                {
                    tracing::warn!("{}", TraceError::Store(err));
                }
            }
        }

        is_continue
    }

    fn decide(&self, rng: &mut dyn RngCore, elapsed_ms: f64) -> bool {
        match self.environment {
            Environment::Local => true,
            Environment::Production => {
                elapsed_ms > self.slow_ms || sample_draw(rng) > SAMPLE_SCALE - SAMPLE_KEEP
            }
        }
    }

    fn record_aggregates(
        &self,
        store: &dyn AggregateStore,
        host: &str,
        elapsed_ms: f64,
        sql: &str,
        traced: bool,
    ) -> Result<()> {
        let field = content_key(host, sql);
        let day = current_day();
        let meta_key = format!("{META_KEY_PREFIX}:{day}");
        let calls_key = format!("{CALLS_KEY_PREFIX}:{day}");
        let time_key = format!("{TIME_KEY_PREFIX}:{day}");

        if traced || !store.hash_field_exists(&meta_key, &field)? {
            store.hash_field_set(&meta_key, &field, &self.describe(host, sql))?;
        }
        store.hash_field_incr_by(&calls_key, &field, 1)?;
        store.hash_field_incr_by_float(&time_key, &field, elapsed_ms)?;

        if traced {
            for key in [&meta_key, &calls_key, &time_key] {
                store.expire_if_unset(key, AGGREGATE_TTL)?;
            }
        }
        Ok(())
    }

    fn describe(&self, host: &str, sql: &str) -> String {
        format!(
            "```db_host={host}```app_host={}```pid={}```sql={sql}```",
            self.app_host,
            process::id()
        )
    }
}

fn sample_draw(rng: &mut dyn RngCore) -> u32 {
    rng.next_u32() % SAMPLE_SCALE + 1
}

/// Hash of (host, sql) identifying a distinct statement for aggregation.
fn content_key(host: &str, sql: &str) -> String {
    format!("{:016x}", xxh3_64(format!("{host}{sql}").as_bytes()))
}

fn current_day() -> String {
    Local::now().format("%Y%m%d").to_string()
}
