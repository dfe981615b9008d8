//! Correlation identifiers linking a request to its queries and stacks.
//!
//! Two kinds of short tokens are minted here: one per logical request
//! (sticky for the request's lifetime) and one per SQL execution (fresh
//! every call). Both come from the same non-cryptographic hash over the
//! clock, the process id, and a random draw. They exist for manual log
//! correlation only, so collision resistance is deliberately not a goal.

use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use rand::RngCore;
use xxhash_rust::xxh3::xxh3_64;

/// HTTP header a host may read the inbound request id from.
pub const TRACE_ID_HEADER: &str = "Trace-Id";
/// Query-string parameter checked when the header is absent.
pub const TRACE_ID_QUERY_PARAM: &str = "trace_id";

/// Mint an 8-character uppercase hex token from (clock, pid, random draw).
pub fn short_id(rng: &mut dyn RngCore) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seed = format!("{}:{}:{}", nanos, process::id(), rng.next_u32());
    let digest = xxh3_64(seed.as_bytes());
    format!("{digest:016X}")[..8].to_string()
}

/// Mint a fresh per-query trace id. Never reused, never cached.
pub fn new_sql_trace_id(rng: &mut dyn RngCore) -> String {
    short_id(rng)
}

/// Per-request identification state.
///
/// The host creates one context when a request enters and threads it
/// through to every query notification for that request. The request
/// trace id is resolved at most once: inbound header value, then query
/// parameter, then a freshly minted token.
#[derive(Debug, Default)]
pub struct RequestContext {
    header_id: Option<String>,
    query_id: Option<String>,
    resolved: OnceCell<String>,
}

impl RequestContext {
    /// `header_id` is the value of the [`TRACE_ID_HEADER`] header if the
    /// inbound request carried one; `query_id` the [`TRACE_ID_QUERY_PARAM`]
    /// parameter. Either may be `None`.
    pub fn new(header_id: Option<String>, query_id: Option<String>) -> Self {
        RequestContext {
            header_id,
            query_id,
            resolved: OnceCell::new(),
        }
    }

    /// The sticky request trace id. Every call on the same context returns
    /// the identical value.
    pub fn request_trace_id(&self, rng: &mut dyn RngCore) -> &str {
        self.resolved.get_or_init(|| {
            self.header_id
                .clone()
                .or_else(|| self.query_id.clone())
                .unwrap_or_else(|| short_id(rng))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_short_id_shape() {
        let mut rng = StepRng::new(0, 1);
        let id = short_id(&mut rng);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_sql_trace_ids_do_not_repeat_consecutively() {
        let mut rng = rand::rng();
        let mut prev = new_sql_trace_id(&mut rng);
        for _ in 0..1000 {
            let next = new_sql_trace_id(&mut rng);
            assert_ne!(prev, next);
            prev = next;
        }
    }

    #[test]
    fn test_request_trace_id_is_sticky() {
        let mut rng = rand::rng();
        let ctx = RequestContext::new(None, None);
        let first = ctx.request_trace_id(&mut rng).to_string();
        assert_eq!(ctx.request_trace_id(&mut rng), first);
        assert_eq!(ctx.request_trace_id(&mut rng), first);
    }

    #[test]
    fn test_request_trace_id_prefers_header() {
        let mut rng = rand::rng();
        let ctx = RequestContext::new(Some("ABCD1234".to_string()), Some("EF567890".to_string()));
        assert_eq!(ctx.request_trace_id(&mut rng), "ABCD1234");
    }

    #[test]
    fn test_request_trace_id_falls_back_to_query_param() {
        let mut rng = rand::rng();
        let ctx = RequestContext::new(None, Some("EF567890".to_string()));
        assert_eq!(ctx.request_trace_id(&mut rng), "EF567890");
    }

    #[test]
    fn test_fresh_contexts_differ() {
        let mut rng = rand::rng();
        let a = RequestContext::new(None, None);
        let b = RequestContext::new(None, None);
        assert_ne!(a.request_trace_id(&mut rng), b.request_trace_id(&mut rng));
    }
}
