//! Push hook: the extension point for forwarding a fully traced query to
//! a metric backend.

use std::io::Write;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

/// Everything the pipeline collected for one traced query.
#[derive(Debug, Clone, Serialize)]
pub struct PushRecord<'a> {
    pub app_trace_id: &'a str,
    pub sql_trace_id: &'a str,
    pub db_host: &'a str,
    pub elapsed_ms: f64,
    pub sql: &'a str,
    pub bindings: &'a str,
    /// Most proximate application frame, from the reduced call chain.
    pub caller: &'a str,
}

/// Invoked once per fully persisted trace, after both records are
/// written. Implementations may block; the pipeline runs inline with the
/// host's request.
pub trait PushHook: Send {
    fn push(&mut self, record: &PushRecord<'_>) -> Result<()>;
}

/// Default hook: does nothing.
#[derive(Debug, Default)]
pub struct NoopPush;

impl PushHook for NoopPush {
    fn push(&mut self, _record: &PushRecord<'_>) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per traced query to any `io::Write` sink,
/// wrapped in a `msg`/`timestamp` envelope.
pub struct JsonLinePush<W> {
    sink: W,
}

impl<W: Write + Send> JsonLinePush<W> {
    pub fn new(sink: W) -> Self {
        JsonLinePush { sink }
    }
}

impl<W: Write + Send> PushHook for JsonLinePush<W> {
    fn push(&mut self, record: &PushRecord<'_>) -> Result<()> {
        let mut value = serde_json::to_value(record)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("msg".to_string(), "trace-sql".into());
            map.insert(
                "timestamp".to_string(),
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string().into(),
            );
        }
        serde_json::to_writer(&mut self.sink, &value)?;
        self.sink.write_all(b"\n")?;
        Ok(())
    }
}
