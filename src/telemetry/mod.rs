//! # Telemetry Module
//!
//! Side channel receiving one [`AttemptRecord`] per candidate tried.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TelemetrySink`] | Trait for record destinations |
//! | [`NoopTelemetrySink`] | Default, records nothing |
//! | [`InMemoryTelemetrySink`] | Bounded in-memory buffer, for tests and inspection |
//! | [`TracingTelemetrySink`] | Emits each record as a `tracing` event |
//! | [`CompositeTelemetrySink`] | Fans out to several sinks |
//!
//! Sinks are best-effort. The dispatcher only enqueues records; a background
//! task hands them to the sink, bounding each `record` call with a timeout and
//! swallowing errors and panics. A slow or broken sink never delays or
//! changes a dispatch. Use [`Dispatcher::flush_telemetry`] to wait for
//! delivery.
//!
//! [`Dispatcher::flush_telemetry`]: crate::Dispatcher::flush_telemetry

mod queue;

pub(crate) use queue::RecordQueue;

use crate::dispatch::AttemptRecord;
use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::info;

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: AttemptRecord) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Records nothing.
pub struct NoopTelemetrySink;

#[async_trait]
impl TelemetrySink for NoopTelemetrySink {
    async fn record(&self, _: AttemptRecord) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn TelemetrySink> {
    Arc::new(NoopTelemetrySink)
}

/// Keeps the most recent `max` records.
pub struct InMemoryTelemetrySink {
    records: RwLock<VecDeque<AttemptRecord>>,
    max_records: usize,
}

impl InMemoryTelemetrySink {
    pub fn new(max: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max,
        }
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .read()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn records_for(&self, invocation_id: &str) -> Vec<AttemptRecord> {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|rec| rec.invocation_id == invocation_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut r) = self.records.write() {
            r.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTelemetrySink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl TelemetrySink for InMemoryTelemetrySink {
    async fn record(&self, record: AttemptRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::telemetry("telemetry buffer lock poisoned"))?;
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
        Ok(())
    }
}

/// Logs each record at `info` under the `ai_dispatch::attempt` target.
#[derive(Default)]
pub struct TracingTelemetrySink;

impl TracingTelemetrySink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TelemetrySink for TracingTelemetrySink {
    async fn record(&self, r: AttemptRecord) -> Result<()> {
        let failure = r.error.as_ref().map(|e| e.kind.as_str());
        let verdict = r.verdict.map(|v| format!("{:?}", v));
        info!(
            target: "ai_dispatch::attempt",
            invocation_id = %r.invocation_id,
            candidate_index = r.candidate_index,
            candidate = %r.candidate,
            model = %r.model,
            fingerprint = %r.fingerprint.short(),
            cached = r.cached,
            verdict = ?verdict,
            cost = r.cost,
            duration_ms = r.duration_ms,
            failure = ?failure,
            "attempt"
        );
        Ok(())
    }
}

/// Forwards every record to each inner sink; one sink failing does not stop the others.
#[derive(Default)]
pub struct CompositeTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl CompositeTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl TelemetrySink for CompositeTelemetrySink {
    async fn record(&self, record: AttemptRecord) -> Result<()> {
        let mut first_err = None;
        for s in &self.sinks {
            if let Err(e) = s.record(record.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn flush(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.flush().await;
        }
        Ok(())
    }
}
