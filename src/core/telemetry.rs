use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// A single entry in the execution trace: one brick invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// Label of the pipeline frame the node ran in (`root`, `for-each[2]`, ...).
    pub frame: String,
    pub brick_id: String,
    pub node_id: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Trait for recording execution traces.
///
/// Implementations must swallow their own failures: a sink that cannot record never
/// changes the outcome of a run.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self);
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn flush(&self) {
        // No-op for memory collector
    }
}

/// Forwards every trace to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record(&self, entry: TraceEntry) {
        match &entry.error {
            Some(error) => log::warn!(
                target: "mortar::trace",
                "run={} frame={} brick={} node={} failed after {}ms: {}",
                entry.run_id, entry.frame, entry.brick_id, entry.node_id, entry.duration_ms, error
            ),
            None => log::info!(
                target: "mortar::trace",
                "run={} frame={} brick={} node={} took {}ms",
                entry.run_id, entry.frame, entry.brick_id, entry.node_id, entry.duration_ms
            ),
        }
    }

    fn flush(&self) {}
}
