//! Prometheus metrics for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// HTTP requests on the MCP endpoint
    pub requests_total: AtomicU64,
    /// Requests rejected before reaching a session
    pub requests_rejected: AtomicU64,
    /// Sessions created by a successful initialize
    pub sessions_created: AtomicU64,
    /// Live sessions
    pub active_sessions: AtomicU64,
    /// Tool calls
    pub tool_calls: AtomicU64,
    /// Tool calls that returned an error result
    pub tool_errors: AtomicU64,
    /// Events written to session event stores
    pub events_stored: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_errors(&self) {
        self.tool_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_stored(&self) {
        self.events_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            events_stored: self.events_stored.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 7] = [
            ("requests_total", "counter", "HTTP requests on the MCP endpoint", s.requests_total),
            ("requests_rejected", "counter", "Requests rejected before reaching a session", s.requests_rejected),
            ("sessions_created", "counter", "Sessions created by initialize", s.sessions_created),
            ("active_sessions", "gauge", "Live MCP sessions", s.active_sessions),
            ("tool_calls", "counter", "Tool calls", s.tool_calls),
            ("tool_errors", "counter", "Tool calls that returned an error result", s.tool_errors),
            ("events_stored", "counter", "SSE events written to event stores", s.events_stored),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP budget_mcp_{name} {help}\n# TYPE budget_mcp_{name} {kind}\nbudget_mcp_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_rejected: u64,
    pub sessions_created: u64,
    pub active_sessions: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub events_stored: u64,
}
