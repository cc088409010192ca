//! Call-level instrumentation for persistent RPC sessions.
//!
//! The Python side of an RPC comparison tends to hide cost in two
//! places: individual remote calls that are quietly slow, and proxy
//! objects whose attribute traffic turns one logical operation into a
//! deep stack of round trips. [`Telemetry`] records both: every
//! instrumented call gets a [`CallRecord`] with timing, nesting depth,
//! and outcome, and every tracked remote proxy gets a [`ProxyRecord`]
//! counting how it is used.
//!
//! A [`Telemetry`] handle is cheap to clone; all clones share one
//! mutex-guarded store. Instrumentation is explicit: wrap a connection
//! in [`InstrumentedConnection`] or call `start_call`/`end_call`
//! directly. When disabled, `start_call` returns `None` and recording
//! is a no-op.

use crate::bench::Connection;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// What kind of remote operation a call record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Method,
    GetAttr,
    SetAttr,
}

/// One instrumented remote call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call_id: u64,
    pub method: String,
    pub kind: CallKind,
    pub started_at: Instant,
    pub duration: Option<Duration>,
    /// How many calls were already open when this one started.
    pub stack_depth: usize,
    pub parent_call_id: Option<u64>,
    pub proxy_id: Option<u64>,
    pub result_proxy_id: Option<u64>,
    pub error: Option<String>,
}

/// Usage counters for one tracked remote proxy object.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub proxy_id: u64,
    pub class_name: String,
    pub created_by_call: Option<u64>,
    pub created_at: Instant,
    pub accesses: u64,
    pub method_calls: u64,
    pub attr_accesses: u64,
    pub last_access: Instant,
}

/// Aggregated view over everything recorded so far.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryStats {
    pub total_calls: u64,
    pub completed_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub max_stack_depth: usize,
    pub deep_stack_calls: u64,
    pub live_proxies: usize,
    pub total_proxies_created: u64,
    pub total_call_time_secs: f64,
}

struct TelemetryInner {
    enabled: bool,
    next_call_id: u64,
    next_proxy_id: u64,
    /// Ids of calls currently in flight, innermost last.
    call_stack: Vec<u64>,
    history: Vec<CallRecord>,
    proxies: HashMap<u64, ProxyRecord>,
    dropped_proxies: u64,
    max_stack_depth: usize,
}

impl TelemetryInner {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_call_id: 0,
            next_proxy_id: 0,
            call_stack: Vec::new(),
            history: Vec::new(),
            proxies: HashMap::new(),
            dropped_proxies: 0,
            max_stack_depth: 0,
        }
    }
}

/// Shared telemetry store. Clone freely; clones see the same data.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Mutex<TelemetryInner>>,
    slow_call_threshold: Duration,
    deep_stack_threshold: usize,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TelemetryInner::new(true))),
            slow_call_threshold: crate::defaults::SLOW_CALL_THRESHOLD,
            deep_stack_threshold: crate::defaults::DEEP_STACK_THRESHOLD,
        }
    }

    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold = threshold;
        self
    }

    pub fn with_deep_stack_threshold(mut self, threshold: usize) -> Self {
        self.deep_stack_threshold = threshold;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TelemetryInner> {
        // A poisoned store only means a panic elsewhere already aborted a
        // recording; the data is still readable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    pub fn disable(&self) {
        self.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Open a call record. Returns the call id to pass to [`end_call`],
    /// or `None` when telemetry is disabled.
    pub fn start_call(
        &self,
        method: impl Into<String>,
        kind: CallKind,
        proxy_id: Option<u64>,
    ) -> Option<u64> {
        let mut inner = self.lock();
        if !inner.enabled {
            return None;
        }

        inner.next_call_id += 1;
        let call_id = inner.next_call_id;
        let stack_depth = inner.call_stack.len();
        let parent_call_id = inner.call_stack.last().copied();
        inner.call_stack.push(call_id);
        inner.max_stack_depth = inner.max_stack_depth.max(inner.call_stack.len());

        if inner.call_stack.len() >= self.deep_stack_threshold {
            warn!(
                "call stack depth {} at call {call_id}; nested remote calls are compounding round trips",
                inner.call_stack.len()
            );
        }

        let method = method.into();
        if let Some(pid) = proxy_id {
            touch(&mut inner, pid, kind);
        }

        inner.history.push(CallRecord {
            call_id,
            method,
            kind,
            started_at: Instant::now(),
            duration: None,
            stack_depth,
            parent_call_id,
            proxy_id,
            result_proxy_id: None,
            error: None,
        });
        Some(call_id)
    }

    /// Close a call record opened by [`start_call`]. `call_id: None`
    /// (telemetry was disabled at start) is a no-op.
    pub fn end_call(
        &self,
        call_id: Option<u64>,
        result_proxy_id: Option<u64>,
        error: Option<String>,
    ) {
        let Some(call_id) = call_id else { return };
        let mut inner = self.lock();

        if let Some(pos) = inner.call_stack.iter().rposition(|&id| id == call_id) {
            inner.call_stack.remove(pos);
        }

        let slow_threshold = self.slow_call_threshold;
        if let Some(record) = inner.history.iter_mut().rfind(|r| r.call_id == call_id) {
            let duration = record.started_at.elapsed();
            record.duration = Some(duration);
            record.result_proxy_id = result_proxy_id;
            record.error = error;

            if duration >= slow_threshold {
                warn!(
                    "slow remote call: {} took {:.3}s",
                    record.method,
                    duration.as_secs_f64()
                );
            }
        }
    }

    /// Register a remote proxy object and return its id.
    pub fn register_proxy(&self, class_name: impl Into<String>) -> u64 {
        let mut inner = self.lock();
        inner.next_proxy_id += 1;
        let proxy_id = inner.next_proxy_id;
        let created_by_call = inner.call_stack.last().copied();
        let now = Instant::now();
        inner.proxies.insert(
            proxy_id,
            ProxyRecord {
                proxy_id,
                class_name: class_name.into(),
                created_by_call,
                created_at: now,
                accesses: 0,
                method_calls: 0,
                attr_accesses: 0,
                last_access: now,
            },
        );
        proxy_id
    }

    /// Record an access against a proxy without opening a call record.
    pub fn touch_proxy(&self, proxy_id: u64, kind: CallKind) {
        touch(&mut self.lock(), proxy_id, kind);
    }

    /// Forget a proxy (its remote peer was released).
    pub fn drop_proxy(&self, proxy_id: u64) {
        let mut inner = self.lock();
        if inner.proxies.remove(&proxy_id).is_some() {
            inner.dropped_proxies += 1;
        }
    }

    /// Current in-flight call nesting depth.
    pub fn stack_depth(&self) -> usize {
        self.lock().call_stack.len()
    }

    pub fn stats(&self) -> TelemetryStats {
        let inner = self.lock();
        let completed = inner.history.iter().filter(|r| r.duration.is_some());

        TelemetryStats {
            total_calls: inner.history.len() as u64,
            completed_calls: completed.clone().count() as u64,
            failed_calls: inner.history.iter().filter(|r| r.error.is_some()).count() as u64,
            slow_calls: completed
                .clone()
                .filter(|r| r.duration.unwrap_or_default() >= self.slow_call_threshold)
                .count() as u64,
            max_stack_depth: inner.max_stack_depth,
            deep_stack_calls: inner
                .history
                .iter()
                .filter(|r| r.stack_depth + 1 >= self.deep_stack_threshold)
                .count() as u64,
            live_proxies: inner.proxies.len(),
            total_proxies_created: inner.next_proxy_id,
            total_call_time_secs: completed
                .map(|r| r.duration.unwrap_or_default().as_secs_f64())
                .sum(),
        }
    }

    /// Full call history, oldest first.
    pub fn history(&self) -> Vec<CallRecord> {
        self.lock().history.clone()
    }

    /// Completed calls at or over the slow-call threshold.
    pub fn slow_calls(&self) -> Vec<CallRecord> {
        self.lock()
            .history
            .iter()
            .filter(|r| matches!(r.duration, Some(d) if d >= self.slow_call_threshold))
            .cloned()
            .collect()
    }

    /// Snapshot of currently tracked proxies.
    pub fn proxies(&self) -> Vec<ProxyRecord> {
        self.lock().proxies.values().cloned().collect()
    }

    /// Clear all recorded data; the enabled flag and id counters survive
    /// so ids stay unique across resets.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.call_stack.clear();
        inner.history.clear();
        inner.proxies.clear();
        inner.dropped_proxies = 0;
        inner.max_stack_depth = 0;
    }
}

fn touch(inner: &mut TelemetryInner, proxy_id: u64, kind: CallKind) {
    if let Some(proxy) = inner.proxies.get_mut(&proxy_id) {
        proxy.accesses += 1;
        proxy.last_access = Instant::now();
        match kind {
            CallKind::Method => proxy.method_calls += 1,
            CallKind::GetAttr | CallKind::SetAttr => proxy.attr_accesses += 1,
        }
    }
}

/// A [`Connection`] wrapper that records every operation into a
/// [`Telemetry`] store, errors included, then passes the result through
/// unchanged.
pub struct InstrumentedConnection {
    inner: Box<dyn Connection>,
    telemetry: Telemetry,
}

impl InstrumentedConnection {
    pub fn new(inner: Box<dyn Connection>, telemetry: Telemetry) -> Self {
        Self { inner, telemetry }
    }
}

#[async_trait]
impl Connection for InstrumentedConnection {
    async fn request(&mut self) -> Result<()> {
        let call = self.telemetry.start_call("request", CallKind::Method, None);
        let result = self.inner.request().await;
        self.telemetry
            .end_call(call, None, result.as_ref().err().map(|e| format!("{e:#}")));
        result
    }

    async fn upload(&mut self, payload: &[u8]) -> Result<usize> {
        let call = self.telemetry.start_call("upload", CallKind::Method, None);
        let result = self.inner.upload(payload).await;
        self.telemetry
            .end_call(call, None, result.as_ref().err().map(|e| format!("{e:#}")));
        result
    }

    async fn download(&mut self, len: usize) -> Result<Vec<u8>> {
        let call = self.telemetry.start_call("download", CallKind::Method, None);
        let result = self.inner.download(len).await;
        self.telemetry
            .end_call(call, None, result.as_ref().err().map(|e| format!("{e:#}")));
        result
    }

    async fn close(&mut self) -> Result<()> {
        let call = self.telemetry.start_call("close", CallKind::Method, None);
        let result = self.inner.close().await;
        self.telemetry
            .end_call(call, None, result.as_ref().err().map(|e| format!("{e:#}")));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::testing::FakeFactory;
    use crate::bench::ConnectionFactory;
    use std::time::Duration;

    #[test]
    fn test_call_ids_are_monotonic_and_history_ordered() {
        let telemetry = Telemetry::new();
        let a = telemetry.start_call("first", CallKind::Method, None);
        telemetry.end_call(a, None, None);
        let b = telemetry.start_call("second", CallKind::Method, None);
        telemetry.end_call(b, None, None);

        assert!(a.unwrap() < b.unwrap());
        let history = telemetry.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].method, "first");
        assert_eq!(history[1].method, "second");
    }

    #[test]
    fn test_nested_calls_track_depth_and_parent() {
        let telemetry = Telemetry::new();
        let outer = telemetry.start_call("outer", CallKind::Method, None);
        let inner = telemetry.start_call("inner", CallKind::GetAttr, None);
        assert_eq!(telemetry.stack_depth(), 2);

        telemetry.end_call(inner, None, None);
        telemetry.end_call(outer, None, None);
        assert_eq!(telemetry.stack_depth(), 0);

        let history = telemetry.history();
        assert_eq!(history[0].stack_depth, 0);
        assert_eq!(history[1].stack_depth, 1);
        assert_eq!(history[1].parent_call_id, Some(history[0].call_id));
        assert_eq!(telemetry.stats().max_stack_depth, 2);
    }

    #[test]
    fn test_disabled_telemetry_records_nothing() {
        let telemetry = Telemetry::new();
        telemetry.disable();
        let call = telemetry.start_call("ignored", CallKind::Method, None);
        assert!(call.is_none());
        telemetry.end_call(call, None, None);
        assert!(telemetry.history().is_empty());
    }

    #[test]
    fn test_proxy_access_counters() {
        let telemetry = Telemetry::new();
        let pid = telemetry.register_proxy("RemoteList");
        telemetry.touch_proxy(pid, CallKind::Method);
        telemetry.touch_proxy(pid, CallKind::GetAttr);
        telemetry.touch_proxy(pid, CallKind::GetAttr);

        let proxies = telemetry.proxies();
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0].accesses, 3);
        assert_eq!(proxies[0].method_calls, 1);
        assert_eq!(proxies[0].attr_accesses, 2);

        telemetry.drop_proxy(pid);
        assert!(telemetry.proxies().is_empty());
    }

    #[test]
    fn test_slow_calls_are_flagged() {
        let telemetry = Telemetry::new().with_slow_call_threshold(Duration::ZERO);
        let call = telemetry.start_call("anything", CallKind::Method, None);
        telemetry.end_call(call, None, None);

        assert_eq!(telemetry.slow_calls().len(), 1);
        assert_eq!(telemetry.stats().slow_calls, 1);
    }

    #[test]
    fn test_errors_are_recorded() {
        let telemetry = Telemetry::new();
        let call = telemetry.start_call("broken", CallKind::Method, None);
        telemetry.end_call(call, None, Some("connection reset".into()));

        let stats = telemetry.stats();
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(telemetry.history()[0].error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_reset_clears_data_but_keeps_ids_unique() {
        let telemetry = Telemetry::new();
        let first = telemetry.start_call("a", CallKind::Method, None).unwrap();
        telemetry.end_call(Some(first), None, None);
        telemetry.reset();
        assert!(telemetry.history().is_empty());

        let second = telemetry.start_call("b", CallKind::Method, None).unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_instrumented_connection_records_operations_and_errors() {
        let mut factory = FakeFactory::new(Duration::ZERO);
        factory.fail_every = Some(2);
        let telemetry = Telemetry::new();
        let conn = factory.connect().await.unwrap();
        let mut conn = InstrumentedConnection::new(conn, telemetry.clone());

        conn.request().await.unwrap();
        assert!(conn.request().await.is_err());
        conn.upload(b"abc").await.unwrap();

        let stats = telemetry.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.completed_calls, 3);
        assert_eq!(stats.failed_calls, 1);
    }
}
