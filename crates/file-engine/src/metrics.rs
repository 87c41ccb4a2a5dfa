//! Engine metrics.
//!
//! A single metrics object owned by the engine instance: monotonic
//! operation counters, a decaying average response time, and a periodic
//! refresh that derives throughput without ever blocking operation
//! execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::CacheStats;

/// How often the derived throughput figures are recomputed.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Operation categories tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    List,
    Edit,
    Replace,
}

impl OpKind {
    pub const ALL: [OpKind; 5] = [
        OpKind::Read,
        OpKind::Write,
        OpKind::List,
        OpKind::Edit,
        OpKind::Replace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::List => "list",
            Self::Edit => "edit",
            Self::Replace => "replace",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::List => 2,
            Self::Edit => 3,
            Self::Replace => 4,
        }
    }
}

/// Serializable point-in-time view of the metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub operations_total: u64,
    pub reads: u64,
    pub writes: u64,
    pub lists: u64,
    pub edits: u64,
    pub replaces: u64,
    pub avg_response_micros: u64,
    pub ops_per_sec: f64,
    pub last_refresh_unix: u64,
    pub cache: CacheStats,
    pub mapped_entries: usize,
}

#[derive(Debug)]
struct RefreshState {
    last_refresh: SystemTime,
    ops_at_refresh: u64,
    refreshed_at: Instant,
    ops_per_sec: f64,
}

/// Engine-owned metrics, updated under their own synchronization.
#[derive(Debug)]
pub struct EngineMetrics {
    started: Instant,
    ops_total: AtomicU64,
    per_op: [AtomicU64; 5],
    avg_response_us: AtomicU64,
    refresh: Mutex<RefreshState>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ops_total: AtomicU64::new(0),
            per_op: Default::default(),
            avg_response_us: AtomicU64::new(0),
            refresh: Mutex::new(RefreshState {
                last_refresh: SystemTime::now(),
                ops_at_refresh: 0,
                refreshed_at: Instant::now(),
                ops_per_sec: 0.0,
            }),
        }
    }

    /// Records one completed operation. Called from the admission permit's
    /// release path.
    pub fn record(&self, op: OpKind, elapsed: Duration) {
        self.ops_total.fetch_add(1, Ordering::Relaxed);
        self.per_op[op.index()].fetch_add(1, Ordering::Relaxed);

        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        // Decaying average: each sample halves the weight of history.
        let _ = self
            .avg_response_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                Some(if old == 0 { micros } else { (old + micros) / 2 })
            });
    }

    /// Recomputes the derived throughput figures. Runs on its own timer
    /// task, never on an operation's path.
    pub fn refresh(&self) {
        let total = self.ops_total.load(Ordering::Relaxed);
        let mut state = self.refresh.lock();
        let window = state.refreshed_at.elapsed().as_secs_f64();
        if window > 0.0 {
            state.ops_per_sec = (total - state.ops_at_refresh) as f64 / window;
        }
        state.ops_at_refresh = total;
        state.refreshed_at = Instant::now();
        state.last_refresh = SystemTime::now();
    }

    pub fn snapshot(&self, cache: CacheStats, mapped_entries: usize) -> MetricsSnapshot {
        let state = self.refresh.lock();
        let last_refresh_unix = state
            .last_refresh
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            operations_total: self.ops_total.load(Ordering::Relaxed),
            reads: self.per_op[OpKind::Read.index()].load(Ordering::Relaxed),
            writes: self.per_op[OpKind::Write.index()].load(Ordering::Relaxed),
            lists: self.per_op[OpKind::List.index()].load(Ordering::Relaxed),
            edits: self.per_op[OpKind::Edit.index()].load(Ordering::Relaxed),
            replaces: self.per_op[OpKind::Replace.index()].load(Ordering::Relaxed),
            avg_response_micros: self.avg_response_us.load(Ordering::Relaxed),
            ops_per_sec: state.ops_per_sec,
            last_refresh_unix,
            cache,
            mapped_entries,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
