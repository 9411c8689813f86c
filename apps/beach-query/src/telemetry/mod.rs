pub mod logging;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

static PERF_ENABLED: LazyLock<bool> =
    LazyLock::new(|| env_truthy("BEACH_QUERY_PERF").unwrap_or(false));

static STATS: LazyLock<Mutex<HashMap<&'static str, PerfStat>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerfStat {
    pub total_ns: u128,
    pub max_ns: u128,
    pub count: u64,
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, duration: Duration) {
    if !enabled() {
        return;
    }
    let mut stats = STATS.lock();
    let entry = stats.entry(label).or_default();
    entry.count += 1;
    let nanos = duration.as_nanos();
    entry.total_ns += nanos;
    entry.max_ns = entry.max_ns.max(nanos);
    if entry.count % 200 == 0 {
        log_stat(label, entry);
    }
}

fn log_stat(label: &'static str, stat: &PerfStat) {
    let avg_ns = stat.total_ns / u128::from(stat.count.max(1));
    tracing::info!(
        target: "beach_query::perf",
        label,
        count = stat.count,
        avg_us = avg_ns as f64 / 1_000.0,
        max_us = stat.max_ns as f64 / 1_000.0,
        "perf"
    );
}

/// Times a scope when `BEACH_QUERY_PERF` is set.
pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        if !enabled() {
            return None;
        }
        Some(Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.start.elapsed());
    }
}
