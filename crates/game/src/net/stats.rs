use std::sync::atomic::{AtomicU64, Ordering};

/// How many sim ticks pass between netstats dumps.
pub const TICKS_TILL_STATS_DUMP: u32 = 150;
/// Wall-clock seconds covered by one dump interval at the default sim rate.
pub const SECONDS_TILL_STATS_DUMP: f32 = 5.0;

static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_RECEIVED: AtomicU64 = AtomicU64::new(0);

/// Process-wide traffic counters, recorded at every socket send and receive
/// and drained by the periodic logger on whichever side we're running as.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetStatsDump {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub fn record_bytes_sent(count: usize) {
    BYTES_SENT.fetch_add(count as u64, Ordering::Relaxed);
}

pub fn record_bytes_received(count: usize) {
    BYTES_RECEIVED.fetch_add(count as u64, Ordering::Relaxed);
}

/// Returns the counters accumulated since the last dump and resets them.
pub fn dump_stats() -> NetStatsDump {
    NetStatsDump {
        bytes_sent: BYTES_SENT.swap(0, Ordering::Relaxed),
        bytes_received: BYTES_RECEIVED.swap(0, Ordering::Relaxed),
    }
}

/// Logs the per-second send/receive rates for the interval that just ended.
pub fn log_stats() {
    let stats = dump_stats();
    log::info!(
        "bytes sent per second: {:.0}, bytes received per second: {:.0}",
        stats.bytes_sent as f32 / SECONDS_TILL_STATS_DUMP,
        stats.bytes_received as f32 / SECONDS_TILL_STATS_DUMP
    );
}
