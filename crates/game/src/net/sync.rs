//! Tick-offset measurement and the adjustment decision.
//!
//! The server records how far ahead or behind each client's messages arrive
//! relative to its own tick, and steers stragglers back toward a small
//! positive lead by stamping adjustments into outgoing batch headers. The
//! client applies each adjustment exactly once, keyed by a monotonic
//! iteration counter that it echoes back in every message it sends.

use std::collections::VecDeque;

/// Tuning for the adjustment controller. The defaults are empirical; each
/// field documents what moving it does.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The tick lead we steer clients toward. Bigger values tolerate more
    /// jitter at the cost of extra input latency.
    pub target_diff: i8,
    /// Inclusive band around the target inside which no adjustment is sent.
    /// Narrowing it makes the controller twitchier.
    pub band_lower: i8,
    pub band_upper: i8,
    /// How many diffs we remember per client; the spike gate averages over
    /// this window.
    pub history_length: usize,
    /// Diffs outside this range mean the client is hopelessly out of sync
    /// and gets disconnected rather than adjusted.
    pub lowest_valid_diff: i64,
    pub highest_valid_diff: i64,
    /// A reading is ignored as a lag spike when it misses the target by at
    /// least `spike_multiplier * avg(|history|) + spike_bias` ticks.
    pub spike_multiplier: f32,
    pub spike_bias: f32,
    /// Largest single adjustment magnitude; drifts are walked in gradually.
    pub max_step: i8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_diff: 2,
            band_lower: 1,
            band_upper: 3,
            history_length: 10,
            lowest_valid_diff: -10,
            highest_valid_diff: 10,
            spike_multiplier: 2.0,
            spike_bias: 3.0,
            max_step: 2,
        }
    }
}

impl SyncConfig {
    pub fn diff_in_valid_range(&self, diff: i64) -> bool {
        diff >= self.lowest_valid_diff && diff <= self.highest_valid_diff
    }
}

/// The adjustment and iteration stamped into a server batch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdjustmentData {
    pub adjustment: i8,
    pub iteration: u8,
}

/// Ring of the most recent tick diffs recorded for one client.
///
/// The first recorded diff seeds the whole ring so the average isn't
/// dragged toward zero while the history fills.
#[derive(Debug)]
pub struct TickDiffHistory {
    diffs: VecDeque<i8>,
    capacity: usize,
    seeded: bool,
}

impl TickDiffHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            diffs: VecDeque::with_capacity(capacity),
            capacity,
            seeded: false,
        }
    }

    /// Records a diff already checked against the valid range.
    pub fn push(&mut self, diff: i8) {
        if !self.seeded {
            for _ in 0..self.capacity {
                self.diffs.push_back(diff);
            }
            self.seeded = true;
            return;
        }

        if self.diffs.len() == self.capacity {
            self.diffs.pop_front();
        }
        self.diffs.push_back(diff);
    }

    /// True once at least one real diff has been recorded.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn latest(&self) -> i8 {
        self.diffs.back().copied().unwrap_or(0)
    }

    pub fn average_abs(&self) -> f32 {
        if self.diffs.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.diffs.iter().map(|d| d.unsigned_abs() as f32).sum();
        sum / self.diffs.len() as f32
    }
}

/// Decides what adjustment, if any, to send a client given its diff history.
///
/// Returns 0 when no data has arrived yet, when the latest diff sits in the
/// acceptable band, or when the reading looks like a lag spike rather than
/// real drift. Otherwise walks the client toward the target in steps of at
/// most `max_step` ticks.
pub fn calc_adjustment(history: &TickDiffHistory, config: &SyncConfig) -> i8 {
    if !history.is_seeded() {
        return 0;
    }

    let latest = history.latest();
    if latest >= config.band_lower && latest <= config.band_upper {
        return 0;
    }

    let missed_by = i32::from(config.target_diff) - i32::from(latest);

    let lag_bound = history.average_abs() * config.spike_multiplier + config.spike_bias;
    if missed_by.unsigned_abs() as f32 >= lag_bound {
        // Best guess at a lag spike rather than real drift; wait for the
        // next reading instead of chasing it.
        return 0;
    }

    let magnitude = if missed_by.unsigned_abs() > config.max_step as u32 {
        config.max_step
    } else {
        1
    };
    if missed_by > 0 { magnitude } else { -magnitude }
}
