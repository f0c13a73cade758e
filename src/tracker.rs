use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tracing::info;

/// Counters returned by [`TrafficTracker::record`] for threshold checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub pair_count: u64,
    pub distinct_ports: usize,
}

/// Per-epoch traffic counters.
///
/// Pair counts and port sets only grow until the reset interval elapses, at
/// which point everything is wiped at once. This is a fixed epoch, not a
/// sliding window: a burst that straddles a reset is split across two epochs.
#[derive(Debug)]
pub struct TrafficTracker {
    pair_counts: HashMap<IpAddr, HashMap<IpAddr, u64>>,
    port_sets: HashMap<IpAddr, HashSet<u16>>,
    interval: Duration,
    last_reset: Instant,
    resets: u64,
}

impl TrafficTracker {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            pair_counts: HashMap::new(),
            port_sets: HashMap::new(),
            interval,
            last_reset: now,
            resets: 0,
        }
    }

    /// Count one packet from `src` to `dst`. `dst_port` is only passed for
    /// TCP so UDP traffic never feeds the port-scan signal.
    pub fn record(&mut self, src: IpAddr, dst: IpAddr, dst_port: Option<u16>) -> Observation {
        let pair_count = {
            let count = self.pair_counts.entry(src).or_default().entry(dst).or_insert(0);
            *count += 1;
            *count
        };

        let distinct_ports = match dst_port {
            Some(port) => {
                let ports = self.port_sets.entry(src).or_default();
                ports.insert(port);
                ports.len()
            }
            None => self.distinct_ports(src),
        };

        Observation { pair_count, distinct_ports }
    }

    pub fn pair_count(&self, src: IpAddr, dst: IpAddr) -> u64 {
        self.pair_counts
            .get(&src)
            .and_then(|dsts| dsts.get(&dst))
            .copied()
            .unwrap_or(0)
    }

    pub fn distinct_ports(&self, src: IpAddr) -> usize {
        self.port_sets.get(&src).map_or(0, HashSet::len)
    }

    pub fn tracked_sources(&self) -> usize {
        self.pair_counts.len()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Wipe all counters if more than one interval has passed since the last
    /// wipe. Returns whether a reset happened.
    pub fn maybe_reset(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_reset) > self.interval {
            self.reset(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self, now: Instant) {
        let sources = self.tracked_sources();
        self.pair_counts.clear();
        self.port_sets.clear();
        self.last_reset = now;
        self.resets += 1;
        info!(sources, "Cleared tracking data");
    }
}
