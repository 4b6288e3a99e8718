//! Periodic decode statistics aggregated from UI snapshots.

use dvrx_core::events::UiSnapshot;

/// Rolling statistics the status thread prints once per interval.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    snapshots_seen: u64,
    carrier_snapshots: u64,
    last_seq: u64,
    last_fingerprints: [u64; 2],
    calls_observed: u64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one snapshot in; returns true when slot activity changed and
    /// a status line is worth printing.
    pub fn update(&mut self, snapshot: &UiSnapshot) -> bool {
        if snapshot.seq == self.last_seq {
            return false; // nothing new published
        }
        self.last_seq = snapshot.seq;
        self.snapshots_seen += 1;
        if snapshot.carrier {
            self.carrier_snapshots += 1;
        }

        let mut changed = false;
        for (slot, snap) in snapshot.slots.iter().enumerate() {
            if snap.event_fingerprint != self.last_fingerprints[slot] {
                self.last_fingerprints[slot] = snap.event_fingerprint;
                self.calls_observed += 1;
                changed = true;
            }
        }
        changed
    }

    pub fn carrier_ratio(&self) -> f64 {
        if self.snapshots_seen == 0 {
            return 0.0;
        }
        self.carrier_snapshots as f64 / self.snapshots_seen as f64
    }

    pub fn calls_observed(&self) -> u64 {
        self.calls_observed
    }
}
