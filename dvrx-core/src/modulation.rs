//! Modulation auto-classification with hysteresis.
//!
//! Chooses between C4FM, CQPSK and GFSK once per sync window using two
//! best-effort inputs: smoothed SNR estimates from the IQ front-end and the
//! recent best Hamming distance between the dibit window and each
//! modulation family's sync templates. Votes add hysteresis so a single
//! noisy window never flips the slicer.
//!
//! The vote counters and SNR estimates are atomics: `reset_mod_state` may
//! be called from the tuning thread while the demod thread is deciding.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use atomic_float::AtomicF64;
use serde::{Deserialize, Serialize};

/// Physical-layer modulation recovered by the slicers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    C4fm,
    Cqpsk,
    Gfsk,
}

impl Modulation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modulation::C4fm => "C4FM",
            Modulation::Cqpsk => "CQPSK",
            Modulation::Gfsk => "GFSK",
        }
    }

    fn from_index(index: u8) -> Modulation {
        match index {
            1 => Modulation::Cqpsk,
            2 => Modulation::Gfsk,
            _ => Modulation::C4fm,
        }
    }

    fn index(self) -> u8 {
        match self {
            Modulation::C4fm => 0,
            Modulation::Cqpsk => 1,
            Modulation::Gfsk => 2,
        }
    }
}

/// Hamming-distance tracker ceiling; distances decay toward this.
const HAMMING_CEILING: u8 = 24;

/// CQPSK receives this normalization before SNR comparison, compensating
/// for the discriminator's different noise bandwidth.
const CQPSK_SNR_NORMALIZATION_DB: f64 = 6.0;

/// Minimum dwell on CQPSK before an SNR downgrade is honored.
const CQPSK_DWELL_SECS: f64 = 2.0;

#[derive(Debug, Default)]
struct HammingTracker {
    /// Best recent distance, decayed by +1 per window up to the ceiling.
    best: AtomicU32,
}

impl HammingTracker {
    fn observe(&self, distance: u8) {
        let current = self.best.load(Ordering::Relaxed);
        if (distance as u32) < current {
            self.best.store(distance as u32, Ordering::Relaxed);
        }
    }

    fn decay(&self) {
        let current = self.best.load(Ordering::Relaxed);
        if current < HAMMING_CEILING as u32 {
            self.best.store(current + 1, Ordering::Relaxed);
        }
    }

    fn get(&self) -> u8 {
        self.best.load(Ordering::Relaxed) as u8
    }

    fn reset(&self) {
        self.best.store(HAMMING_CEILING as u32, Ordering::Relaxed);
    }
}

/// Per-window modulation decision state.
///
/// All mutable state is atomic: `classify` runs on the demod thread while
/// `reset_mod_state` and the SNR setters may be called from the tuning
/// thread, and the UI reads `current` through snapshots.
pub struct ModClassifier {
    current: AtomicU8,
    forced: Option<Modulation>,

    votes_c4fm: AtomicU32,
    votes_cqpsk: AtomicU32,
    votes_gfsk: AtomicU32,

    snr_c4fm: AtomicF64,
    snr_cqpsk: AtomicF64,
    snr_gfsk: AtomicF64,

    hamming_c4fm: HammingTracker,
    hamming_cqpsk: HammingTracker,
    hamming_gfsk: HammingTracker,

    /// Monotonic timestamp of entering CQPSK, NaN when not in CQPSK.
    cqpsk_dwell_start: AtomicF64,
}

impl ModClassifier {
    pub fn new(initial: Modulation, forced: Option<Modulation>) -> Self {
        let c = Self {
            current: AtomicU8::new(forced.unwrap_or(initial).index()),
            forced,
            votes_c4fm: AtomicU32::new(0),
            votes_cqpsk: AtomicU32::new(0),
            votes_gfsk: AtomicU32::new(0),
            snr_c4fm: AtomicF64::new(f64::NAN),
            snr_cqpsk: AtomicF64::new(f64::NAN),
            snr_gfsk: AtomicF64::new(f64::NAN),
            hamming_c4fm: HammingTracker::default(),
            hamming_cqpsk: HammingTracker::default(),
            hamming_gfsk: HammingTracker::default(),
            cqpsk_dwell_start: AtomicF64::new(f64::NAN),
        };
        c.hamming_c4fm.reset();
        c.hamming_cqpsk.reset();
        c.hamming_gfsk.reset();
        c
    }

    pub fn current(&self) -> Modulation {
        Modulation::from_index(self.current.load(Ordering::Relaxed))
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    /// Record a smoothed SNR estimate from the front-end. Any modulation's
    /// estimate may be absent (NaN) and the decision degrades gracefully.
    pub fn set_snr(&self, modulation: Modulation, snr_db: f64) {
        self.snr_atomic(modulation).store(snr_db, Ordering::Relaxed);
    }

    /// Record a sync-correlation Hamming distance for a modulation family.
    pub fn observe_sync_hamming(&self, modulation: Modulation, distance: u8) {
        self.tracker(modulation).observe(distance);
    }

    /// Reset votes and trackers. Safe to call from the tuning thread.
    pub fn reset_mod_state(&self) {
        self.votes_c4fm.store(0, Ordering::Relaxed);
        self.votes_cqpsk.store(0, Ordering::Relaxed);
        self.votes_gfsk.store(0, Ordering::Relaxed);
        self.hamming_c4fm.reset();
        self.hamming_cqpsk.reset();
        self.hamming_gfsk.reset();
    }

    /// Run one classification window. `now_m` is monotonic seconds.
    ///
    /// Returns the (possibly unchanged) active modulation.
    pub fn classify(&self, now_m: f64) -> Modulation {
        if let Some(forced) = self.forced {
            return forced;
        }

        // Step 1: candidate starts as the current modulation.
        let mut candidate = self.current();

        // Step 2: SNR bias with hysteresis.
        let snr_c4fm = self.snr_c4fm.load(Ordering::Relaxed);
        let snr_cqpsk = self.snr_cqpsk.load(Ordering::Relaxed) - CQPSK_SNR_NORMALIZATION_DB;
        if snr_c4fm.is_finite() && snr_cqpsk.is_finite() {
            let delta = snr_cqpsk - snr_c4fm;
            if delta >= 2.0 {
                candidate = Modulation::Cqpsk;
            } else if delta <= -3.0 && !self.in_cqpsk_dwell(now_m) {
                candidate = Modulation::C4fm;
            }
        }

        // Step 3: Hamming override. A near-exact sync correlation outranks
        // the SNR vote; a clear win over the candidate's own family does too.
        let (best_mod, best_dist) = self.best_hamming();
        let candidate_dist = self.tracker(candidate).get();
        if best_dist <= 3 {
            candidate = best_mod;
        } else if candidate_dist.saturating_sub(best_dist) >= 4 {
            candidate = best_mod;
        }

        // Step 4: vote for the candidate, reset the other two.
        for m in [Modulation::C4fm, Modulation::Cqpsk, Modulation::Gfsk] {
            if m == candidate {
                self.vote_atomic(m).fetch_add(1, Ordering::Relaxed);
            } else {
                self.vote_atomic(m).store(0, Ordering::Relaxed);
            }
        }

        // Step 5: switch only at the vote threshold.
        let votes = self.vote_atomic(candidate).load(Ordering::Relaxed);
        if candidate != self.current() && votes >= self.switch_threshold(candidate, now_m) {
            self.switch_to(candidate, now_m);
        }

        // Step 6 (tail): decay the trackers once per window.
        self.hamming_c4fm.decay();
        self.hamming_cqpsk.decay();
        self.hamming_gfsk.decay();

        self.current()
    }

    fn switch_threshold(&self, candidate: Modulation, now_m: f64) -> u32 {
        match candidate {
            Modulation::Gfsk => 1,
            Modulation::Cqpsk => 2,
            Modulation::C4fm => {
                if self.current() == Modulation::Cqpsk {
                    // Leaving CQPSK gets harder the fresher the dwell.
                    let start = self.cqpsk_dwell_start.load(Ordering::Relaxed);
                    let dwell = if start.is_nan() { f64::MAX } else { now_m - start };
                    if dwell < CQPSK_DWELL_SECS {
                        5
                    } else if dwell < 10.0 {
                        4
                    } else {
                        3
                    }
                } else {
                    2
                }
            }
        }
    }

    fn switch_to(&self, next: Modulation, now_m: f64) {
        let leaving_cqpsk = self.current() == Modulation::Cqpsk && next != Modulation::Cqpsk;
        self.current.store(next.index(), Ordering::Relaxed);

        if next == Modulation::Cqpsk {
            self.cqpsk_dwell_start.store(now_m, Ordering::Relaxed);
        } else if leaving_cqpsk {
            self.cqpsk_dwell_start.store(f64::NAN, Ordering::Relaxed);
            self.hamming_c4fm.reset();
            self.hamming_cqpsk.reset();
            self.hamming_gfsk.reset();
        }
    }

    fn in_cqpsk_dwell(&self, now_m: f64) -> bool {
        let start = self.cqpsk_dwell_start.load(Ordering::Relaxed);
        self.current() == Modulation::Cqpsk
            && !start.is_nan()
            && now_m - start < CQPSK_DWELL_SECS
    }

    fn best_hamming(&self) -> (Modulation, u8) {
        let mut best = (Modulation::C4fm, self.hamming_c4fm.get());
        let cqpsk = self.hamming_cqpsk.get();
        if cqpsk < best.1 {
            best = (Modulation::Cqpsk, cqpsk);
        }
        let gfsk = self.hamming_gfsk.get();
        if gfsk < best.1 {
            best = (Modulation::Gfsk, gfsk);
        }
        best
    }

    fn tracker(&self, m: Modulation) -> &HammingTracker {
        match m {
            Modulation::C4fm => &self.hamming_c4fm,
            Modulation::Cqpsk => &self.hamming_cqpsk,
            Modulation::Gfsk => &self.hamming_gfsk,
        }
    }

    fn vote_atomic(&self, m: Modulation) -> &AtomicU32 {
        match m {
            Modulation::C4fm => &self.votes_c4fm,
            Modulation::Cqpsk => &self.votes_cqpsk,
            Modulation::Gfsk => &self.votes_gfsk,
        }
    }

    fn snr_atomic(&self, m: Modulation) -> &AtomicF64 {
        match m {
            Modulation::C4fm => &self.snr_c4fm,
            Modulation::Cqpsk => &self.snr_cqpsk,
            Modulation::Gfsk => &self.snr_gfsk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_modulation_never_switches() {
        let c = ModClassifier::new(Modulation::C4fm, Some(Modulation::Gfsk));
        c.set_snr(Modulation::Cqpsk, 40.0);
        c.set_snr(Modulation::C4fm, 0.0);
        c.observe_sync_hamming(Modulation::Cqpsk, 0);
        for t in 0..10 {
            assert_eq!(c.classify(t as f64), Modulation::Gfsk);
        }
    }

    #[test]
    fn snr_advantage_switches_to_cqpsk_after_two_votes() {
        let c = ModClassifier::new(Modulation::C4fm, None);
        // +6 dB normalization means CQPSK must lead by 8 dB raw to win by 2.
        c.set_snr(Modulation::C4fm, 10.0);
        c.set_snr(Modulation::Cqpsk, 18.5);

        assert_eq!(c.classify(0.0), Modulation::C4fm); // one vote, no switch
        assert_eq!(c.classify(0.1), Modulation::Cqpsk); // second vote switches
    }

    #[test]
    fn snr_downgrade_blocked_during_dwell() {
        let c = ModClassifier::new(Modulation::C4fm, None);
        c.set_snr(Modulation::C4fm, 10.0);
        c.set_snr(Modulation::Cqpsk, 18.5);
        c.classify(0.0);
        c.classify(0.1);
        assert_eq!(c.current(), Modulation::Cqpsk);

        // Now CQPSK SNR collapses, but we are inside the 2 s dwell.
        c.set_snr(Modulation::Cqpsk, 2.0);
        assert_eq!(c.classify(0.5), Modulation::Cqpsk);
        assert_eq!(c.classify(1.0), Modulation::Cqpsk);

        // After the dwell expires the downgrade is honored, at the raised
        // leave-CQPSK threshold.
        let mut t = 2.5;
        while c.current() == Modulation::Cqpsk && t < 20.0 {
            c.classify(t);
            t += 0.5;
        }
        assert_eq!(c.current(), Modulation::C4fm);
    }

    #[test]
    fn strong_hamming_overrides_snr() {
        let c = ModClassifier::new(Modulation::C4fm, None);
        c.set_snr(Modulation::C4fm, 30.0);
        c.set_snr(Modulation::Cqpsk, 30.0);
        // GFSK sync template matched almost exactly.
        c.observe_sync_hamming(Modulation::Gfsk, 1);
        // GFSK switches on the first vote.
        assert_eq!(c.classify(0.0), Modulation::Gfsk);
    }

    #[test]
    fn hamming_tracker_decays_per_window() {
        let c = ModClassifier::new(Modulation::C4fm, None);
        c.observe_sync_hamming(Modulation::Gfsk, 2);
        assert_eq!(c.classify(0.0), Modulation::Gfsk);
        // Without fresh observations the tracker decays above the override
        // threshold and C4FM can win back on SNR.
        c.set_snr(Modulation::C4fm, 30.0);
        c.set_snr(Modulation::Cqpsk, 0.0);
        let mut t = 1.0;
        while c.current() == Modulation::Gfsk && t < 40.0 {
            c.classify(t);
            t += 1.0;
        }
        assert_eq!(c.current(), Modulation::C4fm);
    }

    #[test]
    fn reset_mod_state_clears_votes() {
        let c = ModClassifier::new(Modulation::C4fm, None);
        c.set_snr(Modulation::C4fm, 10.0);
        c.set_snr(Modulation::Cqpsk, 18.5);
        c.classify(0.0); // one CQPSK vote pending
        c.reset_mod_state();
        // The pending vote was discarded; one more window is not enough.
        assert_eq!(c.classify(0.1), Modulation::C4fm);
        assert_eq!(c.classify(0.2), Modulation::Cqpsk);
    }
}
