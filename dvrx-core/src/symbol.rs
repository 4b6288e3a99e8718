//! Symbol extraction: samples in, dibits plus reliability out.
//!
//! The extractor consumes filtered discriminator samples, picks one value
//! per symbol period, and slices it into a dibit with the slicer matching
//! the active modulation. A windowed histogram keeps running min/max/center
//! estimates for the four-level decision; sync matches can warm-start the
//! thresholds from known outer symbols.

use crate::dibit::Dibit;
use crate::modulation::Modulation;

/// CQPSK decision thresholds are fixed at ±2.0 on the phase-derivative
/// output (after DC recentering); only C4FM/GFSK thresholds adapt.
const CQPSK_THRESHOLD: f32 = 2.0;

/// Symbol-history window for the adaptive min/max estimate.
const HISTOGRAM_WINDOW: usize = 64;

/// Supported samples-per-symbol settings and their symbol rates.
///
/// The multi-rate hunter cycles through these when no carrier is found.
pub const SPS_CYCLE: [(u32, u32); 4] = [(10, 4800), (20, 2400), (5, 9600), (8, 6000)];

/// One sliced symbol: the dibit and its reliability byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicedDibit {
    pub dibit: Dibit,
    /// Distance from the nearest decision boundary, rescaled to [0,255].
    pub reliability: u8,
}

#[derive(Debug, Clone)]
pub struct SymbolExtractor {
    samples_per_symbol: u32,
    sample_phase: u32,

    history: [f32; HISTOGRAM_WINDOW],
    history_len: usize,
    history_cursor: usize,

    /// Smoothed envelope estimates.
    min: f32,
    max: f32,
    center: f32,
}

impl SymbolExtractor {
    pub fn new(samples_per_symbol: u32) -> Self {
        Self {
            samples_per_symbol,
            sample_phase: 0,
            history: [0.0; HISTOGRAM_WINDOW],
            history_len: 0,
            history_cursor: 0,
            min: -3.0,
            max: 3.0,
            center: 0.0,
        }
    }

    pub fn samples_per_symbol(&self) -> u32 {
        self.samples_per_symbol
    }

    /// Switch symbol rate; resets sample phase but keeps the envelope, a
    /// rate change alone does not invalidate the amplitude estimates.
    pub fn set_samples_per_symbol(&mut self, sps: u32) {
        self.samples_per_symbol = sps.max(1);
        self.sample_phase = 0;
    }

    /// Push one filtered sample; returns a symbol value at symbol instants.
    ///
    /// The decision instant is the center of the symbol period, so the
    /// output depends only on already-seen samples.
    pub fn push_sample(&mut self, sample: f32) -> Option<f32> {
        self.sample_phase += 1;
        let mid = self.samples_per_symbol.div_ceil(2);
        let out = if self.sample_phase == mid {
            self.track(sample);
            Some(sample)
        } else {
            None
        };
        if self.sample_phase >= self.samples_per_symbol {
            self.sample_phase = 0;
        }
        out
    }

    /// Update the windowed histogram with one symbol value.
    fn track(&mut self, symbol: f32) {
        self.history[self.history_cursor] = symbol;
        self.history_cursor = (self.history_cursor + 1) % HISTOGRAM_WINDOW;
        if self.history_len < HISTOGRAM_WINDOW {
            self.history_len += 1;
        }

        let window = &self.history[..self.history_len];
        let mut w_min = f32::MAX;
        let mut w_max = f32::MIN;
        for &v in window {
            w_min = w_min.min(v);
            w_max = w_max.max(v);
        }

        // Average the fresh window extremes into the running estimate.
        self.min = (self.min + w_min) / 2.0;
        self.max = (self.max + w_max) / 2.0;
        self.center = (self.min + self.max) / 2.0;
    }

    /// Seed the envelope from known outer symbols of a matched sync
    /// pattern (±3 levels), collapsing the adaptation transient.
    pub fn warm_start(&mut self, outer_min: f32, outer_max: f32) {
        if outer_max > outer_min {
            self.min = outer_min;
            self.max = outer_max;
            self.center = (outer_min + outer_max) / 2.0;
        }
    }

    pub fn center(&self) -> f32 {
        self.center
    }

    /// Slice one symbol value with the slicer for `modulation`.
    pub fn slice(&self, symbol: f32, modulation: Modulation) -> SlicedDibit {
        match modulation {
            Modulation::C4fm | Modulation::Gfsk => self.slice_c4fm(symbol),
            Modulation::Cqpsk => self.slice_cqpsk(symbol),
        }
    }

    /// Four-level decision against lmid < center < umid derived from the
    /// windowed min/max average.
    fn slice_c4fm(&self, symbol: f32) -> SlicedDibit {
        let umid = self.center + (self.max - self.center) * 0.5;
        let lmid = self.center + (self.min - self.center) * 0.5;

        let dibit: Dibit = if symbol > self.center {
            if symbol > umid {
                1 // +3
            } else {
                0 // +1
            }
        } else if symbol < lmid {
            3 // -3
        } else {
            2 // -1
        };

        let nearest = [lmid, self.center, umid]
            .iter()
            .map(|&t| (symbol - t).abs())
            .fold(f32::MAX, f32::min);
        // Half the level spacing is the most a correct decision can be
        // from every boundary; scale that to a full-confidence byte.
        let spacing = ((self.max - self.min) / 6.0).max(1e-3);
        let reliability = ((nearest / spacing).min(1.0) * 255.0) as u8;

        SlicedDibit { dibit, reliability }
    }

    /// Fixed-threshold CQPSK decision after DC recenter.
    /// Dibit map: 0 = +1, 1 = +3, 2 = -1, 3 = -3.
    fn slice_cqpsk(&self, symbol: f32) -> SlicedDibit {
        let recentered = symbol - self.center;

        let dibit: Dibit = if recentered >= CQPSK_THRESHOLD {
            1
        } else if recentered >= 0.0 {
            0
        } else if recentered > -CQPSK_THRESHOLD {
            2
        } else {
            3
        };

        let nearest = [-CQPSK_THRESHOLD, 0.0, CQPSK_THRESHOLD]
            .iter()
            .map(|&t| (recentered - t).abs())
            .fold(f32::MAX, f32::min);
        let reliability = ((nearest / 1.0).min(1.0) * 255.0) as u8;

        SlicedDibit { dibit, reliability }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warm_extractor() -> SymbolExtractor {
        let mut e = SymbolExtractor::new(10);
        e.warm_start(-3.0, 3.0);
        e
    }

    #[test]
    fn c4fm_slices_four_levels() {
        let e = warm_extractor();
        assert_eq!(e.slice(3.0, Modulation::C4fm).dibit, 1);
        assert_eq!(e.slice(1.0, Modulation::C4fm).dibit, 0);
        assert_eq!(e.slice(-1.0, Modulation::C4fm).dibit, 2);
        assert_eq!(e.slice(-3.0, Modulation::C4fm).dibit, 3);
    }

    #[test]
    fn cqpsk_slices_fixed_thresholds() {
        let e = warm_extractor();
        assert_eq!(e.slice(3.0, Modulation::Cqpsk).dibit, 1);
        assert_eq!(e.slice(1.0, Modulation::Cqpsk).dibit, 0);
        assert_eq!(e.slice(-1.0, Modulation::Cqpsk).dibit, 2);
        assert_eq!(e.slice(-3.0, Modulation::Cqpsk).dibit, 3);
    }

    #[test]
    fn reliability_peaks_mid_level() {
        let e = warm_extractor();
        // Dead-center of the +3 region is far from every boundary.
        let confident = e.slice(3.0, Modulation::C4fm).reliability;
        // Just above a boundary is unreliable.
        let marginal = e.slice(1.55, Modulation::C4fm).reliability;
        assert!(confident > 200, "confident = {}", confident);
        assert!(marginal < 60, "marginal = {}", marginal);
    }

    #[test]
    fn one_symbol_per_period() {
        let mut e = warm_extractor();
        let mut symbols = 0;
        for i in 0..100 {
            if e.push_sample(if i % 20 < 10 { 1.0 } else { -1.0 }).is_some() {
                symbols += 1;
            }
        }
        assert_eq!(symbols, 10);
    }

    #[test]
    fn decision_uses_only_past_samples() {
        // Feeding identical prefixes must produce identical symbol streams
        // regardless of what comes later.
        let prefix: Vec<f32> = (0..50).map(|i| ((i % 7) as f32) - 3.0).collect();

        let mut a = warm_extractor();
        let mut b = warm_extractor();
        let out_a: Vec<f32> = prefix.iter().filter_map(|&s| a.push_sample(s)).collect();

        let mut out_b: Vec<f32> = prefix.iter().filter_map(|&s| b.push_sample(s)).collect();
        // b sees different future samples; the prefix outputs already match.
        for _ in 0..50 {
            if let Some(s) = b.push_sample(99.0) {
                out_b.push(s);
            }
        }
        assert_eq!(out_a[..], out_b[..out_a.len()]);
    }

    #[test]
    fn warm_start_sets_center() {
        let mut e = SymbolExtractor::new(10);
        e.warm_start(-1.0, 5.0);
        assert_eq!(e.center(), 2.0);
    }

    #[test]
    fn tracking_follows_signal_envelope() {
        let mut e = SymbolExtractor::new(1);
        // Alternate outer symbols at a shrunken deviation.
        for i in 0..500 {
            let s = if i % 2 == 0 { 1.5 } else { -1.5 };
            e.push_sample(s);
        }
        assert!(e.center().abs() < 0.2, "center drifted: {}", e.center());
        // +1.4 now sits in the +3 region of the shrunken envelope.
        assert_eq!(e.slice(1.4, Modulation::C4fm).dibit, 1);
    }
}
