//! Filter memory: RRC taps, biquads and DC blockers.
//!
//! Instances are owned by the core receiver state and re-initialized with
//! `init(sample_rate_hz)` whenever the sample rate changes; `update(sample)`
//! advances one sample at a time so the demod loop stays allocation-free.

use std::f64::consts::PI;

/// Upper bound on matched-filter length, keeping the per-sample
/// convolution cost flat across sample rates.
const RRC_MAX_TAPS: usize = 511;

/// Root-raised-cosine impulse response at `t_sym` symbol periods from the
/// filter center, for rolloff `alpha`:
///
/// ```text
/// h(t) = [ sin(πt(1-α)) + 4αt·cos(πt(1+α)) ] / [ πt·(1 - (4αt)²) ]
/// ```
///
/// Both singularities (t = 0 and |t| = 1/(4α)) are removable and the
/// response is smooth through them, so instead of special-casing the
/// limits we evaluate a hair to the side; the offset is orders of
/// magnitude below the precision that matters for a tap table.
fn rrc_tap(t_sym: f64, alpha: f64) -> f64 {
    const NUDGE: f64 = 1e-7;

    let mut t = t_sym;
    if t.abs() < NUDGE {
        t = NUDGE;
    }
    let knot = 1.0 / (4.0 * alpha);
    if (t.abs() - knot).abs() < NUDGE {
        t += NUDGE;
    }

    let four_at = 4.0 * alpha * t;
    let numerator = (PI * t * (1.0 - alpha)).sin() + four_at * (PI * t * (1.0 + alpha)).cos();
    numerator / (PI * t * (1.0 - four_at * four_at))
}

/// Root-raised-cosine matched filter.
///
/// Taps are regenerated on `init`; the delay line is a fixed ring so a rate
/// change never reallocates mid-stream.
#[derive(Debug, Clone)]
pub struct RrcFilter {
    taps: Vec<f64>,
    delay: Vec<f64>,
    cursor: usize,
    rolloff: f64,
    span_symbols: usize,
    symbol_rate: usize,
}

impl RrcFilter {
    /// `rolloff` 0.2 suits C4FM; 0.35 is common for the QPSK modes.
    pub fn new(rolloff: f64, span_symbols: usize, symbol_rate: usize) -> Self {
        let mut f = Self {
            taps: Vec::new(),
            delay: Vec::new(),
            cursor: 0,
            rolloff,
            span_symbols,
            symbol_rate,
        };
        f.init(48_000);
        f
    }

    /// Regenerate taps for a new sample rate and clear the delay line.
    ///
    /// The tap table is symmetric around its center; time runs in symbol
    /// periods so the shape only depends on samples-per-symbol.
    pub fn init(&mut self, sample_rate_hz: usize) {
        let sps = (sample_rate_hz / self.symbol_rate).max(1);
        let half = ((self.span_symbols * sps) / 2).min(RRC_MAX_TAPS / 2);

        let mut taps: Vec<f64> = (0..=2 * half)
            .map(|k| rrc_tap((k as f64 - half as f64) / sps as f64, self.rolloff))
            .collect();

        // Normalize to unit energy so a matched TX/RX pair has unit gain
        // at the decision instant.
        let norm = taps.iter().map(|h| h * h).sum::<f64>().sqrt();
        if norm > 0.0 {
            for h in taps.iter_mut() {
                *h /= norm;
            }
        }

        self.delay = vec![0.0; taps.len()];
        self.taps = taps;
        self.cursor = 0;
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.delay[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.delay.len();

        let mut acc = 0.0;
        for (i, &tap) in self.taps.iter().enumerate() {
            let idx = (self.cursor + i) % self.delay.len();
            acc += tap * self.delay[idx];
        }
        acc
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }
}

/// Biquad personality selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// Direct-form-I biquad with RBJ cookbook coefficients.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: BiquadKind,
    corner_hz: f64,
    q: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(kind: BiquadKind, corner_hz: f64, q: f64) -> Self {
        let mut f = Self {
            kind,
            corner_hz,
            q,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.init(48_000);
        f
    }

    pub fn init(&mut self, sample_rate_hz: usize) {
        let w0 = 2.0 * PI * self.corner_hz / sample_rate_hz as f64;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * self.q);

        let (b0, b1, b2) = match self.kind {
            BiquadKind::LowPass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            BiquadKind::HighPass => {
                let b1 = -(1.0 + cos_w0);
                ((1.0 + cos_w0) / 2.0, b1, (1.0 + cos_w0) / 2.0)
            }
            BiquadKind::BandPass => (alpha, 0.0, -alpha),
            BiquadKind::Notch => (1.0, -2.0 * cos_w0, 1.0),
        };
        let a0 = 1.0 + alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let y = self.b0 * sample + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = sample;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// One-pole DC blocker for the PCM voice path.
#[derive(Debug, Clone)]
pub struct DcBlocker {
    r: f64,
    x1: f64,
    y1: f64,
}

impl DcBlocker {
    pub fn new() -> Self {
        Self {
            r: 0.9995,
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub fn init(&mut self, _sample_rate_hz: usize) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let y = sample - self.x1 + self.r * self.y1;
        self.x1 = sample;
        self.y1 = y;
        y
    }
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rrc_taps_have_unit_energy() {
        let f = RrcFilter::new(0.2, 8, 4800);
        let energy: f64 = f.taps().iter().map(|&x| x * x).sum();
        assert_relative_eq!(energy, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn taps_survive_the_rolloff_knot() {
        // With α = 0.25 the removable singularity sits exactly one symbol
        // from center, which lands on the tap grid for any whole
        // samples-per-symbol count.
        let mut f = RrcFilter::new(0.25, 8, 4800);
        f.init(48_000);
        let taps = f.taps();
        assert!(taps.iter().all(|t| t.is_finite()));

        // The response is even; the nudged evaluation may only disturb
        // symmetry far below tap precision.
        let n = taps.len();
        for k in 0..n / 2 {
            assert!(
                (taps[k] - taps[n - 1 - k]).abs() < 1e-5,
                "asymmetry at tap {}",
                k
            );
        }
    }

    #[test]
    fn center_tap_is_the_peak() {
        let f = RrcFilter::new(0.2, 8, 4800);
        let taps = f.taps();
        let center = taps.len() / 2;
        let peak = taps
            .iter()
            .fold(f64::MIN, |acc, &t| acc.max(t));
        assert!((taps[center] - peak).abs() < 1e-12);
    }

    #[test]
    fn rrc_update_is_stable() {
        let mut f = RrcFilter::new(0.2, 8, 4800);
        f.init(48_000);
        let mut peak = 0.0f64;
        for i in 0..2000 {
            let s = if i % 10 == 0 { 1.0 } else { 0.0 };
            peak = peak.max(f.update(s).abs());
        }
        assert!(peak.is_finite());
        assert!(peak < 10.0);
    }

    #[test]
    fn highpass_removes_dc() {
        let mut f = Biquad::new(BiquadKind::HighPass, 300.0, 0.707);
        f.init(8000);
        let mut last = 1.0;
        for _ in 0..8000 {
            last = f.update(1.0);
        }
        assert!(last.abs() < 1e-3, "DC leaked through: {}", last);
    }

    #[test]
    fn dc_blocker_settles_to_zero() {
        let mut f = DcBlocker::new();
        let mut last = 1.0;
        for _ in 0..100_000 {
            last = f.update(0.5);
        }
        assert!(last.abs() < 1e-2);
    }

    #[test]
    fn notch_attenuates_center_frequency() {
        let mut f = Biquad::new(BiquadKind::Notch, 1000.0, 10.0);
        f.init(8000);
        let mut in_power = 0.0;
        let mut out_power = 0.0;
        for i in 0..8000 {
            let t = i as f64 / 8000.0;
            let s = (2.0 * PI * 1000.0 * t).sin();
            let y = f.update(s);
            if i > 4000 {
                in_power += s * s;
                out_power += y * y;
            }
        }
        assert!(out_power < in_power * 0.05);
    }
}
