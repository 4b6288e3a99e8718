//! Spectral SNR estimation for the modulation classifier.
//!
//! The front-end hands windows of baseband IQ to [`SnrEstimator`]; in-band
//! vs. shoulder power from a small FFT gives a per-window estimate, which is
//! smoothed with a one-pole IIR before reaching the classifier. Estimates
//! are best-effort: a window of silence yields `None` and the classifier
//! simply sees a stale value.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// FFT size for the estimate; small enough to run every sync window.
const FFT_SIZE: usize = 256;

/// Fraction of bins treated as in-band, centered on DC.
const IN_BAND_FRACTION: f64 = 0.25;

/// One-pole smoothing coefficient for successive window estimates.
const SMOOTHING_ALPHA: f64 = 0.2;

pub struct SnrEstimator {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    smoothed_db: Option<f64>,
}

impl SnrEstimator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            scratch: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
            smoothed_db: None,
        }
    }

    /// Feed one window of IQ samples; returns the updated smoothed SNR.
    pub fn update(&mut self, iq: &[Complex32]) -> Option<f64> {
        if iq.len() < FFT_SIZE / 2 {
            return self.smoothed_db;
        }

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            *slot = iq.get(i).copied().unwrap_or(Complex32::new(0.0, 0.0));
        }
        self.fft.process(&mut self.scratch);

        let in_band = (FFT_SIZE as f64 * IN_BAND_FRACTION) as usize;
        let half = in_band / 2;

        let mut signal_power = 0.0f64;
        let mut noise_power = 0.0f64;
        let mut noise_bins = 0usize;

        for (bin, c) in self.scratch.iter().enumerate() {
            let power = c.norm_sqr() as f64;
            // Bins wrap: low indices and high indices are both near DC.
            let near_dc = bin < half || bin >= FFT_SIZE - half;
            if near_dc {
                signal_power += power;
            } else {
                noise_power += power;
                noise_bins += 1;
            }
        }

        if noise_bins == 0 || noise_power <= 0.0 || signal_power <= 0.0 {
            return self.smoothed_db;
        }

        // Scale shoulder power up to the in-band width before comparing.
        let noise_in_band = noise_power / noise_bins as f64 * in_band as f64;
        let snr_db = 10.0 * (signal_power / noise_in_band).log10();

        let next = match self.smoothed_db {
            Some(prev) => prev + SMOOTHING_ALPHA * (snr_db - prev),
            None => snr_db,
        };
        self.smoothed_db = Some(next);
        self.smoothed_db
    }

    pub fn smoothed_db(&self) -> Option<f64> {
        self.smoothed_db
    }

    pub fn reset(&mut self) {
        self.smoothed_db = None;
    }
}

impl Default for SnrEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone(freq_norm: f32, amplitude: f32, len: usize) -> Vec<Complex32> {
        (0..len)
            .map(|i| {
                let phase = TAU * freq_norm * i as f32;
                Complex32::new(amplitude * phase.cos(), amplitude * phase.sin())
            })
            .collect()
    }

    #[test]
    fn clean_carrier_scores_high() {
        let mut est = SnrEstimator::new();
        // Near-DC tone: almost all power lands in-band.
        let iq = tone(0.01, 1.0, FFT_SIZE);
        let snr = est.update(&iq).unwrap();
        assert!(snr > 10.0, "snr was {}", snr);
    }

    #[test]
    fn out_of_band_tone_scores_low() {
        let mut est = SnrEstimator::new();
        let iq = tone(0.4, 1.0, FFT_SIZE);
        let snr = est.update(&iq).unwrap();
        assert!(snr < 0.0, "snr was {}", snr);
    }

    #[test]
    fn short_window_keeps_previous_estimate() {
        let mut est = SnrEstimator::new();
        assert!(est.update(&tone(0.01, 1.0, 4)).is_none());
        let first = est.update(&tone(0.01, 1.0, FFT_SIZE)).unwrap();
        let kept = est.update(&tone(0.01, 1.0, 4)).unwrap();
        assert_eq!(first, kept);
    }

    #[test]
    fn smoothing_converges_monotonically() {
        let mut est = SnrEstimator::new();
        let strong = tone(0.01, 1.0, FFT_SIZE);
        let first = est.update(&strong).unwrap();
        let weak = tone(0.4, 1.0, FFT_SIZE);
        let mut prev = first;
        for _ in 0..20 {
            let next = est.update(&weak).unwrap();
            assert!(next <= prev + 1e-9);
            prev = next;
        }
        assert!(prev < first);
    }
}
