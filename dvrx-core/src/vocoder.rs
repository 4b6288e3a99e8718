//! Voice codec seam.
//!
//! AMBE/IMBE decoding is an external collaborator: a pure function from a
//! compressed voice codeword to 160 PCM samples (20 ms). The receiver
//! holds a boxed [`Vocoder`] installed at runtime, so tests and headless
//! builds swap in a double without conditional compilation.

/// PCM samples per decoded voice frame (20 ms at 8 kHz).
pub const PCM_FRAME_SAMPLES: usize = 160;

/// One decoded voice frame.
pub type PcmFrame = [f32; PCM_FRAME_SAMPLES];

/// Compressed voice codeword families handed to the vocoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodewordKind {
    /// IMBE 88-bit frame (P25 Phase 1, ProVoice).
    Imbe,
    /// AMBE+2 49-bit frame (P25 Phase 2, DMR, NXDN, dPMR).
    Ambe2,
    /// AMBE 72-bit frame (D-STAR).
    Ambe,
    /// Codec 2 3200 frame (M17).
    Codec2,
}

/// Pure decode from codeword bits to one PCM frame.
pub trait Vocoder: Send {
    fn decode(&mut self, kind: CodewordKind, bits: &[u8]) -> PcmFrame;

    /// Per-call reset at voice-call boundaries; default is stateless.
    fn reset(&mut self) {}
}

/// Emits silence for every codeword. Keeps frame timing honest when no
/// codec implementation is linked in.
#[derive(Debug, Default)]
pub struct SilenceVocoder;

impl Vocoder for SilenceVocoder {
    fn decode(&mut self, _kind: CodewordKind, _bits: &[u8]) -> PcmFrame {
        [0.0; PCM_FRAME_SAMPLES]
    }
}

/// Renders each codeword as a short tone whose pitch follows the codeword
/// content. Audible smoke-test double: distinct bursts produce distinct
/// tones, so gating bugs are easy to hear.
#[derive(Debug)]
pub struct ToneVocoder {
    phase: f32,
}

impl ToneVocoder {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }
}

impl Default for ToneVocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocoder for ToneVocoder {
    fn decode(&mut self, _kind: CodewordKind, bits: &[u8]) -> PcmFrame {
        let seed: u32 = bits.iter().take(16).fold(0, |acc, &b| (acc << 1) | b as u32);
        let freq = 300.0 + (seed % 64) as f32 * 20.0;
        let step = std::f32::consts::TAU * freq / 8000.0;

        let mut frame = [0.0; PCM_FRAME_SAMPLES];
        for sample in frame.iter_mut() {
            *sample = self.phase.sin() * 0.25;
            self.phase += step;
        }
        self.phase %= std::f32::consts::TAU;
        frame
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}
