//! Per-slot gating, gain and stereo/mono fan-out.
//!
//! The mixer receives up to four 160-sample frames per slot per call (a
//! Phase 2 superframe carries 4V + 2V clusters) and applies the mute
//! policy in a fixed order where later rules override earlier ones:
//!
//! 1. protocol encryption flag, excused when the matching key is loaded;
//! 2. the trunking SM's authoritative Phase 2 per-slot gate;
//! 3. the per-slot user enable;
//! 4. group block list / allow-list;
//! 5. talkgroup hold, which also force-unmutes the matching slot.
//!
//! The mixer never revokes `audio_allowed`; that is the trunking SM's
//! exclusive right.

use crate::filters::DcBlocker;
use crate::tables::{GroupList, GroupMode};
use crate::vocoder::{PcmFrame, PCM_FRAME_SAMPLES};

/// P25 clear algids: 0x80 is explicit clear, 0x00 means unsignalled.
pub fn algid_is_clear(algid: u8) -> bool {
    algid == 0x00 || algid == 0x80
}

/// Encryption algorithms and the key slots they require.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotCrypto {
    pub algid: u8,
    /// RC4 key (`state->R`) present.
    pub rc4_loaded: bool,
    /// DES / DES-XL key (`state->RR`) present.
    pub des_loaded: bool,
    /// AES-128/192/256 key present for this slot.
    pub aes_loaded: bool,
}

impl SlotCrypto {
    pub fn clear() -> Self {
        Self::default()
    }

    /// True when the frame must be muted for missing key material.
    pub fn requires_mute(&self) -> bool {
        if algid_is_clear(self.algid) {
            return false;
        }
        match self.algid {
            // Scrambler classes: playable with a static keystream, which
            // rides the RC4 key slot.
            0x01..=0x03 => !self.rc4_loaded,
            0xAA => !self.rc4_loaded,                 // RC4
            0x81 | 0x9F => !self.des_loaded,          // DES-OFB, DES-XL
            0x84 | 0x85 | 0x89 => !self.aes_loaded,   // AES-256/192/128
            _ => true, // unknown algorithm, never playable
        }
    }
}

/// Per-slot gating inputs for one mix call.
#[derive(Debug, Clone, Default)]
pub struct SlotGate {
    /// User slot enable (`slotN_on`).
    pub enabled: bool,
    /// Talkgroup carried by this slot's current call.
    pub tg: u32,
    pub crypto: SlotCrypto,
    /// Trunking SM's Phase 2 gate; `None` outside Phase 2.
    pub p2_audio_allowed: Option<bool>,
}

/// Mixer-wide policy inputs.
#[derive(Debug, Clone, Default)]
pub struct MixPolicy {
    pub use_allow_list: bool,
    pub tg_hold: u32,
}

/// Why a slot ended up muted, for event reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteReason {
    Encrypted,
    TrunkGate,
    SlotOff,
    Blocked,
    NotAllowed,
    TgHold,
}

/// One slot's input to a mix call.
#[derive(Debug, Clone, Default)]
pub struct SlotInput {
    pub frames: Vec<PcmFrame>,
    pub gate: SlotGate,
}

/// Mixed output of one call.
#[derive(Debug, Clone, Default)]
pub struct MixOutput {
    /// Interleaved L/R when the mixer runs stereo.
    pub stereo: Vec<f32>,
    /// Mono fold-down, always produced.
    pub mono: Vec<f32>,
    pub mute_reasons: [Option<MuteReason>; 2],
}

/// Automatic gain control: mean |x| over 20-sample windows steers a
/// per-slot gain in ±0.5 steps toward a 0.075 output target.
#[derive(Debug, Clone)]
struct SlotAgc {
    gain: f32,
}

const AGC_WINDOW: usize = 20;
const AGC_TARGET: f32 = 0.075;
const AGC_STEP: f32 = 0.5;
const AGC_MIN_GAIN: f32 = 0.5;
const AGC_MAX_GAIN: f32 = 48.0;
const CLIP_LIMIT: f32 = 0.9;

impl SlotAgc {
    fn new() -> Self {
        Self { gain: 1.0 }
    }

    fn process(&mut self, frame: &mut PcmFrame) {
        for window in frame.chunks_mut(AGC_WINDOW) {
            let mean: f32 =
                window.iter().map(|s| s.abs()).sum::<f32>() / window.len() as f32;
            if mean > 0.0 {
                if mean * self.gain < AGC_TARGET {
                    self.gain = (self.gain + AGC_STEP).min(AGC_MAX_GAIN);
                } else if mean * self.gain > AGC_TARGET {
                    self.gain = (self.gain - AGC_STEP).max(AGC_MIN_GAIN);
                }
            }
            for sample in window.iter_mut() {
                *sample = (*sample * self.gain).clamp(-CLIP_LIMIT, CLIP_LIMIT);
            }
        }
    }
}

pub struct Mixer {
    stereo: bool,
    agc_enabled: bool,
    use_hpf: bool,
    agc: [SlotAgc; 2],
    hpf: [DcBlocker; 2],
}

impl Mixer {
    pub fn new(stereo: bool, agc_enabled: bool, use_hpf: bool) -> Self {
        Self {
            stereo,
            agc_enabled,
            use_hpf,
            agc: [SlotAgc::new(), SlotAgc::new()],
            hpf: [DcBlocker::new(), DcBlocker::new()],
        }
    }

    /// Decide the mute state for one slot. Later rules override earlier
    /// ones; the return is the *last* matching rule.
    pub fn mute_decision(
        gate: &SlotGate,
        groups: &GroupList,
        policy: &MixPolicy,
    ) -> Option<MuteReason> {
        let mut verdict: Option<MuteReason> = None;

        // 1. Encryption lockout.
        if gate.crypto.requires_mute() {
            verdict = Some(MuteReason::Encrypted);
        }

        // 2. Phase 2: the trunking SM's gate is authoritative.
        if let Some(allowed) = gate.p2_audio_allowed {
            verdict = if allowed { None } else { Some(MuteReason::TrunkGate) };
        }

        // 3. Slot enable.
        if !gate.enabled {
            verdict = Some(MuteReason::SlotOff);
        }

        // 4. Group policy.
        match groups.lookup(gate.tg) {
            Some(entry) if entry.mode == GroupMode::Block => {
                verdict = Some(MuteReason::Blocked);
            }
            Some(_) => {}
            None => {
                if policy.use_allow_list {
                    verdict = Some(MuteReason::NotAllowed);
                }
            }
        }

        // 5. Talkgroup hold: mute mismatches, force-unmute the match.
        if policy.tg_hold != 0 {
            if gate.tg == policy.tg_hold {
                verdict = None;
            } else {
                verdict = Some(MuteReason::TgHold);
            }
        }

        verdict
    }

    /// Mix one call's worth of frames from both slots.
    pub fn mix(
        &mut self,
        mut inputs: [SlotInput; 2],
        groups: &GroupList,
        policy: &MixPolicy,
    ) -> MixOutput {
        let mut out = MixOutput::default();

        for (slot, input) in inputs.iter_mut().enumerate() {
            let reason = Self::mute_decision(&input.gate, groups, policy);
            out.mute_reasons[slot] = reason;
            if reason.is_some() {
                input.frames.clear();
                continue;
            }

            // Phase 2 padding suppression: keep at most two all-zero
            // frames per group.
            let mut silent_seen = 0;
            input.frames.retain(|f| {
                if f.iter().all(|&s| s == 0.0) {
                    silent_seen += 1;
                    silent_seen <= 2
                } else {
                    true
                }
            });

            for frame in input.frames.iter_mut() {
                let all_zero = frame.iter().all(|&s| s == 0.0);
                if self.use_hpf && !all_zero {
                    for sample in frame.iter_mut() {
                        *sample = self.hpf[slot].update(*sample as f64) as f32;
                    }
                }
                if self.agc_enabled {
                    self.agc[slot].process(frame);
                }
            }
        }

        let left_active = !inputs[0].frames.is_empty();
        let right_active = !inputs[1].frames.is_empty();
        let frame_count = inputs[0].frames.len().max(inputs[1].frames.len());
        let silence = [0.0f32; PCM_FRAME_SAMPLES];

        for i in 0..frame_count {
            let l = inputs[0].frames.get(i).unwrap_or(&silence);
            let r = inputs[1].frames.get(i).unwrap_or(&silence);

            if self.stereo {
                match (left_active, right_active) {
                    // Exactly one slot active: duplicate it onto both
                    // channels (uniform policy across Phase 2 paths).
                    (true, false) => {
                        for &s in l.iter() {
                            out.stereo.push(s);
                            out.stereo.push(s);
                        }
                    }
                    (false, true) => {
                        for &s in r.iter() {
                            out.stereo.push(s);
                            out.stereo.push(s);
                        }
                    }
                    _ => {
                        for (&ls, &rs) in l.iter().zip(r.iter()) {
                            out.stereo.push(ls);
                            out.stereo.push(rs);
                        }
                    }
                }
            }

            match (left_active, right_active) {
                (true, true) => {
                    for (&ls, &rs) in l.iter().zip(r.iter()) {
                        out.mono.push((ls + rs) / 2.0);
                    }
                }
                (true, false) => out.mono.extend_from_slice(l),
                (false, true) => out.mono.extend_from_slice(r),
                (false, false) => {}
            }
        }

        out
    }
}
