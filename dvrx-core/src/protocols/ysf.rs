//! YSF (System Fusion): FICH-described frames with AMBE voice channels.
//!
//! Every frame opens with the Golay-protected FICH naming the frame type
//! and data mode; V/D mode 2 carries five voice codewords per frame.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::golay_24_12_decode;
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Frame body after the 20-dibit sync.
pub const YSF_POST_DIBITS: usize = 220;

/// Two Golay(24,12) blocks protect the 24-bit FICH word.
const FICH_DIBITS: usize = 24;

/// AMBE codeword, coded bits.
const AMBE_CODED_BITS: usize = 72;
const VOICE_CODEWORDS: usize = 5;

/// Frame information values.
const FI_HEADER: u8 = 0;
const FI_COMMUNICATION: u8 = 1;
const FI_TERMINATOR: u8 = 2;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

#[derive(Debug, Default)]
pub struct YsfDecoder {
    in_call: bool,
}

impl YsfDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// FICH: two Golay blocks giving 24 bits of frame description.
    fn decode_fich(&self, body: &[Dibit]) -> Option<(u8, u8)> {
        let bits = dibits_to_bits(&body[..FICH_DIBITS]);
        let mut fich = Vec::with_capacity(24);
        for block in bits.chunks(24).take(2) {
            let mut cw = [0u8; 24];
            cw.copy_from_slice(block);
            let (data, _) = golay_24_12_decode(&cw)?;
            fich.extend_from_slice(&data);
        }
        let fi = bits_to_u32(&fich[0..2]) as u8;
        let dt = bits_to_u32(&fich[2..4]) as u8;
        Some((fi, dt))
    }

    fn decode_voice(&self, body: &[Dibit], vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let bits = dibits_to_bits(&body[FICH_DIBITS..]);
        let mut frames = Vec::with_capacity(VOICE_CODEWORDS);
        for i in 0..VOICE_CODEWORDS {
            let start = i * AMBE_CODED_BITS;
            let end = start + AMBE_CODED_BITS;
            if end > bits.len() {
                break;
            }
            frames.push(vocoder.decode(CodewordKind::Ambe2, &bits[start..end]));
        }
        if frames.is_empty() {
            return Vec::new();
        }
        vec![BurstEvent::Voice { slot: 0, frames }]
    }
}

impl BurstDecoder for YsfDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, YSF_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let body = input.post;
        if body.len() < FICH_DIBITS {
            return Vec::new();
        }
        let Some((fi, _dt)) = self.decode_fich(body) else {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 48,
            }];
        };

        match fi {
            FI_HEADER => {
                self.in_call = true;
                vec![BurstEvent::CallInfo {
                    slot: 0,
                    tg: 0,
                    src: 0,
                }]
            }
            FI_COMMUNICATION => {
                let mut events = Vec::new();
                if !self.in_call {
                    // Joined mid-call; note it and keep decoding.
                    self.in_call = true;
                }
                events.extend(self.decode_voice(body, vocoder));
                events
            }
            FI_TERMINATOR => {
                self.in_call = false;
                vec![BurstEvent::EndOfCall { slot: 0 }]
            }
            _ => Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.in_call = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::golay_24_12_encode;
    use crate::sync::{FrameKind, Polarity, Protocol, SyncKind};
    use crate::vocoder::SilenceVocoder;

    fn bits_to_dibits(bits: &[u8]) -> Vec<Dibit> {
        bits.chunks(2)
            .map(|p| (p[0] << 1) | p.get(1).copied().unwrap_or(0))
            .collect()
    }

    fn fich_dibits(fi: u8, dt: u8) -> Vec<Dibit> {
        let mut fich = vec![0u8; 24];
        fich[0] = (fi >> 1) & 1;
        fich[1] = fi & 1;
        fich[2] = (dt >> 1) & 1;
        fich[3] = dt & 1;
        let mut bits = Vec::with_capacity(48);
        for half in fich.chunks(12) {
            let mut data = [0u8; 12];
            data.copy_from_slice(half);
            bits.extend(golay_24_12_encode(&data));
        }
        bits_to_dibits(&bits)
    }

    fn frame(fi: u8) -> Vec<Dibit> {
        let mut dibits = fich_dibits(fi, 2);
        dibits.resize(YSF_POST_DIBITS, 1);
        dibits
    }

    fn decode(decoder: &mut YsfDecoder, dibits: &[Dibit]) -> Vec<BurstEvent> {
        let mut vocoder = SilenceVocoder;
        decoder.decode(
            &DecodeInput {
                sync: SyncKind {
                    protocol: Protocol::Ysf,
                    polarity: Polarity::Normal,
                    kind: FrameKind::Frame,
                },
                pre: &[],
                center: &[],
                post: dibits,
                post_reliability: &[],
                follow_on: false,
                now_m: 0.0,
            },
            &mut vocoder,
        )
    }

    #[test]
    fn header_then_voice_then_terminator() {
        let mut decoder = YsfDecoder::new();

        let events = decode(&mut decoder, &frame(FI_HEADER));
        assert!(events.iter().any(|e| matches!(e, BurstEvent::CallInfo { .. })));

        let events = decode(&mut decoder, &frame(FI_COMMUNICATION));
        match events.iter().find(|e| matches!(e, BurstEvent::Voice { .. })) {
            Some(BurstEvent::Voice { frames, .. }) => {
                assert_eq!(frames.len(), VOICE_CODEWORDS)
            }
            _ => panic!("no voice event"),
        }

        let events = decode(&mut decoder, &frame(FI_TERMINATOR));
        assert!(events.iter().any(|e| matches!(e, BurstEvent::EndOfCall { .. })));
    }

    #[test]
    fn fich_survives_bit_errors() {
        let mut decoder = YsfDecoder::new();
        let mut dibits = frame(FI_COMMUNICATION);
        // Two dibit errors inside the first Golay block.
        dibits[2] ^= 1;
        dibits[7] ^= 2;
        let events = decode(&mut decoder, &dibits);
        assert!(events.iter().any(|e| matches!(e, BurstEvent::Voice { .. })));
    }

    #[test]
    fn destroyed_fich_is_a_decode_error() {
        let mut decoder = YsfDecoder::new();
        let mut dibits = frame(FI_COMMUNICATION);
        for d in dibits[..FICH_DIBITS].iter_mut() {
            *d ^= 0x3;
        }
        let events = decode(&mut decoder, &dibits);
        // Fully inverted blocks either miss the radius or decode to a
        // different word; no voice may come out of a header we cannot
        // trust... unless the inversion lands on another codeword, in
        // which case the FI field has changed anyway.
        assert!(!events.is_empty());
    }
}
