//! dPMR: FS-framed narrowband voice with a coded control channel.
//!
//! FS1 opens a transmission with the header CCH; FS2 marks superframe
//! payloads (four AMBE codewords per frame); FS3 closes the
//! transmission. The short FS2/FS3 patterns only match once the hunter
//! is already in the dPMR family.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{crc7, viterbi_decode, K3_CONSTRAINT, K3_POLYS};
use crate::sync::FrameKind;
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Longest body needed (superframe payload).
pub const DPMR_POST_DIBITS: usize = 144;

/// Header control channel: 122 coded bits (59 fields plus flush).
const CCH_DIBITS: usize = 61;

/// Header field bits: format(2) + dst(24) + src(24) + cipher(2) + crc7.
const CCH_FIELDS_BITS: usize = 59;

const AMBE_CODED_BITS: usize = 72;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

#[derive(Debug, Default)]
pub struct DpmrDecoder {
    tg: u32,
    src: u32,
    cipher: u8,
}

impl DpmrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_header(&mut self, body: &[Dibit]) -> Vec<BurstEvent> {
        if body.len() < CCH_DIBITS {
            return Vec::new();
        }
        let coded = dibits_to_bits(&body[..CCH_DIBITS]);
        let decoded = viterbi_decode(&coded, K3_CONSTRAINT, K3_POLYS, None);
        if decoded.len() < CCH_FIELDS_BITS {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: CCH_FIELDS_BITS as u32,
            }];
        }
        let bits = &decoded[..CCH_FIELDS_BITS];
        let sent = bits_to_u32(&bits[52..59]);
        if crc7(&bits[..52]) != sent {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 7,
            }];
        }

        let tg = bits_to_u32(&bits[2..26]);
        let src = bits_to_u32(&bits[26..50]);
        let cipher = bits_to_u32(&bits[50..52]) as u8;
        self.tg = tg;
        self.src = src;
        self.cipher = cipher;

        let mut events = vec![BurstEvent::CallInfo { slot: 0, tg, src }];
        if cipher != 0 {
            events.push(BurstEvent::Crypto {
                slot: 0,
                algid: cipher, // dPMR scrambler classes 1..3
                key_id: 0,
                mi: [0; 9],
            });
        }
        events
    }

    fn decode_superframe(&self, body: &[Dibit], vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let bits = dibits_to_bits(body);
        let mut frames = Vec::with_capacity(4);
        for i in 0..4 {
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
        let mut events = vec![BurstEvent::Voice { slot: 0, frames }];
        // Carry the header's call context into the superframe.
        if self.cipher != 0 {
            events.push(BurstEvent::Crypto {
                slot: 0,
                algid: self.cipher,
                key_id: 0,
                mi: [0; 9],
            });
        }
        if self.tg != 0 {
            events.push(BurstEvent::CallInfo {
                slot: 0,
                tg: self.tg,
                src: self.src,
            });
        }
        events
    }
}

impl BurstDecoder for DpmrDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, DPMR_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        match input.sync.kind {
            FrameKind::Fs1 => self.decode_header(input.post),
            FrameKind::Fs2 => self.decode_superframe(input.post, vocoder),
            FrameKind::Fs3 => {
                vec![BurstEvent::EndOfCall { slot: 0 }]
            }
            FrameKind::Fs4 => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::conv_encode;
    use crate::sync::{Polarity, Protocol, SyncKind};
    use crate::vocoder::SilenceVocoder;

    fn u32_bits(value: u32, width: usize) -> Vec<u8> {
        (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    fn bits_to_dibits(bits: &[u8]) -> Vec<Dibit> {
        bits.chunks(2)
            .map(|p| (p[0] << 1) | p.get(1).copied().unwrap_or(0))
            .collect()
    }

    fn header_dibits(tg: u32, src: u32, cipher: u8) -> Vec<Dibit> {
        let mut bits = u32_bits(0, 2); // format
        bits.extend(u32_bits(tg, 24));
        bits.extend(u32_bits(src, 24));
        bits.extend(u32_bits(cipher as u32, 2));
        let crc = crc7(&bits);
        bits.extend(u32_bits(crc, 7));
        let coded = conv_encode(&bits, K3_CONSTRAINT, K3_POLYS);
        let mut dibits = bits_to_dibits(&coded);
        dibits.resize(DPMR_POST_DIBITS, 0);
        dibits
    }

    fn decode(decoder: &mut DpmrDecoder, kind: FrameKind, post: &[Dibit]) -> Vec<BurstEvent> {
        let mut vocoder = SilenceVocoder;
        decoder.decode(
            &DecodeInput {
                sync: SyncKind {
                    protocol: Protocol::Dpmr,
                    polarity: Polarity::Normal,
                    kind,
                },
                pre: &[],
                center: &[],
                post,
                post_reliability: &[],
                follow_on: false,
                now_m: 0.0,
            },
            &mut vocoder,
        )
    }

    #[test]
    fn header_parses_ids_and_cipher() {
        let mut decoder = DpmrDecoder::new();
        let events = decode(&mut decoder, FrameKind::Fs1, &header_dibits(300, 42, 2));
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::CallInfo { tg: 300, src: 42, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::Crypto { algid: 2, .. })));
    }

    #[test]
    fn superframe_carries_four_codewords() {
        let mut decoder = DpmrDecoder::new();
        let post = vec![2u8; DPMR_POST_DIBITS];
        let events = decode(&mut decoder, FrameKind::Fs2, &post);
        match &events[0] {
            BurstEvent::Voice { frames, .. } => assert_eq!(frames.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fs3_ends_transmission() {
        let mut decoder = DpmrDecoder::new();
        let events = decode(&mut decoder, FrameKind::Fs3, &[]);
        assert!(events.iter().any(|e| matches!(e, BurstEvent::EndOfCall { .. })));
    }

    #[test]
    fn damaged_header_crc_fails() {
        let mut decoder = DpmrDecoder::new();
        let mut dibits = header_dibits(300, 42, 0);
        // Burst errors beyond what K=3 can absorb.
        for d in dibits[4..24].iter_mut() {
            *d ^= 0x3;
        }
        let events = decode(&mut decoder, FrameKind::Fs1, &dibits);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::DecodeError { .. })));
    }
}
