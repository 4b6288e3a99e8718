//! D-STAR: convolutionally-coded headers and AMBE voice with slow data.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{crc16_ccitt, viterbi_decode, K3_CONSTRAINT, K3_POLYS};
use crate::sync::FrameKind;
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Longest body we need: the radio header.
pub const DSTAR_POST_DIBITS: usize = 330;

/// Header: 41 bytes of callsign routing plus CRC, rate-1/2 coded.
const HEADER_BITS: usize = 328;

/// Voice frame: one 72-bit AMBE codeword plus 24 bits of slow data.
const VOICE_DIBITS: usize = 48;
const AMBE_BITS: usize = 72;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

fn bits_to_string(bits: &[u8], bytes: usize) -> String {
    (0..bytes)
        .map(|i| {
            let v = bits_to_u32(&bits[i * 8..i * 8 + 8]) as u8;
            if v.is_ascii_graphic() || v == b' ' {
                v as char
            } else {
                '.'
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DstarDecoder;

impl DstarDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_header(&self, body: &[Dibit]) -> Vec<BurstEvent> {
        if body.len() < DSTAR_POST_DIBITS {
            return Vec::new();
        }
        let coded = dibits_to_bits(&body[..DSTAR_POST_DIBITS]);
        let decoded = viterbi_decode(&coded, K3_CONSTRAINT, K3_POLYS, None);
        if decoded.len() < HEADER_BITS {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: HEADER_BITS as u32,
            }];
        }
        let bits = &decoded[..HEADER_BITS];
        let crc = crc16_ccitt(&bits[..312]);
        if crc != bits_to_u32(&bits[312..328]) {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 16,
            }];
        }

        // Flags (3 bytes), then four 8-byte callsign fields: RPT2, RPT1,
        // UR (your), MY; a 4-byte suffix follows MY.
        let my = bits_to_string(&bits[24 + 3 * 64..], 8);
        let ur = bits_to_string(&bits[24 + 2 * 64..], 8);
        vec![
            BurstEvent::TalkerAlias {
                slot: 0,
                alias: format!("{} > {}", my.trim(), ur.trim()),
            },
            BurstEvent::CallInfo {
                slot: 0,
                tg: 0,
                src: 0,
            },
        ]
    }

    fn decode_voice(&self, body: &[Dibit], vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        if body.len() < VOICE_DIBITS {
            return Vec::new();
        }
        let bits = dibits_to_bits(&body[..VOICE_DIBITS]);
        let frame = vocoder.decode(CodewordKind::Ambe, &bits[..AMBE_BITS]);
        let slow_data: Vec<u8> = bits[AMBE_BITS..96]
            .chunks(8)
            .map(|c| bits_to_u32(c) as u8)
            .collect();

        let mut events = vec![BurstEvent::Voice {
            slot: 0,
            frames: vec![frame],
        }];
        // All-ones slow data marks the end-of-transmission pattern.
        if slow_data.iter().all(|&b| b == 0xFF) {
            events.push(BurstEvent::EndOfCall { slot: 0 });
        }
        events
    }
}

impl BurstDecoder for DstarDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, DSTAR_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        match input.sync.kind {
            FrameKind::Header => self.decode_header(input.post),
            FrameKind::Voice => self.decode_voice(input.post, vocoder),
            _ => Vec::new(),
        }
    }
}
