//! EDACS: control-channel word decoding for the trunking machine.
//!
//! Control words are repeated three times per frame; a bitwise majority
//! vote recovers the 40-bit word, and a CRC-8 seals it. Working-channel
//! assignments surface as `EdacsAssign` PDUs that the receiver resolves
//! through its LCN map.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::crc8;

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput, TrunkPdu};
use crate::vocoder::Vocoder;

/// Three copies of the 40-bit word.
pub const EDACS_POST_DIBITS: usize = 60;

const WORD_BITS: usize = 40;

/// Commands.
const CMD_VOICE_ASSIGN: u8 = 0x01;
const CMD_IDLE: u8 = 0xFF;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

#[derive(Debug, Default)]
pub struct EdacsDecoder;

impl EdacsDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Majority vote across the three word copies.
    fn vote(bits: &[u8]) -> Vec<u8> {
        (0..WORD_BITS)
            .map(|i| {
                let sum = bits[i] + bits[WORD_BITS + i] + bits[2 * WORD_BITS + i];
                (sum >= 2) as u8
            })
            .collect()
    }
}

impl BurstDecoder for EdacsDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, EDACS_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, _vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        if input.post.len() < EDACS_POST_DIBITS {
            return Vec::new();
        }
        let bits = dibits_to_bits(&input.post[..EDACS_POST_DIBITS]);
        let word = Self::vote(&bits);

        let sent = bits_to_u32(&word[32..40]);
        if crc8(&word[..32]) != sent {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 8,
            }];
        }

        let cmd = bits_to_u32(&word[0..8]) as u8;
        match cmd {
            CMD_VOICE_ASSIGN => {
                let lcn = bits_to_u32(&word[8..16]) as u8;
                let group = bits_to_u32(&word[16..32]) as u16;
                vec![BurstEvent::Control(TrunkPdu::EdacsAssign { lcn, group })]
            }
            CMD_IDLE => Vec::new(),
            _ => Vec::new(),
        }
    }
}
