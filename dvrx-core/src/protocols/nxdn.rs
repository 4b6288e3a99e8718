//! NXDN: FSW-aligned frames with LICH, SACCH signalling and AMBE voice.
//!
//! The 10-dibit FSW is short enough to alias against noise, so the hunter
//! only accepts it when the previous sync was already NXDN in the same
//! polarity family. After the FSW: the duplicated-bit LICH, one SACCH
//! fragment, and four voice codewords.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{viterbi_decode, K3_CONSTRAINT, K3_POLYS};
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Dibits after the FSW.
pub const NXDN_POST_DIBITS: usize = 182;

const LICH_DIBITS: usize = 8;
const SACCH_DIBITS: usize = 30;
const VOICE_DIBITS: usize = 144;
const AMBE_CODED_BITS: usize = 72;

/// SACCH message types.
const MSG_VCALL: u8 = 0x01;
const MSG_TX_RELEASE: u8 = 0x08;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

/// Map the NXDN cipher type field onto the algid space the mixer gates
/// on: 1 = scrambler, 2 = DES, 3 = AES.
fn cipher_to_algid(cipher: u8) -> u8 {
    match cipher {
        0 => 0x00,
        1 => 0x01,
        2 => 0x81,
        _ => 0x84,
    }
}

#[derive(Debug, Default)]
pub struct NxdnDecoder {
    /// Sticky call context; SACCH repeats it only periodically.
    tg: u32,
    cipher: u8,
    key_id: u16,
}

impl NxdnDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// LICH bits arrive duplicated; majority-pick the pairs.
    fn decode_lich(&self, dibits: &[Dibit]) -> u8 {
        let bits = dibits_to_bits(dibits);
        let mut lich = 0u8;
        for pair in bits.chunks(2).take(8) {
            lich = (lich << 1) | (pair[0] & 1);
        }
        lich
    }

    fn decode_sacch(&mut self, dibits: &[Dibit]) -> Vec<BurstEvent> {
        let coded = dibits_to_bits(dibits);
        let decoded = viterbi_decode(&coded, K3_CONSTRAINT, K3_POLYS, None);
        if decoded.len() < 28 {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 28,
            }];
        }
        let bits = &decoded[..28];
        let msg_type = bits_to_u32(&bits[0..6]) as u8;
        match msg_type {
            MSG_VCALL => {
                let cipher = bits_to_u32(&bits[6..8]) as u8;
                let key_id = bits_to_u32(&bits[8..14]) as u16;
                let tg = bits_to_u32(&bits[14..28]);
                self.tg = tg;
                self.cipher = cipher;
                self.key_id = key_id;

                let mut events = vec![BurstEvent::CallInfo { slot: 0, tg, src: 0 }];
                if cipher != 0 {
                    events.push(BurstEvent::Crypto {
                        slot: 0,
                        algid: cipher_to_algid(cipher),
                        key_id,
                        mi: [0; 9],
                    });
                }
                events
            }
            MSG_TX_RELEASE => {
                self.cipher = 0;
                vec![BurstEvent::EndOfCall { slot: 0 }]
            }
            _ => Vec::new(),
        }
    }

    fn decode_voice(&self, dibits: &[Dibit], vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let bits = dibits_to_bits(dibits);
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
        // Re-announce the sticky cipher state so the mixer gates voice
        // frames between SACCH repeats.
        if self.cipher != 0 {
            events.push(BurstEvent::Crypto {
                slot: 0,
                algid: cipher_to_algid(self.cipher),
                key_id: self.key_id,
                mi: [0; 9],
            });
        }
        if self.tg != 0 {
            events.push(BurstEvent::CallInfo {
                slot: 0,
                tg: self.tg,
                src: 0,
            });
        }
        events
    }
}

impl BurstDecoder for NxdnDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, NXDN_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let body = input.post;
        if body.len() < LICH_DIBITS + SACCH_DIBITS {
            return Vec::new();
        }

        let lich = self.decode_lich(&body[..LICH_DIBITS]);
        // RF channel type in the top bits: 0b01xx_xxxx marks a traffic
        // channel carrying voice; control-only frames skip the VCH.
        let has_voice = lich & 0x40 != 0;

        let mut events =
            self.decode_sacch(&body[LICH_DIBITS..LICH_DIBITS + SACCH_DIBITS]);

        if has_voice && body.len() >= LICH_DIBITS + SACCH_DIBITS + VOICE_DIBITS {
            let voice_start = LICH_DIBITS + SACCH_DIBITS;
            events.extend(
                self.decode_voice(&body[voice_start..voice_start + VOICE_DIBITS], vocoder),
            );
        }
        events
    }

    fn reset(&mut self) {
        self.tg = 0;
        self.cipher = 0;
        self.key_id = 0;
    }
}
