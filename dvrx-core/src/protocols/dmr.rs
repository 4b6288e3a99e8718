//! DMR: two-slot TDMA voice and data bursts.
//!
//! A DMR burst is 144 dibits: CACH, the first payload half, the 24-dibit
//! sync (or EMB in bursts B–F of a voice superframe), and the second
//! payload half. Only burst A of a superframe carries sync, so after a
//! voice sync match the decoder asks the router for five continuation
//! bursts and reads the EMB where the sync would be.
//!
//! Embedded LC fragments accumulate across bursts; the talker alias
//! accumulates across LC blocks with the character size signalled in the
//! alias header and is emitted on the final block. Rate-3/4 data uses the
//! trellis decoder with the slicer's reliability bytes.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{
    crc5, crc16_ccitt, golay_20_8_decode, qr_16_7_6_decode, trellis_34_decode, viterbi_decode,
    K3_CONSTRAINT, K3_POLYS,
};
use crate::sync::FrameKind;
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// CACH dibits in front of each burst.
const CACH_DIBITS: usize = 12;
/// One payload half.
const HALF_DIBITS: usize = 54;
/// Sync / EMB region.
const CENTER_DIBITS: usize = 24;

/// AMBE voice codeword, coded bits.
const AMBE_CODED_BITS: usize = 72;

/// Voice superframe length in bursts.
const SUPERFRAME_BURSTS: usize = 6;

/// Data types from the slot type word.
const DT_VOICE_LC_HEADER: u8 = 0x1;
const DT_TERMINATOR_LC: u8 = 0x2;
const DT_CSBK: u8 = 0x3;
const DT_RATE_34_DATA: u8 = 0x7;

/// Full link control opcodes.
const FLCO_GROUP_VOICE: u8 = 0x00;
const FLCO_PRIVATE_VOICE: u8 = 0x03;
const FLCO_ALIAS_HEADER: u8 = 0x04;
const FLCO_ALIAS_BLOCK1: u8 = 0x05;
const FLCO_ALIAS_BLOCK2: u8 = 0x06;
const FLCO_ALIAS_BLOCK3: u8 = 0x07;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

/// Talker alias accumulator. The header signals character size and count;
/// blocks append raw bits until the alias is complete.
#[derive(Debug, Default, Clone)]
struct AliasAccumulator {
    char_bits: usize,
    char_count: usize,
    bits: Vec<u8>,
}

impl AliasAccumulator {
    fn start(&mut self, format: u8, count: usize, data: &[u8]) {
        self.char_bits = match format {
            0 => 7,
            1 => 8,
            _ => 16,
        };
        self.char_count = count;
        self.bits = data.to_vec();
    }

    fn append(&mut self, data: &[u8]) -> Option<String> {
        if self.char_bits == 0 {
            return None; // no header seen yet
        }
        self.bits.extend_from_slice(data);
        let needed = self.char_bits * self.char_count;
        if self.char_count == 0 || self.bits.len() < needed {
            return None;
        }
        let alias = self.decode(&self.bits[..needed]);
        self.char_bits = 0;
        self.char_count = 0;
        self.bits.clear();
        Some(alias)
    }

    fn decode(&self, bits: &[u8]) -> String {
        match self.char_bits {
            7 | 8 => bits
                .chunks(self.char_bits)
                .map(|c| {
                    let v = bits_to_u32(c) as u8;
                    if v.is_ascii_graphic() || v == b' ' {
                        v as char
                    } else {
                        '.'
                    }
                })
                .collect(),
            16 => {
                let units: Vec<u16> = bits.chunks(16).map(|c| bits_to_u32(c) as u16).collect();
                String::from_utf16_lossy(&units)
            }
            _ => String::new(),
        }
    }
}

/// Embedded LC reassembly: four 32-bit fragments bracketed by LCSS
/// start/stop markers.
#[derive(Debug, Default, Clone)]
struct EmbeddedLc {
    bits: Vec<u8>,
    collecting: bool,
}

#[derive(Debug, Default)]
pub struct DmrDecoder {
    pending_continuations: usize,
    /// Slot carried by the CACH TC bit of the current burst.
    slot: u8,
    alias: [AliasAccumulator; 2],
    embedded: [EmbeddedLc; 2],
}

impl DmrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret one 72-bit full LC.
    pub(crate) fn handle_lc(&mut self, slot: u8, bits: &[u8]) -> Vec<BurstEvent> {
        if bits.len() < 72 {
            return Vec::new();
        }
        let s = (slot & 1) as usize;
        let flco = bits_to_u32(&bits[0..8]) as u8;
        match flco {
            FLCO_GROUP_VOICE | FLCO_PRIVATE_VOICE => {
                let svc = bits_to_u32(&bits[16..24]) as u8;
                let tg = bits_to_u32(&bits[24..48]);
                let src = bits_to_u32(&bits[48..72]);
                let mut events = vec![BurstEvent::CallInfo { slot, tg, src }];
                if svc & 0x40 != 0 {
                    // Privacy bit set; basic privacy has no key id.
                    events.push(BurstEvent::Crypto {
                        slot,
                        algid: 0x01,
                        key_id: 0,
                        mi: [0; 9],
                    });
                }
                events
            }
            FLCO_ALIAS_HEADER => {
                let format = bits_to_u32(&bits[16..18]) as u8;
                let count = bits_to_u32(&bits[18..24]) as usize;
                self.alias[s].start(format, count, &bits[24..72]);
                match self.alias[s].append(&[]) {
                    Some(alias) => vec![BurstEvent::TalkerAlias { slot, alias }],
                    None => Vec::new(),
                }
            }
            FLCO_ALIAS_BLOCK1 | FLCO_ALIAS_BLOCK2 | FLCO_ALIAS_BLOCK3 => {
                match self.alias[s].append(&bits[16..72]) {
                    Some(alias) => vec![BurstEvent::TalkerAlias { slot, alias }],
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// EMB region of a follow-on burst: QR-protected EMB plus a 32-bit
    /// embedded signalling fragment.
    fn handle_emb(&mut self, slot: u8, center: &[Dibit]) -> Vec<BurstEvent> {
        if center.len() < CENTER_DIBITS {
            return Vec::new();
        }
        let s = (slot & 1) as usize;
        let emb_bits = dibits_to_bits(&center[..8]);
        let mut emb = [0u8; 16];
        emb.copy_from_slice(&emb_bits[..16]);
        let Some((decoded, _)) = qr_16_7_6_decode(&emb) else {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 16,
            }];
        };
        let lcss = bits_to_u32(&decoded[5..7]) as u8;
        let fragment = dibits_to_bits(&center[8..24]);

        match lcss {
            1 => {
                // First fragment.
                self.embedded[s].bits = fragment;
                self.embedded[s].collecting = true;
                Vec::new()
            }
            3 => {
                if self.embedded[s].collecting {
                    self.embedded[s].bits.extend(fragment);
                }
                Vec::new()
            }
            2 => {
                if !self.embedded[s].collecting {
                    return Vec::new();
                }
                self.embedded[s].bits.extend(fragment);
                self.embedded[s].collecting = false;
                let bits = std::mem::take(&mut self.embedded[s].bits);
                if bits.len() < 77 {
                    return Vec::new();
                }
                let sent = bits_to_u32(&bits[72..77]);
                if crc5(&bits[..72]) != sent {
                    return vec![BurstEvent::DecodeError {
                        irrecoverable_bits: 5,
                    }];
                }
                self.handle_lc(slot, &bits[..72])
            }
            _ => Vec::new(),
        }
    }

    fn decode_voice(
        &mut self,
        slot: u8,
        payload_bits: &[u8],
        vocoder: &mut dyn Vocoder,
    ) -> Vec<BurstEvent> {
        let mut frames = Vec::with_capacity(3);
        for i in 0..3 {
            let start = i * AMBE_CODED_BITS;
            let end = start + AMBE_CODED_BITS;
            if end > payload_bits.len() {
                break;
            }
            frames.push(vocoder.decode(CodewordKind::Ambe2, &payload_bits[start..end]));
        }
        if frames.is_empty() {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 216,
            }];
        }
        vec![BurstEvent::Voice { slot, frames }]
    }

    fn decode_data(
        &mut self,
        slot: u8,
        pre: &[Dibit],
        post: &[Dibit],
        reliability: &[u8],
    ) -> Vec<BurstEvent> {
        // Slot type brackets the sync: 5 dibits each side, Golay(20,8).
        let mut st_bits = dibits_to_bits(&pre[CACH_DIBITS + 49..CACH_DIBITS + 54]);
        st_bits.extend(dibits_to_bits(&post[..5]));
        let mut st = [0u8; 20];
        st.copy_from_slice(&st_bits[..20]);
        let Some((st_decoded, _)) = golay_20_8_decode(&st) else {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 20,
            }];
        };
        let data_type = bits_to_u32(&st_decoded[4..8]) as u8;

        // Info region: the payload halves minus the slot type brackets.
        let mut coded = dibits_to_bits(&pre[CACH_DIBITS..CACH_DIBITS + 49]);
        coded.extend(dibits_to_bits(&post[5..54]));

        match data_type {
            DT_VOICE_LC_HEADER | DT_TERMINATOR_LC | DT_CSBK => {
                let decoded = viterbi_decode(&coded, K3_CONSTRAINT, K3_POLYS, None);
                if decoded.len() < 96 {
                    return vec![BurstEvent::DecodeError {
                        irrecoverable_bits: 96,
                    }];
                }
                let bits = &decoded[..96];
                let crc = crc16_ccitt(&bits[..80]);
                if crc != bits_to_u32(&bits[80..96]) {
                    return vec![BurstEvent::DecodeError {
                        irrecoverable_bits: 16,
                    }];
                }
                match data_type {
                    DT_VOICE_LC_HEADER => self.handle_lc(slot, &bits[..72]),
                    DT_TERMINATOR_LC => {
                        let mut events = self.handle_lc(slot, &bits[..72]);
                        events.push(BurstEvent::EndOfCall { slot });
                        events
                    }
                    _ => Vec::new(), // CSBK payloads are not interpreted
                }
            }
            DT_RATE_34_DATA => {
                // 195 coded bits decode to 16 payload bytes.
                let take = coded.len().min(195);
                let rel = if reliability.len() >= post.len() {
                    // Reliability only tracks the post half; pad the front.
                    let mut padded = vec![255u8; take.saturating_sub(post.len() * 2)];
                    padded.extend_from_slice(&reliability[..post.len()]);
                    Some(padded)
                } else {
                    None
                };
                let decoded = trellis_34_decode(
                    &coded[..take],
                    rel.as_deref(),
                    K3_CONSTRAINT,
                    K3_POLYS,
                );
                let bytes: Vec<u8> = decoded
                    .chunks(8)
                    .take(16)
                    .map(|c| bits_to_u32(c) as u8)
                    .collect();
                vec![BurstEvent::Data { slot, bytes }]
            }
            _ => Vec::new(),
        }
    }
}

impl BurstDecoder for DmrDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(CACH_DIBITS + HALF_DIBITS, CENTER_DIBITS, HALF_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let layout = self.layout();
        if input.pre.len() < layout.pre || input.post.len() < layout.post {
            return Vec::new();
        }

        // CACH: the TC bit names the TDMA slot of this burst.
        let cach = dibits_to_bits(&input.pre[..CACH_DIBITS]);
        self.slot = cach[1] & 1;
        let slot = self.slot;

        let voice = if input.follow_on {
            true // continuations only happen inside a voice superframe
        } else {
            matches!(input.sync.kind, FrameKind::BsVoice | FrameKind::MsVoice)
        };

        if voice {
            let mut events = Vec::new();
            if input.follow_on {
                events.extend(self.handle_emb(slot, input.center));
            } else {
                // Burst A: schedule the rest of the superframe.
                self.pending_continuations = SUPERFRAME_BURSTS - 1;
            }
            let mut payload = dibits_to_bits(&input.pre[CACH_DIBITS..]);
            payload.extend(dibits_to_bits(&input.post[..HALF_DIBITS]));
            events.extend(self.decode_voice(slot, &payload, vocoder));
            events
        } else {
            self.pending_continuations = 0;
            self.decode_data(slot, input.pre, input.post, input.post_reliability)
        }
    }

    fn continuation(&mut self) -> Option<BurstLayout> {
        if self.pending_continuations == 0 {
            return None;
        }
        self.pending_continuations -= 1;
        Some(self.layout())
    }

    fn reset(&mut self) {
        self.pending_continuations = 0;
        self.embedded = [EmbeddedLc::default(), EmbeddedLc::default()];
        // Alias accumulators survive; a call can span resets.
    }
}
