//! P25 Phase 2: TDMA voice bursts and xCCH MAC signalling.
//!
//! Each 20-dibit S-ISCH sync introduces one 160-dibit burst. The I-ISCH
//! fragment names the burst type (4V / 2V voice clusters, FACCH, SACCH)
//! and the TDMA slot; voice bursts carry AMBE+2 codewords that the
//! receiver feeds into the per-slot jitter ring, and MAC PDUs drive the
//! trunking machine's per-slot gates.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::crc16_ccitt;
use crate::trunk::{Grant, GrantKind, SvcBits};
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput, TrunkPdu};

/// Burst length after the sync, in dibits.
pub const P2_POST_DIBITS: usize = 160;

/// I-ISCH fragment length in dibits.
const ISCH_DIBITS: usize = 10;

/// AMBE+2 codeword length in bits.
const AMBE2_BITS: usize = 49;

/// Burst types signalled in the I-ISCH.
const BURST_4V: u8 = 0;
const BURST_2V: u8 = 1;
const BURST_FACCH: u8 = 2;
const BURST_SACCH: u8 = 3;

/// MAC opcodes.
const MAC_PTT: u8 = 0x01;
const MAC_END_PTT: u8 = 0x02;
const MAC_IDLE: u8 = 0x03;
const MAC_ACTIVE: u8 = 0x04;
const MAC_GRP_GRANT: u8 = 0x40;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

/// Per-slot call context carried across bursts.
#[derive(Debug, Clone, Copy, Default)]
struct SlotContext {
    tg: u32,
    src: u32,
    algid: u8,
    key_id: u16,
}

#[derive(Debug, Default)]
pub struct P25p2Decoder {
    slots: [SlotContext; 2],
}

impl P25p2Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_voice(
        &mut self,
        slot: u8,
        body: &[Dibit],
        codewords: usize,
        vocoder: &mut dyn Vocoder,
    ) -> Vec<BurstEvent> {
        let bits = dibits_to_bits(body);
        let mut frames = Vec::with_capacity(codewords);
        for i in 0..codewords {
            let start = i * AMBE2_BITS;
            let end = start + AMBE2_BITS;
            if end > bits.len() {
                break;
            }
            frames.push(vocoder.decode(CodewordKind::Ambe2, &bits[start..end]));
        }
        if frames.is_empty() {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: (codewords * AMBE2_BITS) as u32,
            }];
        }
        let ctx = self.slots[slot as usize];
        let mut events = vec![BurstEvent::Voice { slot, frames }];
        if ctx.algid != 0 {
            events.push(BurstEvent::Crypto {
                slot,
                algid: ctx.algid,
                key_id: ctx.key_id,
                mi: [0; 9],
            });
        }
        events
    }

    fn decode_mac(&mut self, slot: u8, body: &[Dibit]) -> Vec<BurstEvent> {
        // MAC PDU: 144 message bits plus CRC-16 in the first 80 dibits.
        let bits = dibits_to_bits(&body[..80.min(body.len())]);
        if bits.len() < 160 {
            return Vec::new();
        }
        let crc = crc16_ccitt(&bits[..144]);
        let sent = bits_to_u32(&bits[144..160]);
        if crc != sent {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: (crc ^ sent).count_ones(),
            }];
        }

        let opcode = bits_to_u32(&bits[0..8]) as u8;
        match opcode {
            MAC_PTT => {
                let tg = bits_to_u32(&bits[8..24]);
                let src = bits_to_u32(&bits[24..48]);
                let algid = bits_to_u32(&bits[48..56]) as u8;
                let key_id = bits_to_u32(&bits[56..72]) as u16;
                let mut mi = [0u8; 9];
                for (i, byte) in mi.iter_mut().enumerate() {
                    *byte = bits_to_u32(&bits[72 + i * 8..80 + i * 8]) as u8;
                }
                let ctx = &mut self.slots[slot as usize];
                ctx.tg = tg;
                ctx.src = src;
                ctx.algid = algid;
                ctx.key_id = key_id;
                vec![
                    BurstEvent::Control(TrunkPdu::MacActive { slot, tg, src }),
                    BurstEvent::Crypto {
                        slot,
                        algid,
                        key_id,
                        mi,
                    },
                    BurstEvent::CallInfo { slot, tg, src },
                ]
            }
            MAC_ACTIVE => {
                let tg = bits_to_u32(&bits[8..24]);
                let src = bits_to_u32(&bits[24..48]);
                let ctx = &mut self.slots[slot as usize];
                if tg != 0 {
                    ctx.tg = tg;
                }
                if src != 0 {
                    ctx.src = src;
                }
                vec![BurstEvent::Control(TrunkPdu::MacActive {
                    slot,
                    tg: self.slots[slot as usize].tg,
                    src: self.slots[slot as usize].src,
                })]
            }
            MAC_END_PTT => {
                self.slots[slot as usize].algid = 0;
                vec![
                    BurstEvent::Control(TrunkPdu::MacEnd { slot }),
                    BurstEvent::EndOfCall { slot },
                ]
            }
            MAC_IDLE => vec![BurstEvent::Control(TrunkPdu::MacEnd { slot })],
            MAC_GRP_GRANT => {
                let svc = bits_to_u32(&bits[8..16]) as u8;
                let channel = bits_to_u32(&bits[16..32]) as u16;
                let tg = bits_to_u32(&bits[32..48]);
                let src = bits_to_u32(&bits[48..72]);
                vec![BurstEvent::Control(TrunkPdu::Grant(Grant {
                    kind: GrantKind::Group,
                    tg,
                    src,
                    channel,
                    freq_hz: None,
                    svc: SvcBits {
                        emergency: svc & 0x80 != 0,
                        encrypted: svc & 0x40 != 0,
                        data: svc & 0x10 != 0,
                    },
                    algid: 0,
                }))]
            }
            _ => Vec::new(),
        }
    }
}

impl BurstDecoder for P25p2Decoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, P2_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let body = input.post;
        if body.len() < ISCH_DIBITS {
            return Vec::new();
        }
        let isch = dibits_to_bits(&body[..ISCH_DIBITS]);
        let burst_type = bits_to_u32(&isch[0..2]) as u8;
        let slot = isch[2] & 1;
        let payload = &body[ISCH_DIBITS..];

        match burst_type {
            BURST_4V => self.decode_voice(slot, payload, 4, vocoder),
            BURST_2V => self.decode_voice(slot, payload, 2, vocoder),
            BURST_FACCH | BURST_SACCH => self.decode_mac(slot, payload),
            _ => Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.slots = [SlotContext::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{FrameKind, Polarity, Protocol, SyncKind};
    use crate::vocoder::SilenceVocoder;

    fn sync_kind() -> SyncKind {
        SyncKind {
            protocol: Protocol::P25p2,
            polarity: Polarity::Normal,
            kind: FrameKind::Frame,
        }
    }

    fn u32_bits(value: u32, width: usize) -> Vec<u8> {
        (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    fn bits_to_dibits(bits: &[u8]) -> Vec<Dibit> {
        bits.chunks(2)
            .map(|p| (p[0] << 1) | p.get(1).copied().unwrap_or(0))
            .collect()
    }

    fn isch(burst_type: u8, slot: u8) -> Vec<Dibit> {
        let mut bits = u32_bits(burst_type as u32, 2);
        bits.push(slot & 1);
        bits.extend(std::iter::repeat(0).take(17));
        bits_to_dibits(&bits)
    }

    fn mac_burst(slot: u8, opcode: u8, fields: &[u8]) -> Vec<Dibit> {
        let mut bits = u32_bits(opcode as u32, 8);
        bits.extend_from_slice(fields);
        bits.resize(144, 0);
        let crc = crc16_ccitt(&bits);
        bits.extend(u32_bits(crc, 16));

        let mut dibits = isch(BURST_FACCH, slot);
        dibits.extend(bits_to_dibits(&bits));
        dibits.resize(P2_POST_DIBITS, 0);
        dibits
    }

    fn decode(decoder: &mut P25p2Decoder, dibits: &[Dibit]) -> Vec<BurstEvent> {
        let mut vocoder = SilenceVocoder;
        decoder.decode(
            &DecodeInput {
                sync: sync_kind(),
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
    fn four_v_burst_yields_four_frames_on_signalled_slot() {
        let mut decoder = P25p2Decoder::new();
        let mut dibits = isch(BURST_4V, 1);
        dibits.resize(P2_POST_DIBITS, 2);

        let events = decode(&mut decoder, &dibits);
        match &events[0] {
            BurstEvent::Voice { slot, frames } => {
                assert_eq!(*slot, 1);
                assert_eq!(frames.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn two_v_burst_yields_two_frames() {
        let mut decoder = P25p2Decoder::new();
        let mut dibits = isch(BURST_2V, 0);
        dibits.resize(P2_POST_DIBITS, 1);
        let events = decode(&mut decoder, &dibits);
        match &events[0] {
            BurstEvent::Voice { slot: 0, frames } => assert_eq!(frames.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mac_ptt_sets_context_and_opens_slot() {
        let mut decoder = P25p2Decoder::new();
        let mut fields = Vec::new();
        fields.extend(u32_bits(800, 16)); // tg
        fields.extend(u32_bits(0x123456, 24)); // src
        fields.extend(u32_bits(0x84, 8)); // algid
        fields.extend(u32_bits(0x0005, 16)); // key id
        let burst = mac_burst(0, MAC_PTT, &fields);

        let events = decode(&mut decoder, &burst);
        assert!(events.iter().any(|e| matches!(
            e,
            BurstEvent::Control(TrunkPdu::MacActive {
                slot: 0,
                tg: 800,
                src: 0x123456
            })
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            BurstEvent::Crypto {
                algid: 0x84,
                key_id: 5,
                ..
            }
        )));

        // A later voice burst on the same slot re-announces the crypto
        // state so the mixer can gate without re-reading the MAC.
        let mut voice = isch(BURST_2V, 0);
        voice.resize(P2_POST_DIBITS, 1);
        let events = decode(&mut decoder, &voice);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::Crypto { algid: 0x84, .. })));
    }

    #[test]
    fn mac_end_ptt_closes_slot() {
        let mut decoder = P25p2Decoder::new();
        let burst = mac_burst(1, MAC_END_PTT, &[]);
        let events = decode(&mut decoder, &burst);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::Control(TrunkPdu::MacEnd { slot: 1 }))));
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::EndOfCall { slot: 1 })));
    }

    #[test]
    fn grant_mac_parses_channel_and_group() {
        let mut decoder = P25p2Decoder::new();
        let mut fields = Vec::new();
        fields.extend(u32_bits(0x00, 8)); // svc clear
        fields.extend(u32_bits(0x2004, 16)); // channel
        fields.extend(u32_bits(900, 16)); // tg
        fields.extend(u32_bits(77, 24)); // src
        let burst = mac_burst(0, MAC_GRP_GRANT, &fields);

        let events = decode(&mut decoder, &burst);
        match &events[0] {
            BurstEvent::Control(TrunkPdu::Grant(g)) => {
                assert_eq!(g.channel, 0x2004);
                assert_eq!(g.tg, 900);
                assert!(!g.svc.encrypted);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn corrupted_mac_is_a_decode_error() {
        let mut decoder = P25p2Decoder::new();
        let mut burst = mac_burst(0, MAC_ACTIVE, &[]);
        burst[ISCH_DIBITS + 3] ^= 1;
        let events = decode(&mut decoder, &burst);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::DecodeError { .. })));
    }
}
