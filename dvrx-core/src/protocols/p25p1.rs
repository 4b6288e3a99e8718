//! P25 Phase 1: LDU voice, TSBK trunking signalling, terminators.
//!
//! Frame layout after the 24-dibit frame sync: the NID (NAC + DUID, its
//! BCH parity handled by the FEC collaborator), then a DUID-specific body.
//! LDU1/LDU2 carry nine IMBE codewords with link control or encryption
//! sync interleaved; TSBKs are trellis-coded signalling blocks that feed
//! the trunking machine.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{crc16_ccitt, viterbi_decode, K3_CONSTRAINT, K3_POLYS};
use crate::trunk::{Grant, GrantKind, SvcBits};
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput, TrunkPdu};

/// Dibits after the sync in a full LDU frame.
pub const LDU_POST_DIBITS: usize = 840;

/// NID span in dibits.
const NID_DIBITS: usize = 32;

/// IMBE codeword length in bits (with its embedded FEC, which the
/// vocoder collaborator consumes whole).
const IMBE_BITS: usize = 144;
const IMBE_DIBITS: usize = IMBE_BITS / 2;
const IMBE_PER_LDU: usize = 9;

/// Data unit IDs.
const DUID_HDU: u8 = 0x0;
const DUID_TDU: u8 = 0x3;
const DUID_LDU1: u8 = 0x5;
const DUID_TSBK: u8 = 0x7;
const DUID_LDU2: u8 = 0xA;
const DUID_TDULC: u8 = 0xF;

/// TSBK opcodes handled here.
const OP_GRP_V_CH_GRANT: u8 = 0x00;
const OP_GRP_V_CH_GRANT_UPDT: u8 = 0x02;
const OP_UU_V_CH_GRANT: u8 = 0x04;
const OP_RFSS_STS_BCST: u8 = 0x3A;
const OP_NET_STS_BCST: u8 = 0x3B;
const OP_ADJ_STS_BCST: u8 = 0x3C;
const OP_IDEN_UP: u8 = 0x3D;

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

#[derive(Debug, Default)]
pub struct P25p1Decoder {
    pub nac: u16,
    last_duid: u8,
}

impl P25p1Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_duid(&self) -> u8 {
        self.last_duid
    }

    fn decode_ldu_voice(
        &self,
        body: &[Dibit],
        voice_offset: usize,
        vocoder: &mut dyn Vocoder,
    ) -> Option<BurstEvent> {
        let end = voice_offset + IMBE_PER_LDU * IMBE_DIBITS;
        if body.len() < end {
            return None;
        }
        let mut frames = Vec::with_capacity(IMBE_PER_LDU);
        for i in 0..IMBE_PER_LDU {
            let start = voice_offset + i * IMBE_DIBITS;
            let bits = dibits_to_bits(&body[start..start + IMBE_DIBITS]);
            frames.push(vocoder.decode(CodewordKind::Imbe, &bits));
        }
        Some(BurstEvent::Voice { slot: 0, frames })
    }

    /// Link control from LDU1: LCF, then talkgroup and source for the
    /// group voice format.
    fn decode_lc(&self, body: &[Dibit]) -> Option<BurstEvent> {
        if body.len() < NID_DIBITS + 36 {
            return None;
        }
        let bits = dibits_to_bits(&body[NID_DIBITS..NID_DIBITS + 36]);
        let lcf = bits_to_u32(&bits[0..8]) as u8;
        if lcf != 0x00 {
            return None; // only group voice channel user handled
        }
        let tg = bits_to_u32(&bits[24..40]);
        let src = bits_to_u32(&bits[40..64]);
        Some(BurstEvent::CallInfo { slot: 0, tg, src })
    }

    /// Encryption sync from LDU2: MI, algorithm and key id.
    fn decode_es(&self, body: &[Dibit]) -> Option<BurstEvent> {
        if body.len() < NID_DIBITS + 48 {
            return None;
        }
        let bits = dibits_to_bits(&body[NID_DIBITS..NID_DIBITS + 48]);
        let mut mi = [0u8; 9];
        for (i, slot) in mi.iter_mut().enumerate() {
            *slot = bits_to_u32(&bits[i * 8..i * 8 + 8]) as u8;
        }
        let algid = bits_to_u32(&bits[72..80]) as u8;
        let key_id = bits_to_u32(&bits[80..96]) as u16;
        Some(BurstEvent::Crypto {
            slot: 0,
            algid,
            key_id,
            mi,
        })
    }

    fn decode_tsbk(&self, body: &[Dibit]) -> Vec<BurstEvent> {
        // One TSBK block: 98 dibits of rate-1/2 trellis after the NID.
        let start = NID_DIBITS;
        let end = start + 98;
        if body.len() < end {
            return Vec::new();
        }
        let coded = dibits_to_bits(&body[start..end]);
        let decoded = viterbi_decode(&coded, K3_CONSTRAINT, K3_POLYS, None);
        if decoded.len() < 96 {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 96,
            }];
        }
        let bits = &decoded[..96];

        let crc = crc16_ccitt(&bits[..80]);
        let sent = bits_to_u32(&bits[80..96]);
        if crc != sent {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: (crc ^ sent).count_ones(),
            }];
        }

        let opcode = bits_to_u32(&bits[2..8]) as u8;
        let args = &bits[16..80];
        self.parse_tsbk(opcode, args)
    }

    fn parse_tsbk(&self, opcode: u8, args: &[u8]) -> Vec<BurstEvent> {
        match opcode {
            OP_GRP_V_CH_GRANT | OP_GRP_V_CH_GRANT_UPDT => {
                let svc = bits_to_u32(&args[0..8]) as u8;
                let channel = bits_to_u32(&args[8..24]) as u16;
                let tg = bits_to_u32(&args[24..40]);
                let src = bits_to_u32(&args[40..64]);
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
            OP_UU_V_CH_GRANT => {
                let channel = bits_to_u32(&args[0..16]) as u16;
                let target = bits_to_u32(&args[16..40]);
                let src = bits_to_u32(&args[40..64]);
                vec![BurstEvent::Control(TrunkPdu::Grant(Grant {
                    kind: GrantKind::Private,
                    tg: target,
                    src,
                    channel,
                    freq_hz: None,
                    svc: SvcBits::default(),
                    algid: 0,
                }))]
            }
            OP_IDEN_UP => {
                let iden = bits_to_u32(&args[0..4]) as u8;
                let slots = bits_to_u32(&args[4..8]) as u8;
                let spacing = bits_to_u32(&args[8..20]) * 125;
                let base = bits_to_u32(&args[20..52]).saturating_mul(5);
                vec![BurstEvent::Control(TrunkPdu::IdenUp {
                    iden,
                    base_freq_hz: base,
                    spacing_hz: spacing,
                    slots_per_channel: slots.max(1),
                })]
            }
            OP_ADJ_STS_BCST => {
                let channel = bits_to_u32(&args[0..16]) as u16;
                vec![BurstEvent::Control(TrunkPdu::Adjacent { channel })]
            }
            OP_NET_STS_BCST => {
                let wacn = bits_to_u32(&args[0..20]);
                let sysid = bits_to_u32(&args[20..32]) as u16;
                vec![BurstEvent::Control(TrunkPdu::NetStatus { wacn, sysid })]
            }
            OP_RFSS_STS_BCST => {
                let rfss = bits_to_u32(&args[0..8]) as u8;
                let site = bits_to_u32(&args[8..16]) as u8;
                vec![BurstEvent::Control(TrunkPdu::RfssStatus { rfss, site })]
            }
            _ => Vec::new(),
        }
    }
}

impl BurstDecoder for P25p1Decoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, LDU_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let body = input.post;
        if body.len() < NID_DIBITS {
            return Vec::new();
        }
        let nid_bits = dibits_to_bits(&body[..8]);
        self.nac = bits_to_u32(&nid_bits[0..12]) as u16;
        let duid = bits_to_u32(&nid_bits[12..16]) as u8;
        self.last_duid = duid;

        match duid {
            DUID_HDU => {
                // Header: MI + ALGID + KID + TGID at fixed offsets.
                if body.len() < NID_DIBITS + 60 {
                    return Vec::new();
                }
                let bits = dibits_to_bits(&body[NID_DIBITS..NID_DIBITS + 60]);
                let mut mi = [0u8; 9];
                for (i, slot) in mi.iter_mut().enumerate() {
                    *slot = bits_to_u32(&bits[i * 8..i * 8 + 8]) as u8;
                }
                let algid = bits_to_u32(&bits[80..88]) as u8;
                let key_id = bits_to_u32(&bits[88..104]) as u16;
                let tg = bits_to_u32(&bits[104..120]);
                vec![
                    BurstEvent::Crypto {
                        slot: 0,
                        algid,
                        key_id,
                        mi,
                    },
                    BurstEvent::CallInfo { slot: 0, tg, src: 0 },
                ]
            }
            DUID_LDU1 => {
                let mut events = Vec::new();
                if let Some(info) = self.decode_lc(body) {
                    events.push(info);
                }
                // Voice codewords follow the LC region.
                if let Some(voice) = self.decode_ldu_voice(body, NID_DIBITS + 36, vocoder) {
                    events.push(voice);
                }
                events
            }
            DUID_LDU2 => {
                let mut events = Vec::new();
                if let Some(crypto) = self.decode_es(body) {
                    events.push(crypto);
                }
                if let Some(voice) = self.decode_ldu_voice(body, NID_DIBITS + 48, vocoder) {
                    events.push(voice);
                }
                events
            }
            DUID_TSBK => self.decode_tsbk(body),
            DUID_TDU | DUID_TDULC => vec![BurstEvent::EndOfCall { slot: 0 }],
            _ => Vec::new(),
        }
    }
}
