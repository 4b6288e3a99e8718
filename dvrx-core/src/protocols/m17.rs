//! M17: LSF, stream and packet frames with preamble polarity latching.
//!
//! The eight-dibit burst syncs tolerate one dibit of error. Polarity is
//! learned from the preamble and latched until a contrary preamble is
//! seen; payload dibits are corrected with the latched polarity rather
//! than each frame's own sync, so one corrupted sync cannot flip a whole
//! stream.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::fec::{crc16_ccitt, viterbi_decode, M17_CONSTRAINT, M17_POLYS};
use crate::sync::{FrameKind, Polarity};
use crate::vocoder::{CodewordKind, Vocoder};

use super::{invert_dibits, BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Frame body after the sync burst.
pub const M17_POST_DIBITS: usize = 184;

/// Base-40 callsign alphabet.
const CALLSIGN_CHARS: &[u8] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

fn bits_to_u64(bits: &[u8]) -> u64 {
    bits.iter().fold(0u64, |acc, &b| (acc << 1) | (b as u64 & 1))
}

fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1))
}

/// Decode a 48-bit base-40 encoded callsign.
pub fn decode_callsign(bits: &[u8]) -> String {
    let mut value = bits_to_u64(bits);
    if value == 0xFFFF_FFFF_FFFF {
        return "@ALL".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(CALLSIGN_CHARS[(value % 40) as usize]);
        value /= 40;
    }
    String::from_utf8_lossy(&out).trim_end().to_string()
}

#[derive(Debug, Default)]
pub struct M17Decoder {
    /// Polarity latched from the most recent preamble.
    latched: Option<Polarity>,
    /// Source callsign from the last LSF, re-announced on stream frames.
    src_callsign: String,
}

impl M17Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latched_polarity(&self) -> Option<Polarity> {
        self.latched
    }

    fn corrected<'a>(&self, input: &'a DecodeInput) -> Vec<Dibit> {
        // The latch wins over the frame's own sync polarity.
        let polarity = self.latched.unwrap_or(input.sync.polarity);
        match polarity {
            Polarity::Normal => input.post.to_vec(),
            Polarity::Inverted => invert_dibits(input.post),
        }
    }

    fn decode_lsf(&mut self, body: &[Dibit]) -> Vec<BurstEvent> {
        let coded = dibits_to_bits(body);
        let decoded = viterbi_decode(&coded, M17_CONSTRAINT, M17_POLYS, None);
        if decoded.len() < 128 {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 128,
            }];
        }
        let bits = &decoded[..128];
        let crc = crc16_ccitt(&bits[..112]);
        if crc != bits_to_u32(&bits[112..128]) {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: 16,
            }];
        }

        let dst = decode_callsign(&bits[0..48]);
        let src = decode_callsign(&bits[48..96]);
        let frame_type = bits_to_u32(&bits[96..112]) as u16;
        self.src_callsign = src.clone();

        let mut events = vec![
            BurstEvent::CallInfo { slot: 0, tg: 0, src: 0 },
            BurstEvent::TalkerAlias {
                slot: 0,
                alias: format!("{} > {}", src, dst),
            },
        ];
        // Type field bits 3-4: encryption subtype.
        let enc = (frame_type >> 3) & 0x3;
        if enc != 0 {
            events.push(BurstEvent::Crypto {
                slot: 0,
                algid: 0xA0 | enc as u8,
                key_id: 0,
                mi: [0; 9],
            });
        }
        events
    }

    fn decode_stream(&mut self, body: &[Dibit], vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        let bits = dibits_to_bits(body);
        if bits.len() < 64 + 128 {
            return Vec::new();
        }
        // LICH chunk (48) + frame number (16), then the voice payload.
        let fn_field = bits_to_u32(&bits[48..64]) as u16;
        let payload = &bits[64..192];

        let mut events = Vec::new();
        if fn_field & 0x7FFF == 0 && !self.src_callsign.is_empty() {
            // First stream frame: re-announce the caller from the LSF.
            events.push(BurstEvent::TalkerAlias {
                slot: 0,
                alias: self.src_callsign.clone(),
            });
        }
        let mut frames = Vec::with_capacity(2);
        for half in payload.chunks(64) {
            frames.push(vocoder.decode(CodewordKind::Codec2, half));
        }
        events.push(BurstEvent::Voice { slot: 0, frames });

        if fn_field & 0x8000 != 0 {
            // End-of-stream flag on the frame counter.
            events.push(BurstEvent::EndOfCall { slot: 0 });
        }
        events
    }

    fn decode_packet(&mut self, body: &[Dibit]) -> Vec<BurstEvent> {
        let coded = dibits_to_bits(body);
        let decoded = viterbi_decode(&coded, M17_CONSTRAINT, M17_POLYS, None);
        let bytes: Vec<u8> = decoded
            .chunks(8)
            .take(25)
            .map(|c| bits_to_u32(c) as u8)
            .collect();
        vec![BurstEvent::Data { slot: 0, bytes }]
    }
}

impl BurstDecoder for M17Decoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, M17_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        match input.sync.kind {
            FrameKind::Preamble => {
                // Preamble: learn the polarity, latch it.
                self.latched = Some(input.sync.polarity);
                Vec::new()
            }
            FrameKind::Lsf => {
                let body = self.corrected(input);
                self.decode_lsf(&body)
            }
            FrameKind::Stream => {
                let body = self.corrected(input);
                self.decode_stream(&body, vocoder)
            }
            FrameKind::Packet => {
                let body = self.corrected(input);
                self.decode_packet(&body)
            }
            _ => Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.src_callsign.clear();
        // The polarity latch survives: it reflects the RF path, not the
        // call.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::conv_encode;
    use crate::sync::{Protocol, SyncKind};
    use crate::vocoder::SilenceVocoder;

    fn u32_bits(value: u32, width: usize) -> Vec<u8> {
        (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    fn bits_to_dibits(bits: &[u8]) -> Vec<Dibit> {
        bits.chunks(2)
            .map(|p| (p[0] << 1) | p.get(1).copied().unwrap_or(0))
            .collect()
    }

    fn encode_callsign(callsign: &str) -> Vec<u8> {
        let mut value = 0u64;
        for &b in callsign.as_bytes().iter().rev() {
            let idx = CALLSIGN_CHARS.iter().position(|&c| c == b).unwrap() as u64;
            value = value * 40 + idx;
        }
        (0..48).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    fn input(kind: FrameKind, polarity: Polarity, post: &[Dibit]) -> DecodeInput<'_> {
        DecodeInput {
            sync: SyncKind {
                protocol: Protocol::M17,
                polarity,
                kind,
            },
            pre: &[],
            center: &[],
            post,
            post_reliability: &[],
            follow_on: false,
            now_m: 0.0,
        }
    }

    fn lsf_dibits(dst: &str, src: &str, frame_type: u16) -> Vec<Dibit> {
        let mut bits = encode_callsign(dst);
        bits.extend(encode_callsign(src));
        bits.extend(u32_bits(frame_type as u32, 16));
        let crc = crc16_ccitt(&bits);
        bits.extend(u32_bits(crc, 16));
        let coded = conv_encode(&bits, M17_CONSTRAINT, M17_POLYS);
        let mut dibits = bits_to_dibits(&coded);
        dibits.resize(M17_POST_DIBITS, 0);
        dibits
    }

    #[test]
    fn callsign_roundtrip() {
        for cs in ["W2ABC", "N0CALL", "SP5XYZ/P"] {
            let bits = encode_callsign(cs);
            assert_eq!(decode_callsign(&bits), *cs, "callsign {}", cs);
        }
    }

    #[test]
    fn lsf_parses_callsigns_and_crc() {
        let mut decoder = M17Decoder::new();
        let mut vocoder = SilenceVocoder;
        let dibits = lsf_dibits("W2ABC", "N0CALL", 0);
        let events = decoder.decode(&input(FrameKind::Lsf, Polarity::Normal, &dibits), &mut vocoder);
        match events
            .iter()
            .find(|e| matches!(e, BurstEvent::TalkerAlias { .. }))
        {
            Some(BurstEvent::TalkerAlias { alias, .. }) => {
                assert_eq!(alias, "N0CALL > W2ABC");
            }
            _ => panic!("no alias event: {:?}", events),
        }
        assert!(!events.iter().any(|e| matches!(e, BurstEvent::Crypto { .. })));
    }

    #[test]
    fn encrypted_lsf_reports_crypto() {
        let mut decoder = M17Decoder::new();
        let mut vocoder = SilenceVocoder;
        // Encryption subtype 2 in bits 3-4 of the type field.
        let dibits = lsf_dibits("W2ABC", "N0CALL", 2 << 3);
        let events = decoder.decode(&input(FrameKind::Lsf, Polarity::Normal, &dibits), &mut vocoder);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::Crypto { algid: 0xA2, .. })));
    }

    #[test]
    fn preamble_latches_polarity_for_inverted_stream() {
        let mut decoder = M17Decoder::new();
        let mut vocoder = SilenceVocoder;

        // Inverted preamble latches inverted polarity.
        decoder.decode(&input(FrameKind::Preamble, Polarity::Inverted, &[]), &mut vocoder);
        assert_eq!(decoder.latched_polarity(), Some(Polarity::Inverted));

        // An inverted LSF now decodes even though its sync was read as
        // normal polarity (the latch wins).
        let normal = lsf_dibits("W2ABC", "N0CALL", 0);
        let inverted = invert_dibits(&normal);
        let events = decoder.decode(&input(FrameKind::Lsf, Polarity::Normal, &inverted), &mut vocoder);
        assert!(events
            .iter()
            .any(|e| matches!(e, BurstEvent::TalkerAlias { .. })));

        // A contrary preamble re-latches.
        decoder.decode(&input(FrameKind::Preamble, Polarity::Normal, &[]), &mut vocoder);
        assert_eq!(decoder.latched_polarity(), Some(Polarity::Normal));
    }

    #[test]
    fn stream_frame_decodes_two_voice_frames() {
        let mut decoder = M17Decoder::new();
        let mut vocoder = SilenceVocoder;
        let mut bits = vec![0u8; 48]; // LICH chunk
        bits.extend(u32_bits(5, 16)); // frame number, not last
        bits.extend(vec![1u8; 128]); // payload
        let mut dibits = bits_to_dibits(&bits);
        dibits.resize(M17_POST_DIBITS, 0);

        let events = decoder.decode(&input(FrameKind::Stream, Polarity::Normal, &dibits), &mut vocoder);
        match &events[0] {
            BurstEvent::Voice { frames, .. } => assert_eq!(frames.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!events.iter().any(|e| matches!(e, BurstEvent::EndOfCall { .. })));
    }

    #[test]
    fn last_stream_frame_ends_call() {
        let mut decoder = M17Decoder::new();
        let mut vocoder = SilenceVocoder;
        let mut bits = vec![0u8; 48];
        bits.extend(u32_bits(0x8000 | 42, 16)); // end-of-stream flag
        bits.extend(vec![0u8; 128]);
        let mut dibits = bits_to_dibits(&bits);
        dibits.resize(M17_POST_DIBITS, 0);

        let events = decoder.decode(&input(FrameKind::Stream, Polarity::Normal, &dibits), &mut vocoder);
        assert!(events.iter().any(|e| matches!(e, BurstEvent::EndOfCall { .. })));
    }
}
