//! ProVoice: EDACS digital voice carrying IMBE codewords.
//!
//! The short 16-dibit sync variant only matches with the family gate
//! already on ProVoice; both variants introduce a run of IMBE codewords
//! handed whole to the vocoder.

use crate::dibit::{dibits_to_bits, Dibit};
use crate::sync::FrameKind;
use crate::vocoder::{CodewordKind, Vocoder};

use super::{BurstDecoder, BurstEvent, BurstLayout, DecodeInput};

/// Body after the sync.
pub const PROVOICE_POST_DIBITS: usize = 288;

/// IMBE codeword with embedded FEC.
const IMBE_BITS: usize = 144;
const IMBE_DIBITS: usize = IMBE_BITS / 2;

#[derive(Debug, Default)]
pub struct ProVoiceDecoder;

impl ProVoiceDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl BurstDecoder for ProVoiceDecoder {
    fn layout(&self) -> BurstLayout {
        BurstLayout::new(0, 0, PROVOICE_POST_DIBITS)
    }

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent> {
        // The short sync variant rides mid-stream; both carry voice.
        let codewords = match input.sync.kind {
            FrameKind::Voice => 3,
            FrameKind::Short => 2,
            _ => return Vec::new(),
        };

        let mut frames = Vec::with_capacity(codewords);
        for i in 0..codewords {
            let start = i * IMBE_DIBITS;
            let end = start + IMBE_DIBITS;
            if end > input.post.len() {
                break;
            }
            let bits = dibits_to_bits(&input.post[start..end]);
            frames.push(vocoder.decode(CodewordKind::Imbe, &bits));
        }
        if frames.is_empty() {
            return vec![BurstEvent::DecodeError {
                irrecoverable_bits: (codewords * IMBE_BITS) as u32,
            }];
        }
        vec![BurstEvent::Voice { slot: 0, frames }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Polarity, Protocol, SyncKind};
    use crate::vocoder::SilenceVocoder;

    fn decode(kind: FrameKind, post: &[Dibit]) -> Vec<BurstEvent> {
        let mut decoder = ProVoiceDecoder::new();
        let mut vocoder = SilenceVocoder;
        decoder.decode(
            &DecodeInput {
                sync: SyncKind {
                    protocol: Protocol::ProVoice,
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
    fn full_sync_gives_three_codewords() {
        let post = vec![1u8; PROVOICE_POST_DIBITS];
        let events = decode(FrameKind::Voice, &post);
        match &events[0] {
            BurstEvent::Voice { frames, .. } => assert_eq!(frames.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn short_sync_gives_two_codewords() {
        let post = vec![1u8; PROVOICE_POST_DIBITS];
        let events = decode(FrameKind::Short, &post);
        match &events[0] {
            BurstEvent::Voice { frames, .. } => assert_eq!(frames.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn truncated_body_is_an_error() {
        let post = vec![1u8; 10];
        let events = decode(FrameKind::Voice, &post);
        assert!(matches!(events[0], BurstEvent::DecodeError { .. }));
    }
}
