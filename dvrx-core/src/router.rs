//! Frame routing: sync matches in, protocol burst events out.
//!
//! The router owns one decoder per protocol family and turns the hunter's
//! sync matches into sync-aligned dibit slices. Decoders are cooperative:
//! a burst is dispatched once its dibits have arrived, a newer sync match
//! preempts a half-collected burst (the decoder sees the short body and
//! bails), and a decoder may schedule continuation bursts that follow
//! without their own sync (DMR voice superframes).
//!
//! Inverted-polarity bursts are sign-corrected here before the decoders
//! see them. M17 is the exception: its decoder owns a polarity latch
//! learned from preambles, so it receives the dibits raw.

use crate::dibit::{Dibit, DibitBuffer};
use crate::protocols::{
    dmr::DmrDecoder, dpmr::DpmrDecoder, dstar::DstarDecoder, edacs::EdacsDecoder,
    m17::M17Decoder, nxdn::NxdnDecoder, p25p1::P25p1Decoder, p25p2::P25p2Decoder,
    provoice::ProVoiceDecoder,
};
use crate::protocols::{invert_dibits, BurstDecoder, BurstEvent, BurstLayout, DecodeInput};
use crate::sync::{Polarity, Protocol, SyncKind, SyncMatch};
use crate::vocoder::Vocoder;

/// A burst being collected.
#[derive(Debug, Clone)]
struct Pending {
    kind: SyncKind,
    pre_start: usize,
    center_start: usize,
    post_start: usize,
    post_needed: usize,
    follow_on: bool,
    /// Buffer generation; a wrap invalidates the indices.
    wrap_count: u64,
}

pub struct FrameRouter {
    p25p1: P25p1Decoder,
    p25p2: P25p2Decoder,
    dmr: DmrDecoder,
    nxdn: NxdnDecoder,
    dpmr: DpmrDecoder,
    ysf: crate::protocols::ysf::YsfDecoder,
    dstar: DstarDecoder,
    m17: M17Decoder,
    provoice: ProVoiceDecoder,
    edacs: EdacsDecoder,
    pending: Option<Pending>,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self {
            p25p1: P25p1Decoder::new(),
            p25p2: P25p2Decoder::new(),
            dmr: DmrDecoder::new(),
            nxdn: NxdnDecoder::new(),
            dpmr: DpmrDecoder::new(),
            ysf: crate::protocols::ysf::YsfDecoder::new(),
            dstar: DstarDecoder::new(),
            m17: M17Decoder::new(),
            provoice: ProVoiceDecoder::new(),
            edacs: EdacsDecoder::new(),
            pending: None,
        }
    }

    fn decoder_for(&mut self, protocol: Protocol) -> &mut dyn BurstDecoder {
        match protocol {
            Protocol::P25p1 => &mut self.p25p1,
            Protocol::P25p2 => &mut self.p25p2,
            // X2-TDMA shares the DMR burst structure and slot scheme.
            Protocol::Dmr | Protocol::X2Tdma => &mut self.dmr,
            Protocol::Nxdn => &mut self.nxdn,
            Protocol::Dpmr => &mut self.dpmr,
            Protocol::Ysf => &mut self.ysf,
            Protocol::Dstar => &mut self.dstar,
            Protocol::M17 => &mut self.m17,
            Protocol::ProVoice => &mut self.provoice,
            Protocol::Edacs => &mut self.edacs,
        }
    }

    /// A sync match: finish any half-collected burst, start collecting
    /// this one.
    pub fn on_sync(
        &mut self,
        m: &SyncMatch,
        buffer: &DibitBuffer,
        vocoder: &mut dyn Vocoder,
        now_m: f64,
    ) -> Vec<BurstEvent> {
        let mut events = Vec::new();
        if self.pending.is_some() {
            events.extend(self.dispatch(buffer, vocoder, now_m, true));
        }

        let layout = self.decoder_for(m.kind.protocol).layout();
        let sync_start = buffer.position().saturating_sub(m.pattern_len);
        self.pending = Some(Pending {
            kind: m.kind,
            pre_start: sync_start.saturating_sub(layout.pre),
            center_start: sync_start,
            post_start: buffer.position(),
            post_needed: layout.post,
            follow_on: false,
            wrap_count: buffer.wrap_count(),
        });
        events
    }

    /// Called after every pushed dibit: dispatch the pending burst when
    /// its body is complete.
    pub fn poll(
        &mut self,
        buffer: &DibitBuffer,
        vocoder: &mut dyn Vocoder,
        now_m: f64,
    ) -> Vec<BurstEvent> {
        let Some(pending) = self.pending.as_ref() else {
            return Vec::new();
        };
        if pending.wrap_count != buffer.wrap_count() {
            // The rolling buffer wrapped mid-collection: positions are
            // stale, drop the burst and re-anchor on the next sync.
            self.pending = None;
            return Vec::new();
        }
        if buffer.position() < pending.post_start + pending.post_needed {
            return Vec::new();
        }
        self.dispatch(buffer, vocoder, now_m, false)
    }

    fn dispatch(
        &mut self,
        buffer: &DibitBuffer,
        vocoder: &mut dyn Vocoder,
        now_m: f64,
        truncated: bool,
    ) -> Vec<BurstEvent> {
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };
        if pending.wrap_count != buffer.wrap_count() {
            return Vec::new();
        }

        let pre_len = pending.center_start - pending.pre_start;
        let center_len = pending.post_start - pending.center_start;
        let post_len = if truncated {
            buffer.position() - pending.post_start
        } else {
            pending.post_needed
        };

        let pre = buffer.slice(pending.pre_start, pre_len).unwrap_or(&[]);
        let center = buffer.slice(pending.center_start, center_len).unwrap_or(&[]);
        let post = buffer.slice(pending.post_start, post_len).unwrap_or(&[]);
        let reliability = buffer
            .reliability_slice(pending.post_start, post_len)
            .unwrap_or(&[]);

        // Sign-correct inverted bursts, except M17 (latch in the decoder).
        let flip = pending.kind.polarity == Polarity::Inverted
            && pending.kind.protocol != Protocol::M17;
        let (pre_v, center_v, post_v);
        let (pre, center, post): (&[Dibit], &[Dibit], &[Dibit]) = if flip {
            pre_v = invert_dibits(pre);
            center_v = invert_dibits(center);
            post_v = invert_dibits(post);
            (&pre_v, &center_v, &post_v)
        } else {
            (pre, center, post)
        };

        let input = DecodeInput {
            sync: pending.kind,
            pre,
            center,
            post,
            post_reliability: reliability,
            follow_on: pending.follow_on,
            now_m,
        };
        let decoder = self.decoder_for(pending.kind.protocol);
        let events = decoder.decode(&input, vocoder);

        // The decoder may chain a continuation burst right behind this
        // one (only when this burst ran to completion).
        if !truncated {
            if let Some(layout) = self.decoder_for(pending.kind.protocol).continuation() {
                self.schedule_continuation(pending.kind, layout, buffer);
            }
        }
        events
    }

    fn schedule_continuation(
        &mut self,
        kind: SyncKind,
        layout: BurstLayout,
        buffer: &DibitBuffer,
    ) {
        let pre_start = buffer.position();
        self.pending = Some(Pending {
            kind,
            pre_start,
            center_start: pre_start + layout.pre,
            post_start: pre_start + layout.pre + layout.center,
            post_needed: layout.post,
            follow_on: true,
            wrap_count: buffer.wrap_count(),
        });
    }

    /// Per-call reset fan-out (trunking release, retune).
    pub fn reset(&mut self) {
        self.pending = None;
        self.p25p1.reset();
        self.p25p2.reset();
        self.dmr.reset();
        self.nxdn.reset();
        self.dpmr.reset();
        self.ysf.reset();
        self.dstar.reset();
        self.m17.reset();
        self.provoice.reset();
        self.edacs.reset();
    }
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::new()
    }
}
