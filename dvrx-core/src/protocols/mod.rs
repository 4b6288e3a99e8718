//! Protocol decoders: burst-level state machines behind the sync hunter.
//!
//! Each decoder consumes the dibits around one sync match and returns a
//! list of burst events: decoded voice, control PDUs for the trunking
//! machine, embedded signalling, or an error with its irrecoverable-bit
//! count. Decoders never abort the pipeline; a damaged burst is still
//! delivered so the mixer can decide whether to play or mute it.

pub mod dmr;
pub mod dpmr;
pub mod dstar;
pub mod edacs;
pub mod m17;
pub mod nxdn;
pub mod p25p1;
pub mod p25p2;
pub mod provoice;
pub mod ysf;

use crate::dibit::Dibit;
use crate::sync::SyncKind;
use crate::trunk::Grant;
use crate::vocoder::{PcmFrame, Vocoder};

/// Dibits a decoder needs around the sync pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstLayout {
    /// Dibits before the first sync dibit (DMR payload halves wrap the
    /// sync; most protocols carry nothing in front).
    pub pre: usize,
    /// Dibits in the sync position. Ignored for matched bursts (the
    /// pattern length rules); used verbatim for continuation bursts.
    pub center: usize,
    /// Dibits after the last sync dibit.
    pub post: usize,
}

impl BurstLayout {
    pub fn new(pre: usize, center: usize, post: usize) -> Self {
        Self { pre, center, post }
    }

    pub fn total(&self) -> usize {
        self.pre + self.center + self.post
    }
}

/// One sync-aligned burst handed to a decoder. Reliabilities are parallel
/// to `post` and may be empty when the extractor did not track them.
pub struct DecodeInput<'a> {
    pub sync: SyncKind,
    pub pre: &'a [Dibit],
    /// The dibits occupying the sync position. For a matched burst this
    /// is the sync pattern itself; for a follow-on burst (DMR superframe
    /// bursts B–F) it is the EMB region that replaces the sync.
    pub center: &'a [Dibit],
    pub post: &'a [Dibit],
    pub post_reliability: &'a [u8],
    /// True when this burst was scheduled by a continuation rather than a
    /// fresh sync match.
    pub follow_on: bool,
    pub now_m: f64,
}

/// Control-channel observations forwarded to the trunking machine.
#[derive(Debug, Clone)]
pub enum TrunkPdu {
    Grant(Grant),
    IdenUp {
        iden: u8,
        base_freq_hz: u32,
        spacing_hz: u32,
        slots_per_channel: u8,
    },
    NeighborList {
        freqs: Vec<u32>,
    },
    /// Adjacent-site channel; the receiver resolves it through the IDEN
    /// table before merging into the candidate list.
    Adjacent {
        channel: u16,
    },
    NetStatus {
        wacn: u32,
        sysid: u16,
    },
    RfssStatus {
        rfss: u8,
        site: u8,
    },
    MacActive {
        slot: u8,
        tg: u32,
        src: u32,
    },
    MacEnd {
        slot: u8,
    },
    /// EDACS working-channel assignment; the receiver resolves the LCN
    /// through its channel map.
    EdacsAssign {
        lcn: u8,
        group: u16,
    },
}

/// Output of one burst decode.
#[derive(Debug, Clone)]
pub enum BurstEvent {
    /// Decoded voice frames for one slot, already through the vocoder.
    Voice { slot: u8, frames: Vec<PcmFrame> },
    /// Encryption sync observed on a slot.
    Crypto {
        slot: u8,
        algid: u8,
        key_id: u16,
        mi: [u8; 9],
    },
    /// Call metadata observed on a slot.
    CallInfo { slot: u8, tg: u32, src: u32 },
    /// Control PDU for the trunking machine.
    Control(TrunkPdu),
    /// Accumulated talker alias, emitted on the final block.
    TalkerAlias { slot: u8, alias: String },
    /// Decoded user data.
    Data { slot: u8, bytes: Vec<u8> },
    /// End of transmission on a slot.
    EndOfCall { slot: u8 },
    /// FEC/CRC damage; the burst still flowed downstream.
    DecodeError { irrecoverable_bits: u32 },
}

/// A burst-level protocol state machine.
pub trait BurstDecoder: Send {
    fn layout(&self) -> BurstLayout;

    fn decode(&mut self, input: &DecodeInput, vocoder: &mut dyn Vocoder) -> Vec<BurstEvent>;

    /// After a decode, a decoder may ask the router to deliver the
    /// immediately following dibits as another burst without waiting for
    /// a sync match (DMR voice superframes carry sync only in burst A).
    /// The returned layout's `pre + center + post` dibits are collected
    /// starting at the current stream position.
    fn continuation(&mut self) -> Option<BurstLayout> {
        None
    }

    /// Drop per-call state (alias accumulators, polarity latches stay).
    fn reset(&mut self) {}
}

/// Invert a dibit sequence (sign flip of the underlying symbols).
pub fn invert_dibits(dibits: &[Dibit]) -> Vec<Dibit> {
    dibits.iter().map(|&d| d ^ 2).collect()
}
