//! P25 trunking state machine.
//!
//! Follows a trunked system between its control channel and granted voice
//! channels: hunt for a CC, lock it, tune to voice grants that pass policy,
//! gate per-slot audio on MAC activity, and release back to the CC after
//! hangtime. The machine owns its state exclusively; the demod thread
//! posts events into it and everything else reads UI snapshots.
//!
//! Time is a monotonic `f64` seconds value supplied by the caller, so the
//! once-per-second `tick` can be driven directly by tests.

use crossbeam::channel::Sender;

use crate::config::TrunkConfig;
use crate::events::{Event, EventBus, LockoutReason};
use crate::sync::{Protocol, SyncKind};
use crate::tables::{GroupMode, SharedGroups};

/// Commands posted to the sample source / demod front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerCommand {
    Tune { freq_hz: u32 },
    SetModBandwidth { khz: u16 },
    /// Restore a symbol rate after leaving a VC of a different class.
    SetSymbolRate { sps: u32 },
}

/// Trunking states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkPhase {
    /// Searching candidate frequencies for a control channel.
    CcHunt,
    /// Camped on the control channel, parsing grants.
    CcLocked,
    /// Tuned to a granted voice channel.
    VcTuned,
    /// Hangtime elapsed but a slot is still winding down.
    Hang,
}

/// Number of IDEN band-plan entries.
pub const IDEN_TABLE_SIZE: usize = 16;

/// One IDEN band-plan entry. `trust` is 0 (unseen), 1 (heard) or 2
/// (confirmed for the current site); promotions are monotonic except on
/// identity rotation, which resets the whole table.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdenEntry {
    pub present: bool,
    pub wacn: u32,
    pub sysid: u16,
    pub rfss: u8,
    pub site: u8,
    pub trust: u8,
    /// Base frequency in Hz.
    pub base_freq_hz: u32,
    /// Channel spacing in Hz.
    pub spacing_hz: u32,
    /// TDMA slots per channel (1 = FDMA).
    pub slots_per_channel: u8,
}

/// Service bits carried on a grant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvcBits {
    pub emergency: bool,
    pub encrypted: bool,
    pub data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    Group,
    Private,
}

/// A voice- or data-channel grant parsed from a control PDU.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    pub kind: GrantKind,
    pub tg: u32,
    pub src: u32,
    /// Channel number (IDEN in the top nibble) when no explicit frequency
    /// is carried.
    pub channel: u16,
    /// Explicit frequency, overriding the channel lookup.
    pub freq_hz: Option<u32>,
    pub svc: SvcBits,
    pub algid: u8,
}

/// The mutable trunking state, owned exclusively by [`TrunkMachine`].
#[derive(Debug, Clone)]
pub struct TrunkState {
    pub phase: TrunkPhase,

    pub cc_freq: u32,
    pub is_tuned: bool,
    pub vc_freq: [u32; 2],
    /// -1 none, 0/1 while a TDMA slot is active.
    pub active_slot: i8,

    pub audio_allowed: [bool; 2],
    pub last_mac_active_m: [f64; 2],
    pub audio_ring_count: [u8; 2],
    last_ring_time_m: [f64; 2],

    pub last_vc_sync_time_m: f64,
    pub last_cc_sync_time_m: f64,
    pub last_vc_tune_time_m: f64,

    /// Current talkgroup per slot, for events and the mixer gate.
    pub slot_tg: [u32; 2],
    pub slot_src: [u32; 2],

    pub cc_candidates: Vec<u32>,
    cc_candidate_next: usize,
    pub neighbors: Vec<u32>,
    pub lcn_freqs: Vec<u32>,
    lcn_next: usize,

    pub wacn: u32,
    pub sysid: u16,
    pub rfssid: u8,
    pub siteid: u8,
    pub iden_table: [IdenEntry; IDEN_TABLE_SIZE],

    /// Symbol rates for the CC and the currently tuned VC.
    pub cc_sps: u32,
    pub vc_sps: u32,
}

impl Default for TrunkState {
    fn default() -> Self {
        Self {
            phase: TrunkPhase::CcHunt,
            cc_freq: 0,
            is_tuned: false,
            vc_freq: [0; 2],
            active_slot: -1,
            audio_allowed: [false; 2],
            last_mac_active_m: [0.0; 2],
            audio_ring_count: [0; 2],
            last_ring_time_m: [0.0; 2],
            last_vc_sync_time_m: 0.0,
            last_cc_sync_time_m: 0.0,
            last_vc_tune_time_m: 0.0,
            slot_tg: [0; 2],
            slot_src: [0; 2],
            cc_candidates: Vec::new(),
            cc_candidate_next: 0,
            neighbors: Vec::new(),
            lcn_freqs: Vec::new(),
            lcn_next: 0,
            wacn: 0,
            sysid: 0,
            rfssid: 0,
            siteid: 0,
            iden_table: [IdenEntry::default(); IDEN_TABLE_SIZE],
            cc_sps: 10,
            vc_sps: 10,
        }
    }
}

pub struct TrunkMachine {
    pub config: TrunkConfig,
    state: TrunkState,
    tuner: Sender<TunerCommand>,
    groups: SharedGroups,
}

impl TrunkMachine {
    pub fn new(config: TrunkConfig, tuner: Sender<TunerCommand>, groups: SharedGroups) -> Self {
        Self {
            config,
            state: TrunkState::default(),
            tuner,
            groups,
        }
    }

    pub fn state(&self) -> &TrunkState {
        &self.state
    }

    /// Direct state access for scenario setup and snapshot publishing.
    pub fn state_mut(&mut self) -> &mut TrunkState {
        &mut self.state
    }

    fn send(&self, command: TunerCommand) {
        // Fire-and-forget: a full or disconnected queue is the source's
        // problem to report, not ours to block on.
        let _ = self.tuner.send(command);
    }

    // -- sync observations ---------------------------------------------

    /// Control-channel sync seen. Locks the CC when the sync is a P25
    /// flavor and the site identity is known; EDACS control channels
    /// carry no WACN/SYSID and lock on sync alone.
    pub fn on_cc_sync(&mut self, kind: SyncKind, freq_hz: u32, now_m: f64) {
        let edacs = kind.protocol == Protocol::Edacs;
        if !edacs && !matches!(kind.protocol, Protocol::P25p1 | Protocol::P25p2) {
            return;
        }
        self.state.last_cc_sync_time_m = now_m;
        if self.state.phase == TrunkPhase::CcHunt
            && freq_hz != 0
            && (edacs || self.identity_known())
        {
            self.state.cc_freq = freq_hz;
            self.state.phase = TrunkPhase::CcLocked;
        }
    }

    /// Voice-channel sync seen while tuned.
    pub fn on_vc_sync(&mut self, now_m: f64) {
        if self.state.is_tuned && now_m > self.state.last_vc_sync_time_m {
            self.state.last_vc_sync_time_m = now_m;
        }
    }

    fn identity_known(&self) -> bool {
        self.state.wacn != 0 && self.state.sysid != 0
    }

    /// Record the network identity. A WACN/SYSID rotation invalidates
    /// every IDEN trust level.
    pub fn set_identity(&mut self, wacn: u32, sysid: u16, rfssid: u8, siteid: u8) {
        let rotated =
            (self.state.wacn != 0 && self.state.wacn != wacn)
                || (self.state.sysid != 0 && self.state.sysid != sysid);
        self.state.wacn = wacn;
        self.state.sysid = sysid;
        self.state.rfssid = rfssid;
        self.state.siteid = siteid;
        if rotated {
            for entry in self.state.iden_table.iter_mut() {
                entry.trust = 0;
            }
        }
    }

    // -- IDEN band plan -------------------------------------------------

    /// Store an IDEN_UP band-plan entry at trust 1, tagged with the
    /// current identity. Existing trust is never lowered.
    pub fn on_iden_up(
        &mut self,
        iden: u8,
        base_freq_hz: u32,
        spacing_hz: u32,
        slots_per_channel: u8,
    ) {
        let Some(entry) = self.state.iden_table.get_mut(iden as usize) else {
            return;
        };
        entry.present = true;
        entry.wacn = self.state.wacn;
        entry.sysid = self.state.sysid;
        entry.rfss = self.state.rfssid;
        entry.site = self.state.siteid;
        entry.base_freq_hz = base_freq_hz;
        entry.spacing_hz = spacing_hz;
        entry.slots_per_channel = slots_per_channel.max(1);
        entry.trust = entry.trust.max(1);
    }

    /// Promote IDEN entries whose recorded identity matches the current
    /// site to trust 2. An entry that also recorded an RFSS/site pair must
    /// match it; mismatches are left untouched. Trust never decreases.
    pub fn confirm_idens_for_current_site(&mut self) {
        let (wacn, sysid) = (self.state.wacn, self.state.sysid);
        let (rfss, site) = (self.state.rfssid, self.state.siteid);
        for entry in self.state.iden_table.iter_mut() {
            if !entry.present {
                continue;
            }
            if entry.wacn != wacn || entry.sysid != sysid {
                continue;
            }
            let site_recorded = entry.rfss != 0 || entry.site != 0;
            if site_recorded && (entry.rfss != rfss || entry.site != site) {
                continue;
            }
            entry.trust = entry.trust.max(2);
        }
    }

    /// Resolve a channel number through the IDEN table. The top nibble
    /// selects the IDEN, the rest is the channel within the band plan;
    /// TDMA band plans fold the slot bit out of the channel number.
    pub fn channel_to_freq(&self, channel: u16) -> Option<(u32, u8)> {
        let iden = (channel >> 12) as usize;
        let number = (channel & 0x0FFF) as u32;
        let entry = &self.state.iden_table[iden];
        if !entry.present || entry.trust == 0 {
            return None;
        }
        let slots = entry.slots_per_channel.max(1) as u32;
        let (step, slot) = if slots > 1 {
            (number / slots, (number % slots) as u8)
        } else {
            (number, 0)
        };
        let freq = entry.base_freq_hz.checked_add(step.checked_mul(entry.spacing_hz)?)?;
        Some((freq, slot))
    }

    // -- CC candidates and neighbors ------------------------------------

    /// Merge neighbor frequencies into the bounded duplicate-free
    /// candidate list.
    pub fn on_neighbor_update(&mut self, freqs: &[u32]) {
        for &f in freqs {
            if f == 0 {
                continue;
            }
            if !self.state.neighbors.contains(&f) {
                self.state.neighbors.push(f);
            }
            if !self.state.cc_candidates.contains(&f)
                && self.state.cc_candidates.len() < self.config.max_cc_candidates
            {
                self.state.cc_candidates.push(f);
            }
        }
    }

    /// Next CC to try, round-robin; falls back to the LCN list.
    pub fn next_cc_candidate(&mut self) -> Option<u32> {
        if !self.state.cc_candidates.is_empty() {
            let idx = self.state.cc_candidate_next % self.state.cc_candidates.len();
            self.state.cc_candidate_next = self.state.cc_candidate_next.wrapping_add(1);
            return Some(self.state.cc_candidates[idx]);
        }
        if !self.state.lcn_freqs.is_empty() {
            let idx = self.state.lcn_next % self.state.lcn_freqs.len();
            self.state.lcn_next = self.state.lcn_next.wrapping_add(1);
            return Some(self.state.lcn_freqs[idx]);
        }
        None
    }

    pub fn set_lcn_freqs(&mut self, freqs: Vec<u32>) {
        self.state.lcn_freqs = freqs;
    }

    // -- grants ----------------------------------------------------------

    /// Apply grant policy; tune when it passes.
    pub fn on_grant(&mut self, grant: &Grant, now_m: f64, bus: &mut EventBus) {
        if self.state.phase != TrunkPhase::CcLocked && self.state.phase != TrunkPhase::Hang {
            return;
        }

        if let Some(reason) = self.rejection_reason(grant) {
            if reason == LockoutReason::Encrypted {
                // Remember the rejection so the talkgroup is skipped
                // until explicitly cleared.
                self.groups.update(|g| g.mark_encrypted(grant.tg, grant.algid));
            }
            bus.publish(
                None,
                Event::Lockout {
                    tg: grant.tg,
                    reason,
                },
            );
            return;
        }

        let (freq, slot) = match grant.freq_hz {
            Some(f) => (f, 0),
            None => match self.channel_to_freq(grant.channel) {
                Some(resolved) => resolved,
                None => return, // untrusted IDEN, wait for the band plan
            },
        };

        self.send(TunerCommand::Tune { freq_hz: freq });

        let vc_sps = self.vc_sps_for_channel(grant.channel);
        if vc_sps != self.state.cc_sps {
            self.send(TunerCommand::SetSymbolRate { sps: vc_sps });
        }
        self.state.vc_sps = vc_sps;

        self.state.is_tuned = true;
        self.state.phase = TrunkPhase::VcTuned;
        self.state.vc_freq[slot as usize] = freq;
        self.state.active_slot = slot as i8;
        self.state.slot_tg[slot as usize] = grant.tg;
        self.state.slot_src[slot as usize] = grant.src;
        self.state.last_vc_tune_time_m = now_m;
        self.state.last_vc_sync_time_m = now_m;

        // A fresh tune starts with idle slots; MAC activity opens them.
        self.state.audio_allowed = [false; 2];
        self.state.audio_ring_count = [0; 2];
        self.state.last_mac_active_m = [0.0; 2];

        bus.publish(
            Some(slot),
            Event::Tuned {
                freq,
                tg: grant.tg,
            },
        );
    }

    fn rejection_reason(&self, grant: &Grant) -> Option<LockoutReason> {
        let groups = self.groups.load();

        match groups.lookup(grant.tg) {
            Some(entry) if entry.mode == GroupMode::Block => {
                return Some(LockoutReason::BlockList);
            }
            Some(entry) if entry.mode == GroupMode::DigitalEncrypted => {
                // Previously rejected encrypted talkgroup.
                if !self.config.tune_enc_calls {
                    return Some(LockoutReason::Encrypted);
                }
            }
            Some(_) => {}
            None => {
                if self.config.use_allow_list {
                    return Some(LockoutReason::NotInAllowList);
                }
            }
        }

        match grant.kind {
            GrantKind::Private if !self.config.tune_private_calls => {
                return Some(LockoutReason::PrivateCall);
            }
            GrantKind::Group if !self.config.tune_group_calls => {
                return Some(LockoutReason::GroupCall);
            }
            _ => {}
        }

        if grant.svc.data && !self.config.tune_data_calls {
            return Some(LockoutReason::DataCall);
        }

        if (grant.svc.encrypted || !crate::mixer::algid_is_clear(grant.algid))
            && !self.config.tune_enc_calls
        {
            return Some(LockoutReason::Encrypted);
        }

        if self.config.tg_hold != 0 && grant.tg != self.config.tg_hold {
            return Some(LockoutReason::TgHold);
        }

        None
    }

    fn vc_sps_for_channel(&self, channel: u16) -> u32 {
        let iden = (channel >> 12) as usize;
        let entry = &self.state.iden_table[iden];
        if entry.present && entry.slots_per_channel > 1 {
            8 // Phase 2 TDMA at 6000 symbols/s
        } else {
            self.state.cc_sps
        }
    }

    // -- per-slot activity ----------------------------------------------

    /// MAC_ACTIVE / PTT on a slot: open its gate.
    pub fn on_mac_active(&mut self, slot: u8, tg: u32, src: u32, now_m: f64, bus: &mut EventBus) {
        if !self.state.is_tuned {
            return;
        }
        let s = (slot & 1) as usize;
        let starting = !self.state.audio_allowed[s];
        self.state.audio_allowed[s] = true;
        self.state.last_mac_active_m[s] = now_m;
        self.state.active_slot = s as i8;
        if tg != 0 {
            self.state.slot_tg[s] = tg;
        }
        if src != 0 {
            self.state.slot_src[s] = src;
        }
        if starting {
            bus.publish(
                Some(s as u8),
                Event::CallStart {
                    tg: self.state.slot_tg[s],
                    src: self.state.slot_src[s],
                },
            );
        }
    }

    /// MAC_END_PTT / terminator on a slot: revoke its gate.
    pub fn on_mac_end(&mut self, slot: u8, bus: &mut EventBus) {
        let s = (slot & 1) as usize;
        if self.state.audio_allowed[s] {
            self.state.audio_allowed[s] = false;
            bus.publish(
                Some(s as u8),
                Event::CallEnd {
                    tg: self.state.slot_tg[s],
                },
            );
        }
    }

    /// Mirror of the jitter-ring occupancy, fed before each tick.
    pub fn set_ring_count(&mut self, slot: u8, count: u8, now_m: f64) {
        let s = (slot & 1) as usize;
        self.state.audio_ring_count[s] = count;
        if count > 0 {
            self.state.last_ring_time_m[s] = now_m;
        }
    }

    // -- release ---------------------------------------------------------

    fn slot_idle(&self, slot: usize, now_m: f64, hangtime_elapsed: bool) -> bool {
        let s = &self.state;
        if s.audio_allowed[slot] {
            return false;
        }
        // Buffered audio keeps the slot busy inside ring_hold, but ring
        // occupancy is disregarded once hangtime has elapsed.
        if !hangtime_elapsed
            && s.audio_ring_count[slot] > 0
            && now_m - s.last_ring_time_m[slot] < self.config.ring_hold_secs
        {
            return false;
        }
        if s.last_mac_active_m[slot] > 0.0
            && now_m - s.last_mac_active_m[slot] < self.config.mac_hold_secs
        {
            return false;
        }
        true
    }

    /// Periodic housekeeping; runs at least once per second even when no
    /// frames arrive, so a dead signal still releases the VC.
    pub fn tick(&mut self, now_m: f64, bus: &mut EventBus) {
        if self.state.cc_freq == 0 && self.state.phase != TrunkPhase::CcHunt {
            self.state.phase = TrunkPhase::CcHunt;
            self.state.is_tuned = false;
            return;
        }
        if !self.state.is_tuned {
            return;
        }

        let hangtime_elapsed =
            now_m - self.state.last_vc_sync_time_m >= self.config.hangtime_secs;
        let grace_elapsed =
            now_m - self.state.last_vc_tune_time_m >= self.config.vc_grace_secs;
        let slots_idle = self.slot_idle(0, now_m, hangtime_elapsed)
            && self.slot_idle(1, now_m, hangtime_elapsed);

        if hangtime_elapsed && !(grace_elapsed && slots_idle) {
            self.state.phase = TrunkPhase::Hang;
            return;
        }
        if !(hangtime_elapsed && grace_elapsed && slots_idle) {
            return;
        }

        self.release_to_cc(bus);
    }

    fn release_to_cc(&mut self, bus: &mut EventBus) {
        self.send(TunerCommand::Tune {
            freq_hz: self.state.cc_freq,
        });
        if self.state.vc_sps != self.state.cc_sps {
            self.send(TunerCommand::SetSymbolRate {
                sps: self.state.cc_sps,
            });
            self.state.vc_sps = self.state.cc_sps;
        }
        self.state.is_tuned = false;
        self.state.phase = TrunkPhase::CcLocked;
        self.state.active_slot = -1;
        self.state.audio_allowed = [false; 2];
        self.state.slot_tg = [0; 2];
        self.state.slot_src = [0; 2];
        bus.publish(
            None,
            Event::ReturnToCc {
                cc_freq: self.state.cc_freq,
            },
        );
    }

    /// Lost-sync hook from the hunter. Tuned: force the hangtime logic at
    /// the next tick. Hunting: rotate to the next CC candidate.
    pub fn no_carrier(&mut self, now_m: f64, bus: &mut EventBus) {
        if self.state.is_tuned {
            // Leave release to tick(); a VC can be momentarily quiet.
            let _ = now_m;
            return;
        }
        if self.state.phase == TrunkPhase::CcLocked {
            // The CC itself died; go hunting again.
            self.state.phase = TrunkPhase::CcHunt;
        }
        if let Some(freq) = self.next_cc_candidate() {
            self.send(TunerCommand::Tune { freq_hz: freq });
            bus.publish(None, Event::NoCarrier);
        }
    }

    /// Transport stall: abandon everything and return to CC hunt.
    pub fn on_source_stalled(&mut self, bus: &mut EventBus) {
        self.state.is_tuned = false;
        self.state.phase = TrunkPhase::CcHunt;
        self.state.audio_allowed = [false; 2];
        if self.state.cc_freq != 0 {
            self.send(TunerCommand::Tune {
                freq_hz: self.state.cc_freq,
            });
        }
        bus.publish(None, Event::SourceStalled);
    }

    /// User lockout of the active call: immediate release.
    pub fn on_user_lockout(&mut self, bus: &mut EventBus) {
        if self.state.is_tuned {
            self.release_to_cc(bus);
        }
        self.state.phase = TrunkPhase::CcHunt;
    }
}
