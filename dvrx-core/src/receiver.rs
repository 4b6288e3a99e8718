//! The receiver: one demod loop wiring source, slicer, hunter, decoders,
//! trunking and the mixer together.
//!
//! The loop is single-threaded and cooperative. Cross-thread state is
//! confined to the [`Runtime`] value: the exit flag, the UI snapshot
//! buffer, the swappable group list and the modulation classifier. There
//! are no global singletons; everything else is owned here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver as ChannelReceiver};
use num_complex::Complex32;

use crate::config::ReceiverConfig;
use crate::dibit::{Dibit, DibitBuffer};
use crate::errors::{Result, RxError, SourceError};
use crate::events::{Event, EventBus, SlotSnapshot, SnapshotBuffer, UiSnapshot};
use crate::filters::RrcFilter;
use crate::jitter::JitterRing;
use crate::logging::{RxLogger, Subsystem};
use crate::mixer::{MixPolicy, Mixer, SlotCrypto, SlotGate, SlotInput};
use crate::modulation::{ModClassifier, Modulation};
use crate::protocols::{BurstEvent, TrunkPdu};
use crate::router::FrameRouter;
use crate::sinks::AudioSink;
use crate::snr::SnrEstimator;
use crate::source::{Retuner, SampleSource};
use crate::sync::{HuntOutcome, Protocol, SyncHunter, SyncKind};
use crate::symbol::{SymbolExtractor, SPS_CYCLE};
use crate::tables::{Keyring, LcnMap, SharedGroups};
use crate::trunk::{Grant, GrantKind, SvcBits, TrunkMachine, TunerCommand};
use crate::vocoder::{PcmFrame, Vocoder};

/// Scale int16 discriminator samples onto the ±3 symbol grid.
const SAMPLE_SCALE: f32 = 3.0 / 16384.0;

/// Samples pulled from the source per loop iteration.
const READ_BLOCK: usize = 960;

/// Frames the mixer accepts per slot per call.
const MAX_FRAMES_PER_MIX: usize = 4;

/// Shared state visible outside the demod thread.
#[derive(Clone)]
pub struct Runtime {
    pub exit: Arc<AtomicBool>,
    pub snapshots: Arc<SnapshotBuffer>,
    pub groups: SharedGroups,
    pub classifier: Arc<ModClassifier>,
}

impl Runtime {
    pub fn new(groups: SharedGroups, classifier: Arc<ModClassifier>) -> Self {
        Self {
            exit: Arc::new(AtomicBool::new(false)),
            snapshots: Arc::new(SnapshotBuffer::new()),
            groups,
            classifier,
        }
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

fn sps_for_symbol_rate(rate: u32) -> u32 {
    SPS_CYCLE
        .iter()
        .find(|(_, r)| *r == rate)
        .map(|(sps, _)| *sps)
        .unwrap_or(10)
}

pub struct Receiver<S: SampleSource> {
    source: Retuner<S>,
    config: ReceiverConfig,
    runtime: Runtime,

    extractor: SymbolExtractor,
    matched_filter: RrcFilter,
    snr: SnrEstimator,
    hunter: SyncHunter,
    buffer: DibitBuffer,
    router: FrameRouter,
    trunk: TrunkMachine,
    tuner_rx: ChannelReceiver<TunerCommand>,
    mixer: Mixer,
    sink: Box<dyn AudioSink>,
    vocoder: Box<dyn Vocoder>,
    bus: EventBus,
    logger: RxLogger,

    jitter: [JitterRing; 2],
    pending_voice: [Vec<PcmFrame>; 2],
    slot_gates: [SlotGate; 2],
    keyring: Keyring,
    keystreams: Vec<crate::config::KeystreamSpec>,
    lcn_map: LcnMap,

    start: Instant,
    last_tick_m: f64,
    dibits_since_window: usize,
    rate_cycle_index: usize,
    last_sync_protocol: Option<Protocol>,
    current_freq_hz: u32,
}

impl<S: SampleSource> Receiver<S> {
    pub fn new(
        source: S,
        config: ReceiverConfig,
        sink: Box<dyn AudioSink>,
        vocoder: Box<dyn Vocoder>,
        groups: SharedGroups,
    ) -> Self {
        let classifier = Arc::new(ModClassifier::new(
            Modulation::C4fm,
            config.modulation_lock,
        ));
        let runtime = Runtime::new(groups.clone(), classifier);

        let (tuner_tx, tuner_rx) = unbounded();
        let trunk = TrunkMachine::new(config.trunk.clone(), tuner_tx, groups);

        let mut hunter = SyncHunter::new(&config.protocols.enabled());
        hunter.set_snr_floor(config.snr_floor_db);

        let mut gates = [SlotGate::default(), SlotGate::default()];
        for (i, gate) in gates.iter_mut().enumerate() {
            gate.enabled = config.audio.slots_enabled[i];
        }

        let mixer = Mixer::new(config.audio.stereo, config.audio.agc, config.audio.use_hpf);

        let mut matched_filter = RrcFilter::new(0.2, 8, 4800);
        matched_filter.init(48_000);

        Self {
            source: Retuner::new(source),
            extractor: SymbolExtractor::new(10),
            matched_filter,
            snr: SnrEstimator::new(),
            hunter,
            buffer: DibitBuffer::new(),
            router: FrameRouter::new(),
            trunk,
            tuner_rx,
            mixer,
            sink,
            vocoder,
            bus: EventBus::new(),
            logger: RxLogger::default(),
            jitter: [JitterRing::new(), JitterRing::new()],
            pending_voice: [Vec::new(), Vec::new()],
            slot_gates: gates,
            keyring: Keyring::default(),
            keystreams: Vec::new(),
            lcn_map: LcnMap::default(),
            start: Instant::now(),
            last_tick_m: 0.0,
            dibits_since_window: 0,
            rate_cycle_index: 0,
            last_sync_protocol: None,
            current_freq_hz: config.initial_freq_hz,
            config,
            runtime,
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn set_keyring(&mut self, keyring: Keyring) {
        self.keyring = keyring;
    }

    /// Static keystreams satisfy the scrambler key slot for the mixer's
    /// encryption gate.
    pub fn set_keystreams(&mut self, keystreams: Vec<crate::config::KeystreamSpec>) {
        self.keystreams = keystreams;
    }

    pub fn set_lcn_map(&mut self, map: LcnMap) {
        self.trunk.set_lcn_freqs(map.frequencies());
        self.lcn_map = map;
    }

    pub fn trunk_mut(&mut self) -> &mut TrunkMachine {
        &mut self.trunk
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Diagnostic log entries (sync hits, rate hunts, key problems); the
    /// CLI drains these between loop iterations.
    pub fn logger_mut(&mut self) -> &mut RxLogger {
        &mut self.logger
    }

    fn now_m(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// IQ taps from an SDR front-end feed the spectral SNR estimate.
    pub fn feed_iq(&mut self, iq: &[Complex32]) {
        if let Some(snr) = self.snr.update(iq) {
            // Credit the estimate to the active slicer's modulation.
            self.runtime
                .classifier
                .set_snr(self.runtime.classifier.current(), snr);
        }
    }

    /// Run until teardown or the exit flag.
    pub fn run(&mut self) -> Result<()> {
        let mut block = vec![0i16; READ_BLOCK];
        loop {
            if self.runtime.exit_requested() {
                break;
            }
            self.drain_tuner_commands();

            let read = match self.source.read(&mut block) {
                Ok(0) => break, // teardown
                Ok(n) => n,
                Err(SourceError::Stalled { .. }) => {
                    self.trunk.on_source_stalled(&mut self.bus);
                    continue;
                }
                Err(e) => return Err(RxError::Source(e)),
            };

            let now = self.now_m();
            for &sample in &block[..read] {
                let filtered = self.matched_filter.update((sample as f32 * SAMPLE_SCALE) as f64);
                self.process_sample(filtered as f32, now);
            }

            self.mix_and_play()?;
            self.maybe_tick(now);
        }

        self.sink.flush().map_err(RxError::Audio)?;
        Ok(())
    }

    /// Service the non-sample machinery when dibits arrive from a capture
    /// file instead of the slicer: tuner commands, mixing, the trunk tick.
    pub fn pump(&mut self) -> Result<()> {
        self.drain_tuner_commands();
        self.mix_and_play()?;
        self.maybe_tick(self.now_m());
        Ok(())
    }

    /// One filtered sample into the slicer; dibits flow onward.
    pub fn process_sample(&mut self, sample: f32, now_m: f64) {
        if let Some(symbol) = self.extractor.push_sample(sample) {
            let modulation = self.runtime.classifier.current();
            let sliced = self.extractor.slice(symbol, modulation);
            self.process_dibit(sliced.dibit, sliced.reliability, now_m);
        }
    }

    /// One dibit through buffer, hunter, router and the trunking hooks.
    pub fn process_dibit(&mut self, dibit: Dibit, reliability: u8, now_m: f64) {
        self.buffer.push(dibit, reliability);
        let snr = self.snr.smoothed_db();

        match self.hunter.push(dibit, snr) {
            HuntOutcome::Match(m) => {
                self.buffer.mark_sync();
                self.logger.debug(
                    Subsystem::Sync,
                    format!("{} at dibit {} (distance {})", m.name, m.position, m.distance),
                );
                self.on_sync_match(&m.kind, now_m);
                let events = self
                    .router
                    .on_sync(&m, &self.buffer, self.vocoder.as_mut(), now_m);
                self.handle_burst_events(events, now_m);
                self.runtime
                    .classifier
                    .observe_sync_hamming(m.kind.protocol.modulation(), m.distance);
            }
            HuntOutcome::NoCarrier => {
                self.bus.publish(None, Event::NoCarrier);
                self.trunk.no_carrier(now_m, &mut self.bus);
                if self.config.multi_rate_hunt {
                    self.cycle_symbol_rate();
                    self.logger.debug(
                        Subsystem::Demod,
                        format!(
                            "no carrier, hunting at {} samples/symbol",
                            self.extractor.samples_per_symbol()
                        ),
                    );
                }
            }
            HuntOutcome::None => {}
        }

        let events = self
            .router
            .poll(&self.buffer, self.vocoder.as_mut(), now_m);
        self.handle_burst_events(events, now_m);

        // Classifier window: once per current sync length.
        self.dibits_since_window += 1;
        if self.dibits_since_window >= self.hunter.t_max() {
            self.dibits_since_window = 0;
            let report = self.hunter.window_report();
            let classifier = &self.runtime.classifier;
            if let Some(d) = report.c4fm {
                classifier.observe_sync_hamming(Modulation::C4fm, d);
            }
            if let Some(d) = report.cqpsk {
                classifier.observe_sync_hamming(Modulation::Cqpsk, d);
            }
            if let Some(d) = report.gfsk {
                classifier.observe_sync_hamming(Modulation::Gfsk, d);
            }
            classifier.classify(now_m);
        }
    }

    fn on_sync_match(&mut self, kind: &SyncKind, now_m: f64) {
        self.last_sync_protocol = Some(kind.protocol);

        // Seed the slicer thresholds from the pattern's outer symbols.
        self.extractor.warm_start(-3.0, 3.0);

        // Resample on sync: the detected family's symbol rate wins even
        // under a forced modulation (the slicer choice stays forced).
        let target = sps_for_symbol_rate(kind.protocol.symbol_rate());
        if target != self.extractor.samples_per_symbol() {
            self.extractor.set_samples_per_symbol(target);
            self.reinit_matched_filter(kind.protocol.symbol_rate());
        }

        if self.trunk.state().is_tuned {
            self.trunk.on_vc_sync(now_m);
        } else {
            self.trunk.on_cc_sync(*kind, self.current_freq_hz, now_m);
        }
    }

    fn cycle_symbol_rate(&mut self) {
        let allowed = self.config.protocols.required_symbol_rates();
        if allowed.is_empty() {
            return;
        }
        for _ in 0..SPS_CYCLE.len() {
            self.rate_cycle_index = (self.rate_cycle_index + 1) % SPS_CYCLE.len();
            let (sps, rate) = SPS_CYCLE[self.rate_cycle_index];
            if allowed.contains(&rate) {
                self.extractor.set_samples_per_symbol(sps);
                self.reinit_matched_filter(rate);
                return;
            }
        }
    }

    fn reinit_matched_filter(&mut self, symbol_rate: u32) {
        self.matched_filter = RrcFilter::new(0.2, 8, symbol_rate as usize);
        self.matched_filter.init(self.source.sample_rate() as usize);
    }

    fn handle_burst_events(&mut self, events: Vec<BurstEvent>, now_m: f64) {
        for event in events {
            match event {
                BurstEvent::Voice { slot, frames } => {
                    let s = (slot & 1) as usize;
                    if self.last_sync_protocol == Some(Protocol::P25p2) {
                        for frame in frames {
                            self.jitter[s].push(frame);
                        }
                    } else {
                        self.pending_voice[s].extend(frames);
                    }
                    self.trunk.on_vc_sync(now_m);
                }
                BurstEvent::Crypto {
                    slot,
                    algid,
                    key_id,
                    ..
                } => {
                    let s = (slot & 1) as usize;
                    let key = self.keyring.lookup(algid, key_id).is_some()
                        || self.keyring.has_alg(algid);
                    let ks = !self.keystreams.is_empty();
                    self.slot_gates[s].crypto = SlotCrypto {
                        algid,
                        rc4_loaded: key || ks,
                        des_loaded: key,
                        aes_loaded: key,
                    };
                    if self.slot_gates[s].crypto.requires_mute() {
                        self.bus.publish(Some(slot), Event::KeyMissing { algid });
                        self.logger.warn(
                            Subsystem::Mixer,
                            format!("slot {} muted, alg {:#04x} has no key", slot, algid),
                        );
                    }
                }
                BurstEvent::CallInfo { slot, tg, src } => {
                    let s = (slot & 1) as usize;
                    if tg != 0 {
                        self.slot_gates[s].tg = tg;
                        self.trunk.state_mut().slot_tg[s] = tg;
                    }
                    if src != 0 {
                        self.trunk.state_mut().slot_src[s] = src;
                    }
                }
                BurstEvent::Control(pdu) => self.handle_trunk_pdu(pdu, now_m),
                BurstEvent::TalkerAlias { slot, alias } => {
                    self.bus.publish(Some(slot), Event::TalkerAlias { alias });
                }
                BurstEvent::EndOfCall { slot } => {
                    let s = (slot & 1) as usize;
                    self.slot_gates[s].crypto = SlotCrypto::clear();
                    self.trunk.on_mac_end(slot, &mut self.bus);
                }
                BurstEvent::DecodeError { irrecoverable_bits } => {
                    self.bus
                        .publish(None, Event::DecodeError { irrecoverable_bits });
                }
                BurstEvent::Data { .. } => {}
            }
        }
    }

    fn handle_trunk_pdu(&mut self, pdu: TrunkPdu, now_m: f64) {
        match pdu {
            TrunkPdu::Grant(grant) => {
                self.trunk.on_grant(&grant, now_m, &mut self.bus);
            }
            TrunkPdu::IdenUp {
                iden,
                base_freq_hz,
                spacing_hz,
                slots_per_channel,
            } => {
                self.trunk
                    .on_iden_up(iden, base_freq_hz, spacing_hz, slots_per_channel);
                self.trunk.confirm_idens_for_current_site();
            }
            TrunkPdu::NeighborList { freqs } => {
                self.trunk.on_neighbor_update(&freqs);
            }
            TrunkPdu::Adjacent { channel } => {
                if let Some((freq, _)) = self.trunk.channel_to_freq(channel) {
                    self.trunk.on_neighbor_update(&[freq]);
                }
            }
            TrunkPdu::NetStatus { wacn, sysid } => {
                let (rfss, site) = {
                    let s = self.trunk.state();
                    (s.rfssid, s.siteid)
                };
                self.trunk.set_identity(wacn, sysid, rfss, site);
            }
            TrunkPdu::RfssStatus { rfss, site } => {
                let (wacn, sysid) = {
                    let s = self.trunk.state();
                    (s.wacn, s.sysid)
                };
                self.trunk.set_identity(wacn, sysid, rfss, site);
            }
            TrunkPdu::MacActive { slot, tg, src } => {
                self.trunk
                    .on_mac_active(slot, tg, src, now_m, &mut self.bus);
                if tg != 0 {
                    self.slot_gates[(slot & 1) as usize].tg = tg;
                }
            }
            TrunkPdu::MacEnd { slot } => {
                self.trunk.on_mac_end(slot, &mut self.bus);
            }
            TrunkPdu::EdacsAssign { lcn, group } => {
                if let Some(freq) = self.lcn_map.frequency(lcn as u16) {
                    let grant = Grant {
                        kind: GrantKind::Group,
                        tg: group as u32,
                        src: 0,
                        channel: 0,
                        freq_hz: Some(freq),
                        svc: SvcBits::default(),
                        algid: 0,
                    };
                    self.trunk.on_grant(&grant, now_m, &mut self.bus);
                }
            }
        }
    }

    /// Drain decoded voice through the mute policy into the sink.
    fn mix_and_play(&mut self) -> Result<()> {
        if self.runtime.exit_requested() {
            return Ok(());
        }

        let mut inputs = [SlotInput::default(), SlotInput::default()];
        let p2 = self.last_sync_protocol == Some(Protocol::P25p2);
        for s in 0..2 {
            let mut frames = std::mem::take(&mut self.pending_voice[s]);
            while frames.len() < MAX_FRAMES_PER_MIX {
                match self.jitter[s].pop() {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
            let mut gate = self.slot_gates[s].clone();
            gate.p2_audio_allowed = if p2 {
                Some(self.trunk.state().audio_allowed[s])
            } else {
                None
            };
            inputs[s] = SlotInput { frames, gate };
        }

        if inputs.iter().all(|i| i.frames.is_empty()) {
            return Ok(());
        }

        let groups = self.runtime.groups.load();
        let policy = MixPolicy {
            use_allow_list: self.config.trunk.use_allow_list,
            tg_hold: self.config.trunk.tg_hold,
        };
        let out = self.mixer.mix(inputs, &groups, &policy);

        if self.config.audio.stereo {
            self.sink.write_stereo(&out.stereo).map_err(RxError::Audio)?;
        } else {
            self.sink.write_mono(&out.mono).map_err(RxError::Audio)?;
        }
        Ok(())
    }

    /// Once-per-second housekeeping: trunk tick and snapshot publishing.
    fn maybe_tick(&mut self, now_m: f64) {
        if now_m - self.last_tick_m < 1.0 {
            return;
        }
        self.last_tick_m = now_m;

        for s in 0..2u8 {
            let count = self.jitter[s as usize].len() as u8;
            self.trunk.set_ring_count(s, count, now_m);
        }
        self.trunk.tick(now_m, &mut self.bus);
        self.publish_snapshot();
    }

    fn drain_tuner_commands(&mut self) {
        let commands: Vec<TunerCommand> = self.tuner_rx.try_iter().collect();
        for command in commands {
            match command {
                TunerCommand::Tune { freq_hz } => {
                    if self.source.tune(freq_hz).is_err() {
                        // Fall back to the next CC candidate.
                        let now = self.now_m();
                        self.trunk.no_carrier(now, &mut self.bus);
                        continue;
                    }
                    self.current_freq_hz = freq_hz;
                    self.runtime.classifier.reset_mod_state();
                    self.router.reset();
                    for ring in self.jitter.iter_mut() {
                        ring.clear();
                    }
                    for pending in self.pending_voice.iter_mut() {
                        pending.clear();
                    }
                }
                TunerCommand::SetModBandwidth { khz } => {
                    self.source.set_mod_bandwidth(khz);
                }
                TunerCommand::SetSymbolRate { sps } => {
                    self.extractor.set_samples_per_symbol(sps);
                    if let Some((_, rate)) = SPS_CYCLE.iter().find(|(s, _)| *s == sps) {
                        self.reinit_matched_filter(*rate);
                    }
                }
            }
        }
    }

    pub fn publish_snapshot(&mut self) {
        let trunk = self.trunk.state();
        let mut snapshot = UiSnapshot {
            seq: 0,
            ftype: self.hunter.ftype().to_string(),
            modulation: Some(self.runtime.classifier.current()),
            carrier: self.hunter.carrier(),
            trunk_state: format!("{:?}", trunk.phase),
            cc_freq: trunk.cc_freq,
            vc_freq: trunk.vc_freq,
            slots: [SlotSnapshot::default(), SlotSnapshot::default()],
        };
        for s in 0..2 {
            let ring = self.bus.slot_ring(s as u8);
            snapshot.slots[s] = SlotSnapshot {
                active: trunk.audio_allowed[s],
                audio_allowed: trunk.audio_allowed[s],
                tg: trunk.slot_tg[s],
                src: trunk.slot_src[s],
                algid: self.slot_gates[s].crypto.algid,
                event_lines: ring.records().iter().map(|r| r.line.clone()).collect(),
                event_fingerprint: ring.fingerprint(),
            };
        }
        self.runtime.snapshots.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolSet;
    use crate::sinks::NullSink;
    use crate::source::SyntheticSource;
    use crate::tables::GroupList;
    use crate::vocoder::SilenceVocoder;

    fn receiver_with(config: ReceiverConfig) -> Receiver<SyntheticSource> {
        Receiver::new(
            SyntheticSource::new(vec![0; 16], 48_000, false),
            config,
            Box::new(NullSink),
            Box::new(SilenceVocoder),
            SharedGroups::new(GroupList::default()),
        )
    }

    fn feed_symbols(rx: &mut Receiver<SyntheticSource>, symbols: &str) {
        for b in symbols.bytes() {
            let dibit = match b {
                b'1' => 0,
                b'3' => 1,
                _ => panic!("bad symbol"),
            };
            rx.process_dibit(dibit, 255, 0.0);
        }
    }

    #[test]
    fn p25p1_sync_sets_carrier_and_ftype() {
        let mut rx = receiver_with(ReceiverConfig::default());
        for _ in 0..4 {
            rx.process_dibit(0, 255, 0.0);
        }
        feed_symbols(&mut rx, "111113113311333313133333");
        assert!(rx.hunter.carrier());
        assert_eq!(rx.hunter.ftype(), "P25 Phase 1");
        assert_eq!(
            rx.hunter.last_sync().map(|s| s.protocol),
            Some(Protocol::P25p1)
        );
    }

    #[test]
    fn forced_modulation_survives_resample_on_sync() {
        // A forced modulation must pin the slicer while the symbol rate
        // still follows the detected sync family.
        let mut config = ReceiverConfig {
            modulation_lock: Some(Modulation::C4fm),
            ..ReceiverConfig::default()
        };
        config.protocols = ProtocolSet::all();
        let mut rx = receiver_with(config);
        assert_eq!(rx.extractor.samples_per_symbol(), 10);

        // ProVoice runs at 6000 symbols/s (8 samples per symbol) and its
        // sync family maps to GFSK.
        feed_symbols(&mut rx, "13131333111311311133113311331133");
        assert_eq!(rx.extractor.samples_per_symbol(), 8);
        assert_eq!(rx.runtime.classifier.current(), Modulation::C4fm);
    }

    #[test]
    fn no_carrier_cycles_rates_within_enabled_set() {
        let mut config = ReceiverConfig {
            multi_rate_hunt: true,
            ..ReceiverConfig::default()
        };
        config.protocols = ProtocolSet::only(Protocol::Nxdn);
        let mut rx = receiver_with(config);

        // 1800 unmatched dibits trigger the hunt rotation; NXDN only
        // allows 2400 symbols/s.
        for _ in 0..1800 {
            rx.process_dibit(0, 255, 0.0);
        }
        assert_eq!(rx.extractor.samples_per_symbol(), 20);
    }

    #[test]
    fn run_terminates_on_source_end() {
        let mut rx = receiver_with(ReceiverConfig::default());
        rx.run().expect("clean teardown");
    }

    #[test]
    fn run_honors_exit_flag() {
        let config = ReceiverConfig::default();
        let mut rx = Receiver::new(
            SyntheticSource::new(vec![0; 64], 48_000, true), // endless
            config,
            Box::new(NullSink),
            Box::new(SilenceVocoder),
            SharedGroups::new(GroupList::default()),
        );
        rx.runtime().request_exit();
        rx.run().expect("exit flag honored");
    }

    #[test]
    fn snapshot_reflects_trunk_state() {
        let mut rx = receiver_with(ReceiverConfig::default());
        rx.trunk_mut().state_mut().cc_freq = 851_000_000;
        rx.trunk_mut().state_mut().slot_tg[0] = 1234;
        rx.publish_snapshot();

        let snap = rx.runtime.snapshots.latest();
        assert_eq!(snap.cc_freq, 851_000_000);
        assert_eq!(snap.slots[0].tg, 1234);
        assert_eq!(snap.seq, 1);
    }

    #[test]
    fn stalled_source_returns_to_hunt() {
        use crate::errors::SourceError;
        use crate::source::SampleSource;

        struct StallingSource {
            stalls: usize,
        }
        impl SampleSource for StallingSource {
            fn read(&mut self, _out: &mut [i16]) -> std::result::Result<usize, SourceError> {
                if self.stalls > 0 {
                    self.stalls -= 1;
                    return Err(SourceError::Stalled { timeout_secs: 5.0 });
                }
                Ok(0)
            }
            fn tune(&mut self, _f: u32) -> std::result::Result<(), SourceError> {
                Ok(())
            }
            fn return_power(&self) -> f32 {
                -120.0
            }
            fn sample_rate(&self) -> u32 {
                48_000
            }
        }

        let mut rx = Receiver::new(
            StallingSource { stalls: 2 },
            ReceiverConfig::default(),
            Box::new(NullSink),
            Box::new(SilenceVocoder),
            SharedGroups::new(GroupList::default()),
        );
        rx.trunk_mut().state_mut().is_tuned = true;
        rx.trunk_mut().state_mut().cc_freq = 851_000_000;
        rx.run().expect("clean teardown after stalls");
        assert!(!rx.trunk_mut().state().is_tuned);
        assert!(rx
            .event_bus()
            .contains(|e| matches!(e, Event::SourceStalled)));
    }
}
