//! Sync detection and mixer gating scenarios.

use dvrx_core::config::ReceiverConfig;
use dvrx_core::mixer::{MixPolicy, Mixer, SlotCrypto, SlotGate, SlotInput};
use dvrx_core::receiver::Receiver;
use dvrx_core::sinks::NullSink;
use dvrx_core::source::SyntheticSource;
use dvrx_core::sync::Protocol;
use dvrx_core::tables::{GroupList, SharedGroups};
use dvrx_core::vocoder::{SilenceVocoder, PCM_FRAME_SAMPLES};

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

/// A synthetic dibit stream ending in the P25 Phase 1 frame sync leaves
/// the receiver carrier-locked with the right frame type.
#[test]
fn p25p1_sync_in_synthetic_stream() {
    let mut rx = Receiver::new(
        SyntheticSource::new(vec![0; 16], 48_000, false),
        ReceiverConfig::default(),
        Box::new(NullSink),
        Box::new(SilenceVocoder),
        SharedGroups::new(GroupList::default()),
    );

    // Arbitrary lead-in, then the exact sync pattern.
    feed_symbols(&mut rx, "31313131313131");
    feed_symbols(&mut rx, "111113113311333313133333");

    rx.publish_snapshot();
    let snap = rx.runtime().snapshots.latest();
    assert_eq!(snap.ftype, "P25 Phase 1");
    assert!(snap.carrier);
}

/// Encryption lockout on one slot must not mute the clear slot; with a
/// stereo sink the lone clear slot is duplicated onto both channels, and
/// the mono fold equals the clear slot.
#[test]
fn encryption_lockout_clear_slot_plays() {
    let mut mixer = Mixer::new(true, false, false);
    let groups = GroupList::default();
    let policy = MixPolicy::default();

    // Left slot: AES-256 without a loaded key; the trunking machine has
    // already revoked its gate. Right slot: clear and allowed.
    let left = SlotInput {
        frames: vec![[1000.0; PCM_FRAME_SAMPLES]],
        gate: SlotGate {
            enabled: true,
            tg: 101,
            crypto: SlotCrypto {
                algid: 0x84,
                aes_loaded: false,
                ..SlotCrypto::clear()
            },
            p2_audio_allowed: Some(false),
        },
    };
    let right = SlotInput {
        frames: vec![[1000.0; PCM_FRAME_SAMPLES]],
        gate: SlotGate {
            enabled: true,
            tg: 102,
            crypto: SlotCrypto {
                algid: 0x80,
                ..SlotCrypto::clear()
            },
            p2_audio_allowed: Some(true),
        },
    };

    let out = mixer.mix([left, right], &groups, &policy);

    assert!(out.mute_reasons[0].is_some());
    assert!(out.mute_reasons[1].is_none());
    assert_eq!(out.stereo.len(), PCM_FRAME_SAMPLES * 2);
    for pair in out.stereo.chunks(2) {
        assert_eq!(pair, [1000.0, 1000.0]);
    }
    assert_eq!(out.mono, vec![1000.0; PCM_FRAME_SAMPLES]);
}

/// Random dibit noise must not produce a P25 sync: the 24-dibit exact
/// match leaves no room for coincidence at this stream length.
#[test]
fn noise_does_not_false_sync() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut config = ReceiverConfig::default();
    config.protocols = dvrx_core::config::ProtocolSet::only(Protocol::P25p1);
    let mut rx = Receiver::new(
        SyntheticSource::new(vec![0; 16], 48_000, false),
        config,
        Box::new(NullSink),
        Box::new(SilenceVocoder),
        SharedGroups::new(GroupList::default()),
    );

    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..20_000 {
        rx.process_dibit(rng.gen_range(0..4), 128, 0.0);
    }
    rx.publish_snapshot();
    assert!(!rx.runtime().snapshots.latest().carrier);
}

/// Sync detection works for every normal-polarity catalog pattern that
/// does not need family priming.
#[test]
fn all_primary_syncs_detect() {
    let cases: [(Protocol, &str); 6] = [
        (Protocol::P25p1, "111113113311333313133333"),
        (Protocol::P25p2, "11131131111333133333"),
        (Protocol::Dmr, "313333111331131131331131"),
        (Protocol::Ysf, "31111311313113131131"),
        (Protocol::ProVoice, "13131333111311311133113311331133"),
        (
            Protocol::Edacs,
            "313131313131313131313111333133133131313131313131",
        ),
    ];

    for (protocol, pattern) in cases {
        let mut config = ReceiverConfig::default();
        config.protocols = dvrx_core::config::ProtocolSet::only(protocol);
        let mut rx = Receiver::new(
            SyntheticSource::new(vec![0; 16], 48_000, false),
            config,
            Box::new(NullSink),
            Box::new(SilenceVocoder),
            SharedGroups::new(GroupList::default()),
        );
        feed_symbols(&mut rx, pattern);
        rx.publish_snapshot();
        let snap = rx.runtime().snapshots.latest();
        assert_eq!(snap.ftype, protocol.ftype(), "protocol {:?}", protocol);
    }
}
