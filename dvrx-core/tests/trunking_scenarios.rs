//! End-to-end trunking scenarios driven through the public API.

use crossbeam::channel::unbounded;
use dvrx_core::config::TrunkConfig;
use dvrx_core::events::{Event, EventBus, LockoutReason};
use dvrx_core::tables::{GroupEntry, GroupList, GroupMode, SharedGroups};
use dvrx_core::trunk::{Grant, GrantKind, SvcBits, TrunkMachine, TrunkPhase, TunerCommand};

fn grant(tg: u32) -> Grant {
    Grant {
        kind: GrantKind::Group,
        tg,
        src: 42,
        channel: 0,
        freq_hz: Some(852_000_000),
        svc: SvcBits::default(),
        algid: 0,
    }
}

/// Hangtime release: a quiet voice channel is abandoned with exactly one
/// retune to the control channel.
#[test]
fn hangtime_release_after_grant() {
    let (tx, rx) = unbounded();
    let config = TrunkConfig {
        hangtime_secs: 1.0,
        ..TrunkConfig::default()
    };
    let mut machine = TrunkMachine::new(config, tx, SharedGroups::new(GroupList::default()));
    let mut bus = EventBus::new();

    let now = 1000.0;
    {
        let state = machine.state_mut();
        state.phase = TrunkPhase::VcTuned;
        state.cc_freq = 851_000_000;
        state.is_tuned = true;
        state.vc_freq[0] = 852_000_000;
        state.last_vc_sync_time_m = now - 2.0;
        state.last_vc_tune_time_m = now - 2.0;
        state.audio_allowed = [false, false];
        state.audio_ring_count = [0, 0];
        state.last_mac_active_m = [0.0, 0.0];
    }

    machine.tick(now, &mut bus);

    let commands: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        commands,
        vec![TunerCommand::Tune {
            freq_hz: 851_000_000
        }]
    );
    assert!(!machine.state().is_tuned);
    assert!(bus.contains(|e| matches!(e, Event::ReturnToCc { cc_freq: 851_000_000 })));
}

/// A tick before hangtime does nothing; the machine parks in Hang while
/// any condition is unmet and releases only when all three hold.
#[test]
fn release_waits_for_all_conditions() {
    let (tx, rx) = unbounded();
    let mut machine = TrunkMachine::new(
        TrunkConfig::default(),
        tx,
        SharedGroups::new(GroupList::default()),
    );
    let mut bus = EventBus::new();
    let now = 50.0;
    {
        let state = machine.state_mut();
        state.phase = TrunkPhase::VcTuned;
        state.cc_freq = 851_000_000;
        state.is_tuned = true;
        state.last_vc_sync_time_m = now - 0.2; // inside hangtime
        state.last_vc_tune_time_m = now - 5.0;
    }
    machine.tick(now, &mut bus);
    assert!(machine.state().is_tuned);
    assert!(rx.try_iter().next().is_none());

    // Hangtime elapses with an open slot: Hang, not release.
    machine.state_mut().last_vc_sync_time_m = now - 5.0;
    machine.state_mut().audio_allowed[1] = true;
    machine.tick(now, &mut bus);
    assert_eq!(machine.state().phase, TrunkPhase::Hang);
    assert!(machine.state().is_tuned);

    // Slot closes: release.
    machine.state_mut().audio_allowed[1] = false;
    machine.tick(now, &mut bus);
    assert!(!machine.state().is_tuned);
    assert_eq!(machine.state().phase, TrunkPhase::CcLocked);
}

/// IDEN trust promotion: WACN/SYSID must match; a recorded RFSS/site pair
/// must match too; trust never decreases.
#[test]
fn iden_trust_promotion() {
    let (tx, _rx) = unbounded();
    let mut machine = TrunkMachine::new(
        TrunkConfig::default(),
        tx,
        SharedGroups::new(GroupList::default()),
    );
    machine.set_identity(0xABCDE, 0x123, 4, 7);

    {
        let table = &mut machine.state_mut().iden_table;
        table[0].present = true;
        table[0].wacn = 0xABCDE;
        table[0].sysid = 0x123;
        table[0].rfss = 0;
        table[0].site = 0;
        table[0].trust = 1;

        table[1].present = true;
        table[1].wacn = 0xABCDE;
        table[1].sysid = 0x123;
        table[1].rfss = 5; // wrong RFSS
        table[1].site = 7;
        table[1].trust = 1;
    }

    machine.confirm_idens_for_current_site();

    assert_eq!(machine.state().iden_table[0].trust, 2);
    assert!(machine.state().iden_table[1].trust < 2);
}

/// Grant rejection by block list: no tune, tuned state unchanged, one
/// lockout event.
#[test]
fn grant_rejection_by_block_list() {
    let (tx, rx) = unbounded();
    let mut groups = GroupList::default();
    groups.push(GroupEntry {
        tg: 100,
        mode: GroupMode::Block,
        name: "Blocked".into(),
        last_algid: None,
    });
    let mut machine = TrunkMachine::new(
        TrunkConfig::default(),
        tx,
        SharedGroups::new(groups),
    );
    let mut bus = EventBus::new();
    machine.state_mut().phase = TrunkPhase::CcLocked;
    machine.state_mut().cc_freq = 851_000_000;
    let tuned_before = machine.state().is_tuned;

    machine.on_grant(&grant(100), 10.0, &mut bus);

    assert!(rx.try_iter().next().is_none());
    assert_eq!(machine.state().is_tuned, tuned_before);
    assert!(bus.contains(|e| matches!(
        e,
        Event::Lockout {
            tg: 100,
            reason: LockoutReason::BlockList
        }
    )));
}

/// `last_vc_sync_time_m` never decreases while tuned.
#[test]
fn vc_sync_time_monotonic_while_tuned() {
    let (tx, _rx) = unbounded();
    let mut machine = TrunkMachine::new(
        TrunkConfig::default(),
        tx,
        SharedGroups::new(GroupList::default()),
    );
    machine.state_mut().is_tuned = true;

    let mut last = 0.0;
    for &t in &[1.0, 3.0, 2.0, 5.0, 4.0, 9.0] {
        machine.on_vc_sync(t);
        let current = machine.state().last_vc_sync_time_m;
        assert!(current >= last, "time went backwards: {} < {}", current, last);
        last = current;
    }
    assert_eq!(last, 9.0);
}
