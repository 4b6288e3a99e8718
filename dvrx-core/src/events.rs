//! Event history and UI snapshot publishing.
//!
//! Every state transition that affects audio (mute, tune, release) lands
//! here as a structured event: appended to a bounded per-slot ring,
//! rendered as one log line, and optionally written to a log file. The UI
//! thread never touches live state; it reads a deep-copied snapshot from a
//! mutex-protected double buffer, and per-slot fingerprints let it skip
//! re-rendering when nothing changed.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Mutex;

use crate::modulation::Modulation;

/// Capacity of each slot's event ring.
pub const EVENT_RING_CAPACITY: usize = 32;

/// Structured receiver events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    CallStart { tg: u32, src: u32 },
    CallEnd { tg: u32 },
    ReturnToCc { cc_freq: u32 },
    Tuned { freq: u32, tg: u32 },
    Lockout { tg: u32, reason: LockoutReason },
    KeyMissing { algid: u8 },
    TalkerAlias { alias: String },
    DecodeError { irrecoverable_bits: u32 },
    NoCarrier,
    SourceStalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockoutReason {
    BlockList,
    NotInAllowList,
    Encrypted,
    PrivateCall,
    GroupCall,
    DataCall,
    TgHold,
}

impl fmt::Display for LockoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockoutReason::BlockList => "block list",
            LockoutReason::NotInAllowList => "not in allow list",
            LockoutReason::Encrypted => "encrypted",
            LockoutReason::PrivateCall => "private call",
            LockoutReason::GroupCall => "group tuning disabled",
            LockoutReason::DataCall => "data call",
            LockoutReason::TgHold => "talkgroup hold",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CallStart { tg, src } => write!(f, "call start TG {} SRC {}", tg, src),
            Event::CallEnd { tg } => write!(f, "call end TG {}", tg),
            Event::ReturnToCc { cc_freq } => write!(f, "return to CC {} Hz", cc_freq),
            Event::Tuned { freq, tg } => write!(f, "tuned {} Hz for TG {}", freq, tg),
            Event::Lockout { tg, reason } => write!(f, "blocked TG {} ({})", tg, reason),
            Event::KeyMissing { algid } => write!(f, "key missing for alg {:#04x}", algid),
            Event::TalkerAlias { alias } => write!(f, "talker alias {:?}", alias),
            Event::DecodeError { irrecoverable_bits } => {
                write!(f, "decode error ({} irrecoverable bits)", irrecoverable_bits)
            }
            Event::NoCarrier => f.write_str("no carrier"),
            Event::SourceStalled => f.write_str("source stalled"),
        }
    }
}

/// One recorded event: the slot it applies to (None = system-wide), its
/// monotonic time, and the pre-rendered log line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventRecord {
    pub slot: Option<u8>,
    pub event: Event,
    pub line: String,
}

/// Fixed-capacity ring of recent events.
#[derive(Debug, Clone, Default)]
pub struct EventRing {
    records: Vec<EventRecord>,
}

impl EventRing {
    pub fn push(&mut self, record: EventRecord) {
        if self.records.len() >= EVENT_RING_CAPACITY {
            self.records.remove(0);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Content hash for change detection in the UI.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for r in &self.records {
            r.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The event bus: per-slot rings plus an optional log writer.
pub struct EventBus {
    slots: [EventRing; 2],
    system: EventRing,
    log: Option<Box<dyn Write + Send>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            slots: [EventRing::default(), EventRing::default()],
            system: EventRing::default(),
            log: None,
        }
    }

    pub fn with_log(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.log = Some(writer);
        self
    }

    /// Record an event. `slot` is 0/1 for per-slot events.
    pub fn publish(&mut self, slot: Option<u8>, event: Event) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = match slot {
            Some(s) => format!("{} [slot {}] {}", stamp, s, event),
            None => format!("{} {}", stamp, event),
        };
        let record = EventRecord { slot, event, line };

        if let Some(log) = self.log.as_mut() {
            let _ = writeln!(log, "{}", record.line);
        }
        match slot {
            Some(s) if (s as usize) < self.slots.len() => {
                self.slots[s as usize].push(record);
            }
            _ => self.system.push(record),
        }
    }

    pub fn slot_ring(&self, slot: u8) -> &EventRing {
        &self.slots[slot as usize]
    }

    pub fn system_ring(&self) -> &EventRing {
        &self.system
    }

    /// True when any ring holds an event matching `predicate`.
    pub fn contains(&self, predicate: impl Fn(&Event) -> bool) -> bool {
        self.system
            .records()
            .iter()
            .chain(self.slots[0].records())
            .chain(self.slots[1].records())
            .any(|r| predicate(&r.event))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-slot activity summary for the renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSnapshot {
    pub active: bool,
    pub audio_allowed: bool,
    pub tg: u32,
    pub src: u32,
    pub algid: u8,
    pub event_lines: Vec<String>,
    pub event_fingerprint: u64,
}

/// Deep copy of the publishable receiver state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiSnapshot {
    pub seq: u64,
    pub ftype: String,
    pub modulation: Option<Modulation>,
    pub carrier: bool,
    pub trunk_state: String,
    pub cc_freq: u32,
    pub vc_freq: [u32; 2],
    pub slots: [SlotSnapshot; 2],
}

/// Mutex-protected double buffer between the demod and UI threads.
///
/// The writer replaces the back buffer and flips; the reader clones the
/// front. Neither side ever holds the lock during rendering or decoding.
pub struct SnapshotBuffer {
    inner: Mutex<SnapshotSlots>,
}

struct SnapshotSlots {
    buffers: [UiSnapshot; 2],
    front: usize,
    seq: u64,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SnapshotSlots {
                buffers: [UiSnapshot::default(), UiSnapshot::default()],
                front: 0,
                seq: 0,
            }),
        }
    }

    pub fn publish(&self, mut snapshot: UiSnapshot) {
        let mut slots = self.inner.lock().expect("snapshot lock poisoned");
        slots.seq += 1;
        snapshot.seq = slots.seq;
        let back = 1 - slots.front;
        slots.buffers[back] = snapshot;
        slots.front = back;
    }

    pub fn latest(&self) -> UiSnapshot {
        let slots = self.inner.lock().expect("snapshot lock poisoned");
        slots.buffers[slots.front].clone()
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new()
    }
}
