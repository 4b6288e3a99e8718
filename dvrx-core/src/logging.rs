//! In-memory diagnostics for the demod loop.
//!
//! The demod thread cannot afford a global logger or synchronous I/O, so
//! diagnostics land in a bounded ring owned by the receiver. Each entry is
//! tagged with the subsystem that produced it; a bitmask silences noisy
//! subsystems wholesale and a minimum level trims the rest. The CLI (or a
//! test) drains the ring between loop iterations; when nobody drains it,
//! old entries fall off the front and an eviction counter records how much
//! was lost.

use std::collections::VecDeque;
use std::fmt;

/// Receiver subsystems that emit diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Sample transport and retuning.
    Source,
    /// Slicing, rate hunting, modulation classification.
    Demod,
    /// Sync pattern matching.
    Sync,
    /// Protocol burst decoding.
    Proto,
    /// Trunking state machine.
    Trunk,
    /// Gating, gain and sinks.
    Mixer,
}

impl Subsystem {
    pub const ALL: [Subsystem; 6] = [
        Subsystem::Source,
        Subsystem::Demod,
        Subsystem::Sync,
        Subsystem::Proto,
        Subsystem::Trunk,
        Subsystem::Mixer,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Subsystem::Source => "source",
            Subsystem::Demod => "demod",
            Subsystem::Sync => "sync",
            Subsystem::Proto => "proto",
            Subsystem::Trunk => "trunk",
            Subsystem::Mixer => "mixer",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity, ordered so a minimum-level comparison works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub subsystem: Subsystem,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.level, self.subsystem, self.message)
    }
}

/// Bounded diagnostics ring with per-subsystem masking.
pub struct RxLogger {
    min_level: LogLevel,
    enabled_mask: u8,
    entries: VecDeque<LogEntry>,
    capacity: usize,
    evicted: u64,
}

impl RxLogger {
    pub const DEFAULT_CAPACITY: usize = 512;

    /// All subsystems enabled at `Info` and above.
    pub fn new(capacity: usize) -> Self {
        Self {
            min_level: LogLevel::Info,
            enabled_mask: u8::MAX,
            entries: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    pub fn set_enabled(&mut self, subsystem: Subsystem, enabled: bool) {
        if enabled {
            self.enabled_mask |= subsystem.bit();
        } else {
            self.enabled_mask &= !subsystem.bit();
        }
    }

    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        self.enabled_mask & subsystem.bit() != 0
    }

    /// Record one diagnostic, evicting from the front when full.
    pub fn record(&mut self, level: LogLevel, subsystem: Subsystem, message: impl Into<String>) {
        if level < self.min_level || !self.is_enabled(subsystem) {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(LogEntry {
            level,
            subsystem,
            message: message.into(),
        });
    }

    pub fn debug(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.record(LogLevel::Debug, subsystem, message);
    }

    pub fn info(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.record(LogLevel::Info, subsystem, message);
    }

    pub fn warn(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.record(LogLevel::Warn, subsystem, message);
    }

    pub fn error(&mut self, subsystem: Subsystem, message: impl Into<String>) {
        self.record(LogLevel::Error, subsystem, message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted unread since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Take everything out of the ring; the eviction count survives.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }
}

impl Default for RxLogger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
