//! Channel, group and key tables imported from CSV files.
//!
//! Lookups are linear: the lists stay small (at most a few thousand rows)
//! and linear scans keep the entries in one cache-friendly Vec. A
//! configuration reload parses into a fresh list and swaps the whole thing
//! behind an `Arc`, so the demod loop never observes a half-loaded table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::errors::ConfigError;

/// Talkgroup policy mode from the `mode` CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// "A": allow (explicit allow-list member).
    Allow,
    /// "B": block.
    Block,
    /// "D": digital, no special policy.
    Digital,
    /// "DE": digital encrypted; skipped until explicitly cleared.
    DigitalEncrypted,
}

impl GroupMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(GroupMode::Allow),
            "B" => Some(GroupMode::Block),
            "D" => Some(GroupMode::Digital),
            "DE" => Some(GroupMode::DigitalEncrypted),
            _ => None,
        }
    }
}

/// One talkgroup row: `tg,mode,name,alg`.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub tg: u32,
    pub mode: GroupMode,
    pub name: String,
    pub last_algid: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct GroupRow {
    tg: u32,
    mode: String,
    name: String,
    alg: Option<String>,
}

/// Ordered talkgroup list with linear lookup.
#[derive(Debug, Clone, Default)]
pub struct GroupList {
    entries: Vec<GroupEntry>,
}

impl GroupList {
    pub fn new(entries: Vec<GroupEntry>) -> Self {
        Self { entries }
    }

    pub fn from_csv(path: &Path) -> Result<Self, ConfigError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line: 0,
                reason: e.to_string(),
            })?;

        let mut entries = Vec::new();
        for (idx, row) in reader.deserialize::<GroupRow>().enumerate() {
            let line = idx + 2; // header is line 1
            let row = row.map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line,
                reason: e.to_string(),
            })?;
            let mode = GroupMode::parse(&row.mode).ok_or_else(|| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line,
                reason: format!("unknown mode {:?}", row.mode),
            })?;
            let last_algid = match row.alg.as_deref() {
                None | Some("") => None,
                Some(hex) => Some(u8::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(
                    |_| ConfigError::MalformedCsv {
                        path: path.display().to_string(),
                        line,
                        reason: format!("bad algid {:?}", hex),
                    },
                )?),
            };
            entries.push(GroupEntry {
                tg: row.tg,
                mode,
                name: row.name,
                last_algid,
            });
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, tg: u32) -> Option<&GroupEntry> {
        self.entries.iter().find(|e| e.tg == tg)
    }

    pub fn push(&mut self, entry: GroupEntry) {
        self.entries.push(entry);
    }

    /// Mark a talkgroup `DE` after an encrypted-grant rejection so later
    /// grants skip it without re-evaluating.
    pub fn mark_encrypted(&mut self, tg: u32, algid: u8) {
        match self.entries.iter_mut().find(|e| e.tg == tg) {
            Some(entry) => {
                entry.mode = GroupMode::DigitalEncrypted;
                entry.last_algid = Some(algid);
            }
            None => self.entries.push(GroupEntry {
                tg,
                mode: GroupMode::DigitalEncrypted,
                name: String::new(),
                last_algid: Some(algid),
            }),
        }
    }

    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }
}

/// Swappable handle to the live group list.
///
/// The demod loop clones the `Arc` once per decision; a reload builds a
/// complete new list and exchanges the pointer in one step.
#[derive(Clone, Default)]
pub struct SharedGroups {
    inner: Arc<Mutex<Arc<GroupList>>>,
}

impl SharedGroups {
    pub fn new(list: GroupList) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(list))),
        }
    }

    pub fn load(&self) -> Arc<GroupList> {
        self.inner.lock().expect("group list lock poisoned").clone()
    }

    pub fn swap(&self, list: GroupList) {
        *self.inner.lock().expect("group list lock poisoned") = Arc::new(list);
    }

    /// Apply a mutation by copy-and-swap, preserving lock-free readers.
    pub fn update(&self, f: impl FnOnce(&mut GroupList)) {
        let mut guard = self.inner.lock().expect("group list lock poisoned");
        let mut copy = (**guard).clone();
        f(&mut copy);
        *guard = Arc::new(copy);
    }
}

/// One logical-channel row: `lcn,freq_hz`.
#[derive(Debug, Deserialize)]
struct LcnRow {
    lcn: u16,
    freq_hz: u32,
}

/// LCN-to-frequency map used by the trunking hunter when no CC candidate
/// list is available.
#[derive(Debug, Clone, Default)]
pub struct LcnMap {
    freqs: Vec<(u16, u32)>,
}

impl LcnMap {
    pub fn from_csv(path: &Path) -> Result<Self, ConfigError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line: 0,
                reason: e.to_string(),
            })?;
        let mut freqs = Vec::new();
        for (idx, row) in reader.deserialize::<LcnRow>().enumerate() {
            let row = row.map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line: idx + 2,
                reason: e.to_string(),
            })?;
            freqs.push((row.lcn, row.freq_hz));
        }
        Ok(Self { freqs })
    }

    pub fn frequency(&self, lcn: u16) -> Option<u32> {
        self.freqs.iter().find(|(l, _)| *l == lcn).map(|(_, f)| *f)
    }

    pub fn frequencies(&self) -> Vec<u32> {
        self.freqs.iter().map(|(_, f)| *f).collect()
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }
}

/// One keyring row: `key_id,algid,hexkey`.
#[derive(Debug, Deserialize)]
struct KeyRow {
    key_id: u16,
    algid: String,
    hexkey: String,
}

#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key_id: u16,
    pub algid: u8,
    pub key: Vec<u8>,
}

/// Loaded encryption keys, looked up by (algid, key_id).
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<KeyEntry>,
}

impl Keyring {
    pub fn from_csv(path: &Path) -> Result<Self, ConfigError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line: 0,
                reason: e.to_string(),
            })?;
        let mut keys = Vec::new();
        for (idx, row) in reader.deserialize::<KeyRow>().enumerate() {
            let line = idx + 2;
            let row = row.map_err(|e| ConfigError::MalformedCsv {
                path: path.display().to_string(),
                line,
                reason: e.to_string(),
            })?;
            let algid = u8::from_str_radix(row.algid.trim_start_matches("0x"), 16).map_err(
                |_| ConfigError::MalformedCsv {
                    path: path.display().to_string(),
                    line,
                    reason: format!("bad algid {:?}", row.algid),
                },
            )?;
            let hex = row.hexkey.trim();
            if hex.is_empty() || hex.len() % 2 != 0 {
                return Err(ConfigError::MalformedCsv {
                    path: path.display().to_string(),
                    line,
                    reason: "key must be whole hex bytes".into(),
                });
            }
            let mut key = Vec::with_capacity(hex.len() / 2);
            for i in (0..hex.len()).step_by(2) {
                key.push(u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| {
                    ConfigError::MalformedCsv {
                        path: path.display().to_string(),
                        line,
                        reason: "invalid hex digit in key".into(),
                    }
                })?);
            }
            keys.push(KeyEntry {
                key_id: row.key_id,
                algid,
                key,
            });
        }
        Ok(Self { keys })
    }

    pub fn lookup(&self, algid: u8, key_id: u16) -> Option<&KeyEntry> {
        self.keys
            .iter()
            .find(|k| k.algid == algid && k.key_id == key_id)
    }

    pub fn has_alg(&self, algid: u8) -> bool {
        self.keys.iter().any(|k| k.algid == algid)
    }
}
