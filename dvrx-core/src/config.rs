//! Configuration types for the receiver pipeline.

use serde::{Deserialize, Serialize};

use crate::dibit::unpack_bytes_into_bits;
use crate::errors::ConfigError;
use crate::modulation::Modulation;
use crate::sync::Protocol;

/// Which protocol families the sync hunter searches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSet {
    pub p25p1: bool,
    pub p25p2: bool,
    pub x2tdma: bool,
    pub dmr: bool,
    pub nxdn: bool,
    pub dpmr: bool,
    pub ysf: bool,
    pub dstar: bool,
    pub m17: bool,
    pub provoice: bool,
    pub edacs: bool,
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self {
            p25p1: true,
            p25p2: true,
            x2tdma: true,
            dmr: true,
            nxdn: true,
            dpmr: false,
            ysf: true,
            dstar: true,
            m17: true,
            provoice: false,
            edacs: false,
        }
    }
}

impl ProtocolSet {
    /// All families on, for the wide-open hunt mode.
    pub fn all() -> Self {
        Self {
            p25p1: true,
            p25p2: true,
            x2tdma: true,
            dmr: true,
            nxdn: true,
            dpmr: true,
            ysf: true,
            dstar: true,
            m17: true,
            provoice: true,
            edacs: true,
        }
    }

    pub fn only(protocol: Protocol) -> Self {
        let mut set = Self {
            p25p1: false,
            p25p2: false,
            x2tdma: false,
            dmr: false,
            nxdn: false,
            dpmr: false,
            ysf: false,
            dstar: false,
            m17: false,
            provoice: false,
            edacs: false,
        };
        set.set_enabled(protocol, true);
        set
    }

    pub fn set_enabled(&mut self, protocol: Protocol, enabled: bool) {
        match protocol {
            Protocol::P25p1 => self.p25p1 = enabled,
            Protocol::P25p2 => self.p25p2 = enabled,
            Protocol::X2Tdma => self.x2tdma = enabled,
            Protocol::Dmr => self.dmr = enabled,
            Protocol::Nxdn => self.nxdn = enabled,
            Protocol::Dpmr => self.dpmr = enabled,
            Protocol::Ysf => self.ysf = enabled,
            Protocol::Dstar => self.dstar = enabled,
            Protocol::M17 => self.m17 = enabled,
            Protocol::ProVoice => self.provoice = enabled,
            Protocol::Edacs => self.edacs = enabled,
        }
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::P25p1 => self.p25p1,
            Protocol::P25p2 => self.p25p2,
            Protocol::X2Tdma => self.x2tdma,
            Protocol::Dmr => self.dmr,
            Protocol::Nxdn => self.nxdn,
            Protocol::Dpmr => self.dpmr,
            Protocol::Ysf => self.ysf,
            Protocol::Dstar => self.dstar,
            Protocol::M17 => self.m17,
            Protocol::ProVoice => self.provoice,
            Protocol::Edacs => self.edacs,
        }
    }

    pub fn enabled(&self) -> Vec<Protocol> {
        Protocol::ALL
            .iter()
            .copied()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    /// Symbol rates required by the enabled set, used to restrict the
    /// multi-rate hunt cycle.
    pub fn required_symbol_rates(&self) -> Vec<u32> {
        let mut rates: Vec<u32> = self.enabled().iter().map(|p| p.symbol_rate()).collect();
        rates.sort_unstable();
        rates.dedup();
        rates
    }
}

/// Trunk-following policy and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkConfig {
    pub enabled: bool,

    /// Seconds on the VC after the last voice sync before release.
    pub hangtime_secs: f64,
    /// Minimum seconds on the VC after a tune before release is allowed.
    pub vc_grace_secs: f64,
    /// Seconds a MAC_ACTIVE keeps a slot counted as busy.
    pub mac_hold_secs: f64,
    /// Seconds buffered audio keeps a slot counted as busy.
    pub ring_hold_secs: f64,

    pub tune_group_calls: bool,
    pub tune_private_calls: bool,
    pub tune_data_calls: bool,
    pub tune_enc_calls: bool,

    /// When set, only talkgroups present in the group list are tuned.
    pub use_allow_list: bool,
    /// Talkgroup hold: 0 means none.
    pub tg_hold: u32,

    /// Bound on the CC candidate list.
    pub max_cc_candidates: usize,
}

impl Default for TrunkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hangtime_secs: 1.0,
            vc_grace_secs: 0.75,
            mac_hold_secs: 0.75,
            ring_hold_secs: 0.75,
            tune_group_calls: true,
            tune_private_calls: false,
            tune_data_calls: false,
            tune_enc_calls: false,
            use_allow_list: false,
            tg_hold: 0,
            max_cc_candidates: 16,
        }
    }
}

impl TrunkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hangtime_secs.is_finite() || self.hangtime_secs <= 0.0 {
            return Err(ConfigError::InvalidHangtime {
                secs: self.hangtime_secs,
            });
        }
        Ok(())
    }
}

/// Audio output selection and voice-path options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sink: SinkSelector,
    pub stereo: bool,
    /// Emit IEEE float LE instead of 16-bit LE on the raw paths.
    pub float_output: bool,
    /// Apply the per-slot DC-blocking high-pass on the PCM path.
    pub use_hpf: bool,
    /// Per-slot user enables (`slotN_on`).
    pub slots_enabled: [bool; 2],
    /// Per-slot automatic gain control on the float path.
    pub agc: bool,
    pub wav_suffix: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sink: SinkSelector::Device,
            stereo: true,
            float_output: false,
            use_hpf: true,
            slots_enabled: [true, true],
            agc: true,
            wav_suffix: "call".into(),
        }
    }
}

/// Where mixed audio goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum SinkSelector {
    /// Default soundcard via cpal.
    Device,
    /// Raw PCM on stdout.
    Stdout,
    /// One UDP datagram per frame.
    Udp { addr: String },
    /// Timestamped WAV files in a directory.
    Wav { dir: String },
    /// Discard (tests, headless decoding).
    Null,
}

/// Top-level receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReceiverConfig {
    pub protocols: ProtocolSet,
    pub trunk: TrunkConfig,
    pub audio: AudioConfig,

    /// Frequency the source starts on, so a CC lock can record it.
    pub initial_freq_hz: u32,
    /// User-forced modulation; skips auto-classification entirely.
    pub modulation_lock: Option<Modulation>,
    /// Gate sync search below this SNR (dB).
    pub snr_floor_db: Option<f64>,
    /// Cycle samples-per-symbol while hunting with no carrier.
    pub multi_rate_hunt: bool,
}

/// Maximum keystream length in bits (18 AMBE frames of 49 bits).
pub const KEYSTREAM_MAX_BITS: usize = 882;

/// Bits in one AMBE voice frame; the default keystream step.
pub const AMBE_FRAME_BITS: u32 = 49;

/// A static keystream specification, parsed from
/// `bits:hexbytes[:offset[:step]]`.
///
/// `bits` is the keystream modulus in [1,882]; `offset` and `step` are
/// decimal bit positions with `step` defaulting to one AMBE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystreamSpec {
    pub bits: u16,
    /// Step is aligned to whole AMBE frames.
    pub frame_mode: bool,
    pub offset: u32,
    pub step: u32,
    /// Unpacked keystream bits, zero-padded to `bits` length.
    pub ks_bits: Vec<u8>,
}

impl KeystreamSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidKeystream {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(fail("expected bits:hexbytes[:offset[:step]]"));
        }

        let bits: u16 = parts[0]
            .parse()
            .map_err(|_| fail("bits field is not a decimal number"))?;
        if bits == 0 || bits as usize > KEYSTREAM_MAX_BITS {
            return Err(fail("bits must be in [1,882]"));
        }

        let hex = parts[1];
        if hex.is_empty() {
            return Err(fail("empty hex keystream"));
        }
        if hex.len() % 2 != 0 {
            return Err(fail("hex keystream must be whole bytes"));
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| fail("invalid hex digit"))?;
            bytes.push(byte);
        }

        let offset: u32 = match parts.get(2) {
            Some(s) if !s.is_empty() => s
                .parse()
                .map_err(|_| fail("offset field is not a decimal number"))?,
            _ => 0,
        };

        let step: u32 = match parts.get(3) {
            Some(s) if !s.is_empty() => {
                let step = s
                    .parse()
                    .map_err(|_| fail("step field is not a decimal number"))?;
                if step == 0 {
                    return Err(fail("step must be positive"));
                }
                step
            }
            _ => AMBE_FRAME_BITS,
        };

        let mut ks_bits = unpack_bytes_into_bits(&bytes, bytes.len() * 8);
        ks_bits.resize(bits as usize, 0);

        Ok(Self {
            bits,
            frame_mode: step % AMBE_FRAME_BITS == 0,
            offset,
            step,
            ks_bits,
        })
    }
}
