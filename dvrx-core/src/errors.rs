//! dvrx error types with granular categories

use thiserror::Error;

/// Top-level error type for all dvrx operations
#[derive(Debug, Error)]
pub enum RxError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trunking error: {0}")]
    Trunk(#[from] TrunkError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

/// Sample-source errors.
///
/// `Stalled` and `TuneFailed` are recoverable: the trunking state machine
/// reacts by falling back to the control channel rather than exiting.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source stalled: no samples for {timeout_secs:.1} s")]
    Stalled { timeout_secs: f64 },

    #[error("Tune to {freq_hz} Hz failed: {reason}")]
    TuneFailed { freq_hz: u32, reason: String },

    #[error("Failed to open source {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Source closed")]
    Closed,

    #[error("Unsupported sample rate {rate} Hz")]
    UnsupportedRate { rate: u32 },
}

/// Decoding-specific errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Sync not found after {dibits_searched} dibits")]
    LostSync { dibits_searched: usize },

    #[error("Burst truncated: need {required} dibits, have {available}")]
    BurstTruncated { required: usize, available: usize },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("FEC failure: {irrecoverable} irrecoverable bits")]
    FecFailure { irrecoverable: usize },
}

/// Configuration errors.
///
/// Raised at load time only; a rejected reload leaves the previous
/// configuration in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid keystream spec {spec:?}: {reason}")]
    InvalidKeystream { spec: String, reason: String },

    #[error("Malformed table row {line} in {path}: {reason}")]
    MalformedCsv {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid sample rate: {rate} Hz")]
    InvalidSampleRate { rate: u32 },

    #[error("Invalid hangtime: {secs} s (must be positive and finite)")]
    InvalidHangtime { secs: f64 },

    #[error("No protocols enabled")]
    NoProtocolsEnabled,
}

/// Trunking state-machine errors
#[derive(Debug, Error)]
pub enum TrunkError {
    #[error("No control channel known")]
    NoControlChannel,

    #[error("No frequency for channel {channel:#x} (IDEN {iden} untrusted)")]
    UnresolvedChannel { channel: u16, iden: u8 },

    #[error("Tuner command queue disconnected")]
    TunerGone,
}

/// Audio path errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to open sink {kind}: {reason}")]
    SinkOpenFailed { kind: String, reason: String },

    #[error("Sink write failed: {reason}")]
    WriteFailed { reason: String },
}

/// Result type alias for dvrx operations
pub type Result<T> = std::result::Result<T, RxError>;
