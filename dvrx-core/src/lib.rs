//! dvrx core library
//!
//! A real-time digital-voice and trunked-radio receiver: sample sources
//! in, symbol recovery and modulation classification, multi-protocol sync
//! hunting and burst decoding, a P25 trunking state machine, and a gated
//! stereo/mono audio mixer out. The CLI crate wires these pieces to the
//! command line; this crate holds everything testable.

pub mod config;
pub mod dibit;
pub mod errors;
pub mod events;
pub mod fec;
pub mod filters;
pub mod jitter;
pub mod logging;
pub mod mixer;
pub mod modulation;
pub mod protocols;
pub mod receiver;
pub mod router;
pub mod sinks;
pub mod snr;
pub mod source;
pub mod symbol;
pub mod sync;
pub mod tables;
pub mod trunk;
pub mod vocoder;

// The canonical entry points.
pub use config::ReceiverConfig;
pub use errors::{Result, RxError};
pub use receiver::{Receiver, Runtime};
