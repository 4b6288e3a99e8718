//! CLI configuration: a TOML file merged with command-line overrides.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};

use dvrx_core::config::ReceiverConfig;

/// On-disk configuration. Every field has a default so a bare
/// `dvrx --input wav:capture.wav` works without a file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CliConfig {
    pub receiver: ReceiverConfig,

    /// Input selector: `wav:<path>`, `dibits:<path>`, `tcp:<host:port>`,
    /// `udp:<bind-addr>`.
    pub input: Option<String>,
    /// Output selector: `device`, `stdout`, `udp:<addr>`, `wav:<dir>`,
    /// `null`.
    pub output: Option<String>,
    /// Hamlib-style rigctl endpoint for retunes: `host:port`.
    pub rigctl: Option<String>,

    /// Declared sample rate for network PCM inputs.
    pub input_rate: Option<u32>,

    pub groups_csv: Option<PathBuf>,
    pub lcn_csv: Option<PathBuf>,
    pub keys_csv: Option<PathBuf>,
    pub event_log: Option<PathBuf>,

    /// Static keystream specs (`bits:hexbytes[:offset[:step]]`).
    pub keystreams: Vec<String>,
}

impl CliConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
    }

    /// Split an `input`/`output` selector into (kind, rest).
    pub fn split_selector(selector: &str) -> Result<(&str, &str)> {
        match selector.split_once(':') {
            Some((kind, rest)) if !rest.is_empty() => Ok((kind, rest)),
            None => Ok((selector, "")),
            Some((_, _)) => Err(eyre!("empty selector argument in {:?}", selector)),
        }
    }
}
