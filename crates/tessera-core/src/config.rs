//! Device configuration: which accelerators exist and which device is the default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TesseraError;
use crate::Result;

/// Path to a JSON [`DeviceConfig`] file.
pub const ENV_CONFIG: &str = "TESSERA_CONFIG";
/// Number of CUDA-class accelerators present.
pub const ENV_CUDA_DEVICES: &str = "TESSERA_CUDA_DEVICES";
/// Number of MPS-class accelerators present.
pub const ENV_MPS_DEVICES: &str = "TESSERA_MPS_DEVICES";
/// Forced default device, e.g. `cpu` or `cuda:0`.
pub const ENV_DEVICE: &str = "TESSERA_DEVICE";
/// Seed for the process-wide random source.
pub const ENV_SEED: &str = "TESSERA_SEED";

/// Hardware capability flags and placement defaults, read once per process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of CUDA-class accelerators (probed first).
    pub cuda_devices: usize,

    /// Number of MPS-class accelerators (probed second).
    pub mps_devices: usize,

    /// Forced default device. When unset the first probed device wins.
    pub default_device: Option<String>,

    /// Seed for uniform random fills. Entropy-seeded when unset.
    pub seed: Option<u64>,
}

impl DeviceConfig {
    /// Host-only configuration.
    pub fn host_only() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TesseraError::Config(format!("invalid config JSON: {e}")))
    }

    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TesseraError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Build from the process environment.
    ///
    /// `TESSERA_CONFIG` names a JSON file used as the base; the individual
    /// variables override its fields. Unset variables keep the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(v) = lookup(ENV_CUDA_DEVICES) {
            config.cuda_devices = parse_var(ENV_CUDA_DEVICES, &v)?;
        }
        if let Some(v) = lookup(ENV_MPS_DEVICES) {
            config.mps_devices = parse_var(ENV_MPS_DEVICES, &v)?;
        }
        if let Some(v) = lookup(ENV_DEVICE) {
            config.default_device = Some(v.trim().to_string());
        }
        if let Some(v) = lookup(ENV_SEED) {
            config.seed = Some(parse_var(ENV_SEED, &v)?);
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TesseraError::Config(format!("{key}: cannot parse {value:?}")))
}
