use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::config::DeviceConfig;
use crate::error::TesseraError;
use crate::Result;

/// Compute device for tensor storage and operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// CUDA-class accelerator with device index.
    Cuda(usize),
    /// MPS-class accelerator with device index.
    Mps(usize),
}

/// Which kernel table a device uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Host,
    Accelerator,
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Cpu => DeviceKind::Host,
            Device::Cuda(_) | Device::Mps(_) => DeviceKind::Accelerator,
        }
    }

    /// Whether this is the host device.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Whether this is any accelerator.
    pub fn is_accelerator(&self) -> bool {
        self.kind() == DeviceKind::Accelerator
    }

    /// Accelerator index, if applicable.
    pub fn index(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) | Device::Mps(idx) => Some(*idx),
            Device::Cpu => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
            Device::Mps(idx) => write!(f, "mps:{idx}"),
        }
    }
}

impl FromStr for Device {
    type Err = TesseraError;

    /// Parses `cpu`, `cuda`, `cuda:N`, `mps`, `mps:N`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (name, idx) = match s.split_once(':') {
            Some((name, idx)) => {
                let idx = idx
                    .parse::<usize>()
                    .map_err(|_| TesseraError::Config(format!("bad device index in {s:?}")))?;
                (name, Some(idx))
            }
            None => (s.as_str(), None),
        };
        match (name, idx) {
            ("cpu", None) => Ok(Device::Cpu),
            ("cuda", idx) => Ok(Device::Cuda(idx.unwrap_or(0))),
            ("mps", idx) => Ok(Device::Mps(idx.unwrap_or(0))),
            _ => Err(TesseraError::Config(format!("unknown device {s:?}"))),
        }
    }
}

/// List available devices in probe order: CUDA-class, MPS-class, host.
pub fn probe(config: &DeviceConfig) -> Vec<Device> {
    (0..config.cuda_devices)
        .map(Device::Cuda)
        .chain((0..config.mps_devices).map(Device::Mps))
        .chain(std::iter::once(Device::Cpu))
        .collect()
}

/// Pick the default device: the forced one if configured, else the first probed.
pub fn select_default(config: &DeviceConfig, available: &[Device]) -> Result<Device> {
    match config.default_device.as_deref() {
        Some(name) => {
            let device: Device = name.parse()?;
            if available.contains(&device) {
                Ok(device)
            } else {
                Err(TesseraError::Config(format!(
                    "default device {device} is not available (found {})",
                    join(available)
                )))
            }
        }
        None => Ok(available.first().copied().unwrap_or(Device::Cpu)),
    }
}

fn join(devices: &[Device]) -> String {
    devices.iter().map(Device::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Debug)]
struct DeviceRuntime {
    config: DeviceConfig,
    available: Vec<Device>,
    default: Device,
}

impl DeviceRuntime {
    fn new(config: DeviceConfig) -> Result<Self> {
        let available = probe(&config);
        let default = select_default(&config, &available)?;
        tracing::info!("devices: [{}], default {}", join(&available), default);
        Ok(Self {
            config,
            available,
            default,
        })
    }
}

static RUNTIME: OnceLock<DeviceRuntime> = OnceLock::new();

fn load_config() -> DeviceConfig {
    DeviceConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("ignoring device environment: {e}");
        DeviceConfig::host_only()
    })
}

fn runtime() -> &'static DeviceRuntime {
    RUNTIME.get_or_init(|| {
        let config = load_config();
        DeviceRuntime::new(config.clone()).unwrap_or_else(|e| {
            tracing::warn!("{e}; falling back to probe order");
            let available = probe(&config);
            DeviceRuntime {
                default: available.first().copied().unwrap_or(Device::Cpu),
                config,
                available,
            }
        })
    })
}

/// Install the process-wide device configuration.
///
/// Must run before anything reads the default device. Re-installing an
/// identical configuration is a no-op; a different one is rejected.
pub fn init(config: DeviceConfig) -> Result<Device> {
    if let Some(existing) = RUNTIME.get() {
        return check_same(existing, &config);
    }
    let fresh = DeviceRuntime::new(config.clone())?;
    match RUNTIME.set(fresh) {
        Ok(()) => {
            if let Some(seed) = config.seed {
                crate::random::manual_seed(seed);
            }
            Ok(default_device())
        }
        Err(_) => check_same(runtime(), &config),
    }
}

fn check_same(existing: &DeviceRuntime, config: &DeviceConfig) -> Result<Device> {
    if existing.config == *config {
        Ok(existing.default)
    } else {
        Err(TesseraError::Config(
            "device configuration already initialized with different settings".into(),
        ))
    }
}

/// The process-wide default device, initialized from the environment on first use.
pub fn default_device() -> Device {
    runtime().default
}

/// Devices found at initialization, in probe order.
pub fn available_devices() -> &'static [Device] {
    &runtime().available
}

/// Whether `device` was found at initialization.
pub fn is_available(device: Device) -> bool {
    runtime().available.contains(&device)
}

/// The configuration the runtime was initialized with.
pub fn config() -> &'static DeviceConfig {
    &runtime().config
}

/// The installed configuration, without initializing the runtime.
pub fn installed_config() -> Option<&'static DeviceConfig> {
    RUNTIME.get().map(|r| &r.config)
}

/// Fail with a `Config` error unless `device` is available.
pub(crate) fn ensure_available(device: Device) -> Result<()> {
    if device.is_cpu() || is_available(device) {
        Ok(())
    } else {
        Err(TesseraError::Config(format!(
            "device {device} is not available (found {})",
            join(available_devices())
        )))
    }
}

/// One emulated accelerator of each class with the host as default.
#[cfg(test)]
pub(crate) fn test_config() -> DeviceConfig {
    DeviceConfig {
        cuda_devices: 1,
        mps_devices: 1,
        default_device: Some("cpu".into()),
        seed: None,
    }
}

/// Install [`test_config`]; unit tests that place tensors on accelerators
/// call this first.
#[cfg(test)]
pub(crate) fn test_devices() -> Device {
    init(test_config()).expect("unit-test device configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_properties() {
        assert!(Device::Cpu.is_cpu());
        assert!(!Device::Cpu.is_accelerator());
        assert!(Device::Cuda(0).is_accelerator());
        assert_eq!(Device::Mps(1).index(), Some(1));
        assert_eq!(Device::Cpu.index(), None);
        assert_eq!(Device::Cuda(3).kind(), DeviceKind::Accelerator);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Device::Cpu), "cpu");
        assert_eq!(format!("{}", Device::Cuda(0)), "cuda:0");
        assert_eq!(format!("{}", Device::Mps(2)), "mps:2");
    }

    #[test]
    fn test_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert_eq!("mps".parse::<Device>().unwrap(), Device::Mps(0));
        assert!("tpu:0".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
        assert!("cpu:0".parse::<Device>().is_err());
    }

    #[test]
    fn test_probe_order() {
        let config = DeviceConfig {
            cuda_devices: 2,
            mps_devices: 1,
            ..DeviceConfig::default()
        };
        assert_eq!(
            probe(&config),
            vec![Device::Cuda(0), Device::Cuda(1), Device::Mps(0), Device::Cpu]
        );
        let available = probe(&config);
        assert_eq!(select_default(&config, &available).unwrap(), Device::Cuda(0));
    }

    #[test]
    fn test_select_default_fallbacks() {
        let mps_only = DeviceConfig {
            mps_devices: 1,
            ..DeviceConfig::default()
        };
        assert_eq!(select_default(&mps_only, &probe(&mps_only)).unwrap(), Device::Mps(0));

        let host = DeviceConfig::host_only();
        assert_eq!(select_default(&host, &probe(&host)).unwrap(), Device::Cpu);

        let forced = DeviceConfig {
            default_device: Some("cuda:0".into()),
            ..DeviceConfig::default()
        };
        assert!(select_default(&forced, &probe(&forced)).is_err());
    }

    #[test]
    fn test_runtime_defaults() {
        assert_eq!(test_devices(), Device::Cpu);
        assert_eq!(default_device(), Device::Cpu);
        assert_eq!(installed_config(), Some(&test_config()));
        assert!(is_available(Device::Cuda(0)));
        assert!(is_available(Device::Mps(0)));
        assert!(!is_available(Device::Cuda(1)));
        assert!(ensure_available(Device::Cuda(5)).is_err());
    }

    #[test]
    fn test_reinit_with_other_config_rejected() {
        test_devices();
        assert!(init(DeviceConfig::host_only()).is_err());
        assert_eq!(init(test_config()).unwrap(), Device::Cpu);
        assert!(ensure_available(Device::Cpu).is_ok());
    }
}
