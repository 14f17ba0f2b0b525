//! Process-wide random source for uniform fills.

use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ENV_SEED;
use crate::error::TesseraError;
use crate::storage::Buffer;
use crate::{device, DType, Result};

static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

// Reads the installed device configuration if there is one, else the
// environment. Never initializes the device runtime.
fn initial_seed() -> Option<u64> {
    match device::installed_config() {
        Some(config) => config.seed,
        None => std::env::var(ENV_SEED).ok()?.trim().parse().ok(),
    }
}

fn rng() -> &'static Mutex<StdRng> {
    RNG.get_or_init(|| {
        let rng = match initial_seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Mutex::new(rng)
    })
}

/// Reseed the process-wide generator.
pub fn manual_seed(seed: u64) {
    let seeded = || StdRng::seed_from_u64(seed);
    *RNG.get_or_init(|| Mutex::new(seeded())).lock() = seeded();
}

/// Draw `numel` independent samples uniformly from `[0, 1)`.
///
/// Samples are drawn natively in the target precision, so an f32 sample can
/// never round up to 1.0. Integer dtypes are rejected.
pub fn uniform(dtype: DType, numel: usize) -> Result<Buffer> {
    let mut rng = rng().lock();
    match dtype {
        DType::F32 => Ok(Buffer::F32((0..numel).map(|_| rng.gen::<f32>()).collect())),
        DType::F64 => Ok(Buffer::F64((0..numel).map(|_| rng.gen::<f64>()).collect())),
        other => Err(TesseraError::UnsupportedDType {
            op: "uniform",
            dtype: other,
        }),
    }
}
