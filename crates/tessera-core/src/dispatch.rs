//! Op dispatch: device checks and the kernel table.
//!
//! The table is built once and never changes. A tensor resolves its kernel
//! set when it is created or moved to another device; operations then call
//! through the resolved set without any further lookup.

use std::sync::OnceLock;

use crate::device::{Device, DeviceKind};
use crate::error::TesseraError;
use crate::kernels::{AcceleratorKernels, HostKernels, Kernels};
use crate::tensor::Tensor;
use crate::Result;

/// Immutable per-device-kind kernel sets.
#[derive(Debug)]
pub struct KernelTable {
    host: HostKernels,
    accelerator: AcceleratorKernels,
}

impl KernelTable {
    fn new() -> Self {
        Self {
            host: HostKernels,
            accelerator: AcceleratorKernels,
        }
    }

    pub fn get(&self, kind: DeviceKind) -> &dyn Kernels {
        match kind {
            DeviceKind::Host => &self.host,
            DeviceKind::Accelerator => &self.accelerator,
        }
    }
}

static TABLE: OnceLock<KernelTable> = OnceLock::new();

/// The process-wide kernel table.
pub fn kernel_table() -> &'static KernelTable {
    TABLE.get_or_init(KernelTable::new)
}

/// Kernel set registered for a device kind.
pub fn kernels_for(kind: DeviceKind) -> &'static dyn Kernels {
    kernel_table().get(kind)
}

/// The single device shared by all operands of `op`.
pub fn common_device(op: &'static str, operands: &[&Tensor]) -> Result<Device> {
    let Some(first) = operands.first() else {
        return Err(TesseraError::ShapeMismatch {
            op,
            expected: vec![1],
            got: vec![0],
        });
    };
    let device = first.device();
    for other in &operands[1..] {
        if other.device() != device {
            return Err(TesseraError::DeviceMismatch {
                op,
                lhs: device,
                rhs: other.device(),
            });
        }
    }
    tracing::trace!("{op}: {} operand(s) on {device}", operands.len());
    Ok(device)
}
