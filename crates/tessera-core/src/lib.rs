//! # tessera-core
//!
//! Core tensor engine for Tessera.
//!
//! Provides the `Tensor` type with:
//! - Typed storage (u8, i32, i64, f32, f64) shared by reference count
//! - Zero-copy views (slice, transpose, reshape, broadcast)
//! - Host and accelerator placement with per-device kernel sets
//! - Copying and in-place arithmetic, matmul, concat and reductions
//! - Zero-copy exchange with external array buffers

pub mod config;
pub mod data;
pub mod device;
pub mod dispatch;
pub mod dtype;
pub mod error;
pub mod interop;
pub mod kernels;
pub mod ops;
pub mod prelude;
pub mod random;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use config::DeviceConfig;
pub use data::{NestedData, Scalar};
pub use device::{Device, DeviceKind};
pub use dtype::{DType, Element};
pub use error::{ErrorKind, TesseraError};
pub use interop::ExternalBuffer;
pub use ops::SliceArg;
pub use shape::{Layout, Shape};
pub use storage::{Buffer, Storage, StorageOrigin};
pub use tensor::{FillPolicy, Tensor};

pub type Result<T> = std::result::Result<T, TesseraError>;
