//! Convenience re-exports for common tessera-core types.
//!
//! ```rust
//! use tessera_core::prelude::*;
//! ```

pub use crate::{nested, s};
pub use crate::{DType, Device, ExternalBuffer, FillPolicy, Shape, SliceArg, Tensor};
pub use crate::{Result, TesseraError};
