//! Tensor operations: arithmetic, indexing, manipulation, reduction.
//!
//! Copying operations return tensors with new storage.
//! In-place variants are suffixed with `_` (e.g., `add_`) and write through
//! the receiver's storage.

pub mod arithmetic;
pub mod indexing;
pub mod inplace;
pub mod manipulation;
pub mod reduction;

pub use indexing::SliceArg;

use crate::error::TesseraError;
use crate::tensor::Tensor;
use crate::Result;

/// Both operands must share a dtype; there is no implicit promotion.
pub(crate) fn check_dtype(op: &'static str, lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(TesseraError::DTypeMismatch {
            op,
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    Ok(())
}
