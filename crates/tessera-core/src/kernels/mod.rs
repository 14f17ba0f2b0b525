//! Per-device kernel sets.
//!
//! Both sets implement [`Kernels`] with identical semantics. The host set runs
//! plain sequential loops; the accelerator set runs the same loops
//! data-parallel over output elements. Every call completes before it
//! returns.

pub mod accelerator;
pub mod host;

use std::fmt;

use crate::device::DeviceKind;
use crate::error::TesseraError;
use crate::shape::Layout;
use crate::storage::Buffer;
use crate::{Element, Result};

pub use accelerator::AcceleratorKernels;
pub use host::HostKernels;

/// Elementwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[inline]
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

/// Extents of a (batched) matrix product `[batch, m, k] @ [batch, k, n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub batch: usize,
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

/// A device's kernel set.
///
/// Layout arguments describe how a buffer is addressed; operand layouts of
/// binary kernels are already broadcast to the output shape. Destination
/// buffers are never the same memory as a source buffer: callers snapshot
/// aliasing sources first.
pub trait Kernels: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn kind(&self) -> DeviceKind;

    /// Copy the elements addressed by `layout` into a fresh contiguous buffer.
    fn gather(&self, src: &Buffer, layout: &Layout) -> Result<Buffer>;

    /// Write `src` (addressed by `src_layout`) through `dst_layout`.
    fn copy_strided(
        &self,
        dst: &mut Buffer,
        dst_layout: &Layout,
        src: &Buffer,
        src_layout: &Layout,
    ) -> Result<()>;

    /// Set every addressed element to `value`, converted to the buffer dtype.
    fn fill(&self, dst: &mut Buffer, layout: &Layout, value: f64) -> Result<()>;

    /// `lhs op rhs` into a fresh contiguous buffer.
    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Buffer,
        lhs_layout: &Layout,
        rhs: &Buffer,
        rhs_layout: &Layout,
    ) -> Result<Buffer>;

    /// `dst = dst op rhs` through `dst_layout`.
    fn binary_inplace(
        &self,
        op: BinaryOp,
        dst: &mut Buffer,
        dst_layout: &Layout,
        rhs: &Buffer,
        rhs_layout: &Layout,
    ) -> Result<()>;

    /// `dst = dst op scalar` through `dst_layout`.
    fn scalar_inplace(&self, op: BinaryOp, dst: &mut Buffer, layout: &Layout, scalar: f64) -> Result<()>;

    /// Batched matrix product of contiguous operands.
    fn matmul(&self, lhs: &Buffer, rhs: &Buffer, dims: MatmulDims) -> Result<Buffer>;

    /// Sum over `dim`, or over everything when `dim` is None.
    fn sum(&self, src: &Buffer, layout: &Layout, dim: Option<usize>) -> Result<Buffer>;

    /// Gather and convert to another dtype.
    fn cast(&self, src: &Buffer, layout: &Layout, dtype: crate::DType) -> Result<Buffer>;
}

pub(crate) fn typed<'a, T: Element>(op: &'static str, buffer: &'a Buffer) -> Result<&'a [T]> {
    T::slice(buffer).ok_or(TesseraError::DTypeMismatch {
        op,
        expected: T::DTYPE,
        got: buffer.dtype(),
    })
}

pub(crate) fn typed_mut<'a, T: Element>(op: &'static str, buffer: &'a mut Buffer) -> Result<&'a mut [T]> {
    let got = buffer.dtype();
    T::slice_mut(buffer).ok_or(TesseraError::DTypeMismatch {
        op,
        expected: T::DTYPE,
        got,
    })
}

/// Outer/axis/inner extents for reducing `dims` along `dim`.
pub(crate) fn split_at_dim(dims: &[usize], dim: usize) -> (usize, usize, usize) {
    let outer = dims[..dim].iter().product();
    let axis = dims[dim];
    let inner = dims[dim + 1..].iter().product();
    (outer, axis, inner)
}
