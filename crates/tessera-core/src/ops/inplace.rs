//! In-place arithmetic.
//!
//! These write through the receiver's storage, so every view of that storage
//! sees the result, and the values that were there before are gone. All
//! checks run before the first write: a returned error means nothing changed.

use super::check_dtype;
use crate::dispatch::common_device;
use crate::error::TesseraError;
use crate::kernels::BinaryOp;
use crate::shape::Layout;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// self += other, with `other` broadcast to self's shape.
    pub fn add_(&self, other: &Tensor) -> Result<&Self> {
        self.binary_(BinaryOp::Add, other)
    }

    /// self -= other, with `other` broadcast to self's shape.
    pub fn sub_(&self, other: &Tensor) -> Result<&Self> {
        self.binary_(BinaryOp::Sub, other)
    }

    /// self *= other, with `other` broadcast to self's shape.
    pub fn mul_(&self, other: &Tensor) -> Result<&Self> {
        self.binary_(BinaryOp::Mul, other)
    }

    /// self /= other, with `other` broadcast to self's shape.
    pub fn div_(&self, other: &Tensor) -> Result<&Self> {
        self.binary_(BinaryOp::Div, other)
    }

    pub fn add_scalar_(&self, scalar: f64) -> Result<&Self> {
        self.scalar_(BinaryOp::Add, scalar)
    }

    pub fn sub_scalar_(&self, scalar: f64) -> Result<&Self> {
        self.scalar_(BinaryOp::Sub, scalar)
    }

    pub fn mul_scalar_(&self, scalar: f64) -> Result<&Self> {
        self.scalar_(BinaryOp::Mul, scalar)
    }

    pub fn div_scalar_(&self, scalar: f64) -> Result<&Self> {
        self.scalar_(BinaryOp::Div, scalar)
    }

    /// Set every element to `value`.
    pub fn fill_(&self, value: f64) -> Result<&Self> {
        self.check_writable("fill_")?;
        self.kernels().fill(&mut self.storage().write(), self.layout(), value)?;
        Ok(self)
    }

    pub fn zero_(&self) -> Result<&Self> {
        self.fill_(0.0)
    }

    /// Copy `src` into self, broadcasting it to self's shape and converting
    /// it to self's dtype.
    pub fn copy_(&self, src: &Tensor) -> Result<&Self> {
        common_device("copy_", &[self, src])?;
        self.check_writable("copy_")?;
        let src_layout = self.broadcast_operand("copy_", src)?;
        let packed = src
            .kernels()
            .cast(&src.storage().read(), &src_layout, self.dtype())?;
        let packed_layout = Layout::contiguous(self.shape());
        self.kernels()
            .copy_strided(&mut self.storage().write(), self.layout(), &packed, &packed_layout)?;
        Ok(self)
    }

    /// Transpose a matrix in place by swapping its strides. Storage is untouched.
    pub fn t_(&mut self) -> Result<&mut Self> {
        *self = self.t()?;
        Ok(self)
    }

    fn binary_(&self, op: BinaryOp, other: &Tensor) -> Result<&Self> {
        common_device(op.name(), &[self, other])?;
        check_dtype(op.name(), self, other)?;
        self.check_writable(op.name())?;
        let rhs_layout = self.broadcast_operand(op.name(), other)?;

        // Pack rhs before taking the write lock: it may alias self.
        let rhs = other.kernels().gather(&other.storage().read(), &rhs_layout)?;
        let rhs_layout = Layout::contiguous(self.shape());
        tracing::trace!("{}_ {} via {}", op.name(), self.shape(), self.kernels_name());
        self.kernels()
            .binary_inplace(op, &mut self.storage().write(), self.layout(), &rhs, &rhs_layout)?;
        Ok(self)
    }

    fn scalar_(&self, op: BinaryOp, scalar: f64) -> Result<&Self> {
        self.check_writable(op.name())?;
        self.kernels()
            .scalar_inplace(op, &mut self.storage().write(), self.layout(), scalar)?;
        Ok(self)
    }

    /// A broadcast view (stride 0 over extent > 1) maps several positions
    /// onto one element and cannot be written through.
    fn check_writable(&self, op: &'static str) -> Result<()> {
        if self.layout().has_internal_overlap() {
            return Err(TesseraError::InternalOverlap { op });
        }
        Ok(())
    }

    /// `other`'s layout broadcast to self's shape; self's shape never changes.
    fn broadcast_operand(&self, op: &'static str, other: &Tensor) -> Result<Layout> {
        other
            .layout()
            .broadcast_to(self.shape())
            .map_err(|_| TesseraError::Broadcast {
                op,
                a: self.dims().to_vec(),
                b: other.dims().to_vec(),
            })
    }
}
