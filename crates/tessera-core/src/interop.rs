//! Zero-copy exchange with external array buffers.
//!
//! An [`ExternalBuffer`] is an array handle owned outside the engine, in the
//! manner of a NumPy ndarray: typed host memory plus its own shape, strides
//! and offset. Converting between a handle and a tensor never copies; both
//! sides hold a reference to the same memory and see each other's writes.

use std::sync::Arc;

use crate::device::{Device, DeviceKind};
use crate::dispatch::kernels_for;
use crate::error::TesseraError;
use crate::kernels::{typed, typed_mut, BinaryOp};
use crate::shape::{Layout, Shape, Strides};
use crate::storage::{Storage, StorageCell};
use crate::tensor::Tensor;
use crate::{DType, Element, Result};

/// A host array handle sharing memory with zero or more tensors.
#[derive(Debug, Clone)]
pub struct ExternalBuffer {
    cell: Arc<StorageCell>,
    dtype: DType,
    layout: Layout,
}

impl ExternalBuffer {
    /// Wrap a row-major vector as an array of `shape`.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(TesseraError::Format(format!(
                "{} elements cannot form an array of shape {shape}",
                data.len()
            )));
        }
        Ok(Self {
            cell: StorageCell::new(T::into_buffer(data), Device::Cpu),
            dtype: T::DTYPE,
            layout: Layout::contiguous(shape),
        })
    }

    /// Another handle over the same memory with explicit geometry.
    pub fn as_strided(&self, shape: impl Into<Shape>, strides: &[usize], offset: usize) -> Result<Self> {
        let shape = shape.into();
        if strides.len() != shape.ndim() {
            return Err(TesseraError::Format(format!(
                "{} strides given for a {}-d shape",
                strides.len(),
                shape.ndim()
            )));
        }
        let layout = Layout::new(shape, Strides::from_slice(strides), offset);
        let len = self.cell.read().len();
        if layout.max_offset().is_some_and(|max| max >= len) {
            return Err(TesseraError::Format(format!(
                "strided view reaches past the end of {len} elements"
            )));
        }
        Ok(Self {
            cell: Arc::clone(&self.cell),
            dtype: self.dtype,
            layout,
        })
    }

    pub(crate) fn cell(&self) -> &Arc<StorageCell> {
        &self.cell
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }

    pub fn offset(&self) -> usize {
        self.layout.offset()
    }

    pub fn numel(&self) -> usize {
        self.layout.numel()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Elements in logical row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let buffer = self.cell.read();
        let data = typed::<T>("to_vec", &buffer)?;
        Ok(self.layout.offsets().map(|i| data[i]).collect())
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        let at = self.physical(index)?;
        let buffer = self.cell.read();
        Ok(typed::<T>("get", &buffer)?[at])
    }

    pub fn set<T: Element>(&self, index: &[usize], value: T) -> Result<()> {
        let at = self.physical(index)?;
        let mut buffer = self.cell.write();
        typed_mut::<T>("set", &mut buffer)?[at] = value;
        Ok(())
    }

    /// Set every element of the array to `value`.
    pub fn fill(&self, value: f64) -> Result<()> {
        kernels_for(DeviceKind::Host).fill(&mut self.cell.write(), &self.layout, value)
    }

    /// Add `value` to every element, writing the result back into the array.
    pub fn add_scalar(&self, value: f64) -> Result<()> {
        kernels_for(DeviceKind::Host).scalar_inplace(BinaryOp::Add, &mut self.cell.write(), &self.layout, value)
    }

    /// Copy of the array's elements as native-endian bytes.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let packed = kernels_for(DeviceKind::Host).gather(&self.cell.read(), &self.layout)?;
        Ok(packed.as_bytes().to_vec())
    }

    /// Whether both handles address the same memory.
    pub fn same_memory(&self, other: &ExternalBuffer) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn physical(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.layout.ndim() {
            return Err(TesseraError::InvalidSlice(format!(
                "expected {} indices, got {}",
                self.layout.ndim(),
                index.len()
            )));
        }
        let mut at = self.layout.offset();
        for (dim, ((&i, &size), &stride)) in index
            .iter()
            .zip(self.layout.dims())
            .zip(self.layout.strides())
            .enumerate()
        {
            if i >= size {
                return Err(TesseraError::IndexOutOfRange { index: i as isize, dim, size });
            }
            at += i * stride;
        }
        Ok(at)
    }
}

impl Tensor {
    /// Share this tensor's memory as an external array handle.
    ///
    /// Host tensors with canonical row-major strides only; the handle and the
    /// tensor alias the same memory afterwards.
    pub fn to_external(&self) -> Result<ExternalBuffer> {
        if !self.device().is_cpu() {
            return Err(TesseraError::DeviceMismatch {
                op: "to_external",
                lhs: self.device(),
                rhs: Device::Cpu,
            });
        }
        if !self.is_contiguous() {
            return Err(TesseraError::Format(format!(
                "strides {:?} are not row-major for shape {}; call contiguous() first",
                self.strides(),
                self.shape()
            )));
        }
        Ok(ExternalBuffer {
            cell: Arc::clone(self.storage().cell()),
            dtype: self.dtype(),
            layout: self.layout().clone(),
        })
    }

    /// View an external array as a tensor without copying.
    ///
    /// The handle's dtype must match its memory, its strides must be
    /// row-major and its extent must fit the memory.
    pub fn from_external(buffer: &ExternalBuffer) -> Result<Tensor> {
        let (actual, len) = {
            let memory = buffer.cell.read();
            (memory.dtype(), memory.len())
        };
        if actual != buffer.dtype {
            return Err(TesseraError::Format(format!(
                "handle claims {} but memory holds {actual}",
                buffer.dtype
            )));
        }
        if !buffer.is_contiguous() {
            return Err(TesseraError::Format(format!(
                "strides {:?} are not row-major for shape {}",
                buffer.strides(),
                buffer.shape()
            )));
        }
        if buffer.offset() + buffer.numel() > len {
            return Err(TesseraError::Format(format!(
                "offset {} + {} elements exceeds {len} elements of memory",
                buffer.offset(),
                buffer.numel()
            )));
        }
        Ok(Tensor::from_parts(Storage::alias(buffer), buffer.layout.clone()))
    }
}
