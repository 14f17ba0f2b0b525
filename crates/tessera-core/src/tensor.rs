use std::fmt;

use crate::data::NestedData;
use crate::device::{self, Device};
use crate::dispatch::kernels_for;
use crate::error::TesseraError;
use crate::kernels::{typed, Kernels};
use crate::random;
use crate::shape::{Layout, Shape};
use crate::storage::{Buffer, Storage};
use crate::{with_dtype, DType, Element, Result};

/// How a freshly allocated tensor is filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPolicy {
    Zeros,
    Ones,
    /// Independent samples from `[0, 1)`; float dtypes only.
    UniformRandom,
    Value(f64),
}

/// An N-dimensional view over shared, device-resident storage.
///
/// A tensor is a [`Layout`] (shape, strides, offset) over a reference to
/// [`Storage`]. Views produced by slicing, transposing, reshaping or a
/// same-device `to` hold another reference to the same storage, so a write
/// through any of them is visible through all of them. Copying operations
/// allocate fresh storage.
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    layout: Layout,
    kernels: &'static dyn Kernels,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Wrap storage with a layout, resolving the kernel set for its device.
    pub fn from_storage(storage: Storage, layout: Layout) -> Result<Self> {
        if let Some(max) = layout.max_offset() {
            if max >= storage.numel() {
                return Err(TesseraError::IndexOutOfRange {
                    index: max as isize,
                    dim: 0,
                    size: storage.numel(),
                });
            }
        }
        Ok(Self::from_parts(storage, layout))
    }

    pub(crate) fn from_parts(storage: Storage, layout: Layout) -> Self {
        let kernels = kernels_for(storage.device().kind());
        Self {
            storage,
            layout,
            kernels,
        }
    }

    /// A new contiguous tensor owning `buffer`.
    pub(crate) fn from_buffer(buffer: Buffer, shape: Shape, device: Device) -> Self {
        Self::from_parts(Storage::from_buffer(buffer, device), Layout::contiguous(shape))
    }

    /// Another view of the same storage.
    pub(crate) fn view(&self, layout: Layout) -> Self {
        Self {
            storage: self.storage.clone(),
            layout,
            kernels: self.kernels,
        }
    }

    /// Build a tensor from nested literal data, inferring shape and dtype.
    ///
    /// Literal floats become `f32`, literal integers `i64`; a mix promotes
    /// to `f32`.
    pub fn from_data(data: impl Into<NestedData>) -> Result<Self> {
        let data = data.into();
        let dtype = data.infer_dtype();
        Self::from_data_with_dtype(data, dtype)
    }

    /// Build a tensor from nested literal data, converting every leaf to `dtype`.
    pub fn from_data_with_dtype(data: impl Into<NestedData>, dtype: DType) -> Result<Self> {
        let (shape, buffer) = data.into().into_buffer(dtype)?;
        Ok(Self::from_buffer(buffer, shape, Device::Cpu))
    }

    /// Create a tensor from a flat vector in row-major order.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(TesseraError::ShapeMismatch {
                op: "from_vec",
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self::from_buffer(T::into_buffer(data), shape, Device::Cpu))
    }

    pub fn from_slice<T: Element>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Allocate a host tensor.
    pub fn full(shape: impl Into<Shape>, fill: FillPolicy, dtype: DType) -> Result<Self> {
        Self::full_on(shape, fill, dtype, Device::Cpu)
    }

    /// Allocate a tensor on `device`.
    pub fn full_on(
        shape: impl Into<Shape>,
        fill: FillPolicy,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        device::ensure_available(device)?;
        let shape = shape.into();
        let numel = shape.numel();
        let buffer = match fill {
            FillPolicy::Zeros => Buffer::zeros(dtype, numel),
            FillPolicy::Ones => filled(dtype, numel, 1.0),
            FillPolicy::Value(v) => filled(dtype, numel, v),
            FillPolicy::UniformRandom => random::uniform(dtype, numel)?,
        };
        tracing::debug!("allocating {numel} x {dtype} on {device} ({fill:?})");
        Ok(Self::from_buffer(buffer, shape, device))
    }

    /// Zero-filled host tensor.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let buffer = Buffer::zeros(dtype, shape.numel());
        Self::from_buffer(buffer, shape, Device::Cpu)
    }

    /// Host tensor of ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full_value(shape, 1.0, dtype)
    }

    /// Tensor filled with `value`, converted to `dtype`.
    pub fn full_value(shape: impl Into<Shape>, value: f64, dtype: DType) -> Self {
        let shape = shape.into();
        let buffer = filled(dtype, shape.numel(), value);
        Self::from_buffer(buffer, shape, Device::Cpu)
    }

    /// Uniform samples from `[0, 1)`. Integer dtypes are rejected.
    pub fn rand(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::full(shape, FillPolicy::UniformRandom, dtype)
    }

    /// A 0-dimensional tensor holding `value`.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_buffer(T::into_buffer(vec![value]), Shape::scalar(), Device::Cpu)
    }

    /// 1-D tensor `[start, start + step, ...)` stopping before `end`.
    pub fn arange(start: f64, end: f64, step: f64, dtype: DType) -> Result<Self> {
        if step == 0.0 || !step.is_finite() {
            return Err(TesseraError::InvalidSlice(format!("arange step {step} must be finite and non-zero")));
        }
        let n = ((end - start) / step).ceil().max(0.0) as usize;
        let buffer = with_dtype!(dtype, T => T::into_buffer(
            (0..n).map(|i| T::from_f64(start + i as f64 * step)).collect()
        ));
        Ok(Self::from_buffer(buffer, Shape::new(&[n]), Device::Cpu))
    }

    /// A new tensor with `other`'s shape and device.
    pub fn like(other: &Tensor, dtype: Option<DType>, fill: FillPolicy) -> Result<Self> {
        let dtype = dtype.unwrap_or(other.dtype());
        Self::full_on(other.shape().clone(), fill, dtype, other.device())
    }

    pub fn zeros_like(other: &Tensor) -> Result<Self> {
        Self::like(other, None, FillPolicy::Zeros)
    }

    pub fn ones_like(other: &Tensor) -> Result<Self> {
        Self::like(other, None, FillPolicy::Ones)
    }

    /// Random tensor shaped like `other`; fails for integer tensors unless
    /// a float dtype is given.
    pub fn rand_like(other: &Tensor, dtype: Option<DType>) -> Result<Self> {
        Self::like(other, dtype, FillPolicy::UniformRandom)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    pub fn numel(&self) -> usize {
        self.layout.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }

    pub fn offset(&self) -> usize {
        self.layout.offset()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether both tensors view the same storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        self.storage.same_storage(&other.storage)
    }

    /// Name of the kernel set this tensor dispatches to.
    pub fn kernels_name(&self) -> &'static str {
        self.kernels.name()
    }

    pub(crate) fn kernels(&self) -> &'static dyn Kernels {
        self.kernels
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Move to `device`.
    ///
    /// On the same device this returns a view aliasing the same storage.
    /// Otherwise the logical contents are copied into new contiguous storage
    /// on `device`; later writes to either side are not seen by the other.
    pub fn to(&self, device: Device) -> Result<Tensor> {
        if device == self.device() {
            return Ok(self.clone());
        }
        device::ensure_available(device)?;
        let buffer = self.kernels.gather(&self.storage.read(), &self.layout)?;
        tracing::debug!(
            "copying {} x {} from {} to {}",
            self.numel(),
            self.dtype(),
            self.device(),
            device
        );
        Ok(Self::from_buffer(buffer, self.shape().clone(), device))
    }

    pub fn cpu(&self) -> Result<Tensor> {
        self.to(Device::Cpu)
    }

    // =========================================================================
    // Views and reshaping
    // =========================================================================

    /// Fix `dim` at `index` (negative counts from the end), dropping the dimension.
    pub fn select(&self, dim: isize, index: isize) -> Result<Tensor> {
        let dim = self.shape().resolve_axis(dim)?;
        let index = resolve_index(index, dim, self.dims()[dim])?;
        Ok(self.view(self.layout.select(dim, index)?))
    }

    /// `len` consecutive entries of `dim` starting at `start`.
    pub fn narrow(&self, dim: isize, start: usize, len: usize) -> Result<Tensor> {
        let dim = self.shape().resolve_axis(dim)?;
        Ok(self.view(self.layout.narrow(dim, start, len, 1)?))
    }

    /// Swap two dimensions without copying.
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Result<Tensor> {
        let d0 = self.shape().resolve_axis(dim0)?;
        let d1 = self.shape().resolve_axis(dim1)?;
        Ok(self.view(self.layout.transpose(d0, d1)?))
    }

    /// Matrix transpose. 0-D and 1-D tensors are returned as they are.
    pub fn t(&self) -> Result<Tensor> {
        match self.ndim() {
            0 | 1 => Ok(self.clone()),
            2 => self.transpose(0, 1),
            ndim => Err(TesseraError::InvalidAxis { axis: ndim - 1, ndim: 2 }),
        }
    }

    /// Reshape, inferring at most one `-1` extent.
    ///
    /// Contiguous tensors are reshaped as a view; others are copied first.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let shape = self
            .shape()
            .resolve_reshape(new_shape)
            .ok_or_else(|| TesseraError::InvalidReshape {
                numel: self.numel(),
                shape: new_shape.to_vec(),
            })?;
        let base = if self.is_contiguous() { self.clone() } else { self.contiguous()? };
        let strides = shape.contiguous_strides();
        Ok(base.view(Layout::new(shape, strides, base.offset())))
    }

    /// This tensor if already contiguous, otherwise a contiguous copy.
    pub fn contiguous(&self) -> Result<Tensor> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let buffer = self.kernels.gather(&self.storage.read(), &self.layout)?;
        Ok(Self::from_buffer(buffer, self.shape().clone(), self.device()))
    }

    /// Broadcast view; repeated dimensions share memory.
    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        Ok(self.view(self.layout.broadcast_to(&shape.into())?))
    }

    /// Convert to `dtype` on the same device. Same dtype is a view.
    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        let buffer = self.kernels.cast(&self.storage.read(), &self.layout, dtype)?;
        Ok(Self::from_buffer(buffer, self.shape().clone(), self.device()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Elements in logical row-major order. `T` must match the dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(TesseraError::DTypeMismatch {
                op: "to_vec",
                expected: self.dtype(),
                got: T::DTYPE,
            });
        }
        let buffer = self.kernels.gather(&self.storage.read(), &self.layout)?;
        Ok(typed::<T>("to_vec", &buffer)?.to_vec())
    }

    /// Elements converted to `f64`, in logical row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let buffer = self.storage.read();
        self.layout.offsets().filter_map(|i| buffer.get_f64(i)).collect()
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        if index.len() != self.ndim() {
            return Err(TesseraError::InvalidSlice(format!(
                "expected {} indices, got {}",
                self.ndim(),
                index.len()
            )));
        }
        let mut offset = self.offset();
        for (dim, ((&i, &size), &stride)) in index
            .iter()
            .zip(self.dims())
            .zip(self.strides())
            .enumerate()
        {
            if i >= size {
                return Err(TesseraError::IndexOutOfRange {
                    index: i as isize,
                    dim,
                    size,
                });
            }
            offset += i * stride;
        }
        let buffer = self.storage.read();
        buffer.get_f64(offset).ok_or(TesseraError::IndexOutOfRange {
            index: offset as isize,
            dim: 0,
            size: buffer.len(),
        })
    }

    /// The value of a single-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.numel() != 1 {
            return Err(TesseraError::ShapeMismatch {
                op: "item",
                expected: vec![1],
                got: self.dims().to_vec(),
            });
        }
        let index = vec![0; self.ndim()];
        self.get(&index)
    }
}

/// Resolve a possibly negative index against an extent.
pub(crate) fn resolve_index(index: isize, dim: usize, size: usize) -> Result<usize> {
    let resolved = if index < 0 { index + size as isize } else { index };
    if resolved < 0 || resolved >= size as isize {
        return Err(TesseraError::IndexOutOfRange { index, dim, size });
    }
    Ok(resolved as usize)
}

fn filled(dtype: DType, numel: usize, value: f64) -> Buffer {
    with_dtype!(dtype, T => T::into_buffer(vec![T::from_f64(value); numel]))
}

fn write_nested(f: &mut fmt::Formatter<'_>, values: &[String], dims: &[usize], indent: usize) -> fmt::Result {
    let Some((&n, rest)) = dims.split_first() else {
        return f.write_str(values.first().map(String::as_str).unwrap_or(""));
    };
    let chunk: usize = rest.iter().product();
    f.write_str("[")?;
    for i in 0..n {
        if i > 0 {
            if rest.is_empty() {
                f.write_str(", ")?;
            } else {
                write!(f, ",\n{:width$}", "", width = indent + 1)?;
            }
        }
        write_nested(f, &values[i * chunk..(i + 1) * chunk], rest, indent + 1)?;
    }
    f.write_str("]")
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let float = self.dtype().is_float();
        let values: Vec<String> = self
            .to_f64_vec()
            .into_iter()
            .map(|v| if float { format!("{v:.4}") } else { format!("{v}") })
            .collect();
        f.write_str("tensor(")?;
        write_nested(f, &values, self.dims(), "tensor(".len())?;
        if !self.device().is_cpu() {
            write!(f, ", device='{}'", self.device())?;
        }
        if !matches!(self.dtype(), DType::F32 | DType::I64) {
            write!(f, ", dtype={}", self.dtype())?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", self.shape())
            .field("dtype", &self.dtype())
            .field("device", &self.device())
            .field("strides", &self.strides())
            .field("offset", &self.offset())
            .finish()
    }
}
