use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::interop::ExternalBuffer;
use crate::{with_dtype, DType, Device, Element};

/// Typed, contiguous element memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Buffer {
    /// Zero-filled buffer of `numel` elements.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        with_dtype!(dtype, T => T::into_buffer(vec![T::zero(); numel]))
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::U8(_) => DType::U8,
            Buffer::I32(_) => DType::I32,
            Buffer::I64(_) => DType::I64,
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Buffer::U8(v) => v.len(),
            Buffer::I32(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw native-endian bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Buffer::U8(v) => v,
            Buffer::I32(v) => bytemuck::cast_slice(v),
            Buffer::I64(v) => bytemuck::cast_slice(v),
            Buffer::F32(v) => bytemuck::cast_slice(v),
            Buffer::F64(v) => bytemuck::cast_slice(v),
        }
    }

    /// Typed view of the elements, if `T` matches the buffer dtype.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    /// Mutable typed view of the elements, if `T` matches the buffer dtype.
    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(self)
    }

    /// Element at `index` widened to f64.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_dtype!(self.dtype(), T => T::slice(self)?.get(index).map(|&v| v.to_f64()))
    }
}

/// Who owns the memory behind a [`Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOrigin {
    /// Allocated by the engine.
    Owned,
    /// Wraps memory handed over by an [`ExternalBuffer`]; the external
    /// handle keeps its own reference, so dropping the last view never
    /// frees memory the handle still addresses.
    External,
}

/// How a fresh allocation is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    Zeroed,
    /// The caller overwrites every element before reading. Safe Rust cannot
    /// hand out uninitialized memory, so this still zero-fills.
    Uninit,
}

#[derive(Debug)]
pub(crate) struct StorageCell {
    buffer: RwLock<Buffer>,
    device: Device,
}

impl StorageCell {
    pub(crate) fn new(buffer: Buffer, device: Device) -> Arc<Self> {
        Arc::new(Self {
            buffer: RwLock::new(buffer),
            device,
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Buffer> {
        self.buffer.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Buffer> {
        self.buffer.write()
    }
}

impl Drop for StorageCell {
    fn drop(&mut self) {
        let buffer = self.buffer.get_mut();
        tracing::trace!(
            "releasing {} storage: {} x {} on {}",
            buffer.dtype(),
            buffer.len(),
            buffer.dtype().element_size(),
            self.device
        );
    }
}

/// Shared, reference-counted tensor storage.
///
/// Cloning a `Storage` adds a reference to the same memory; views created
/// by slicing, transposing or same-device `to` all hold clones. Writes
/// through any clone are visible through every other one.
#[derive(Debug, Clone)]
pub struct Storage {
    cell: Arc<StorageCell>,
    dtype: DType,
    origin: StorageOrigin,
}

impl Storage {
    /// Allocate storage for `numel` elements of `dtype` on `device`.
    pub fn allocate(numel: usize, dtype: DType, device: Device, init: Init) -> Self {
        tracing::debug!("allocating {numel} x {dtype} on {device} ({init:?})");
        Self::from_buffer(Buffer::zeros(dtype, numel), device)
    }

    /// Allocate zeroed host storage.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        Self::allocate(numel, dtype, Device::Cpu, Init::Zeroed)
    }

    /// Take ownership of an existing buffer.
    pub fn from_buffer(buffer: Buffer, device: Device) -> Self {
        Self {
            dtype: buffer.dtype(),
            cell: StorageCell::new(buffer, device),
            origin: StorageOrigin::Owned,
        }
    }

    /// Create storage from a vector of elements (host).
    pub fn from_vec<T: Element>(data: Vec<T>) -> Self {
        Self::from_buffer(T::into_buffer(data), Device::Cpu)
    }

    /// Wrap the memory behind an external buffer handle, zero copy.
    pub fn alias(external: &ExternalBuffer) -> Self {
        let cell = external.cell();
        tracing::debug!("aliasing external {} buffer", external.dtype());
        Self {
            dtype: external.dtype(),
            cell: Arc::clone(cell),
            origin: StorageOrigin::External,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<StorageCell> {
        &self.cell
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.cell.device
    }

    pub fn origin(&self) -> StorageOrigin {
        self.origin
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.cell.read().len()
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.dtype.storage_bytes(self.numel())
    }

    /// Number of live holders (views and external handles) of this memory.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Whether this storage is uniquely owned.
    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    /// Whether both handles address the same memory.
    pub fn same_storage(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Lock the buffer for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Buffer> {
        self.cell.read()
    }

    /// Lock the buffer for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Buffer> {
        self.cell.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let s = Storage::zeros(DType::F32, 10);
        assert_eq!(s.dtype(), DType::F32);
        assert_eq!(s.device(), Device::Cpu);
        assert_eq!(s.numel(), 10);
        assert_eq!(s.nbytes(), 40);
        assert_eq!(s.origin(), StorageOrigin::Owned);
        assert!(s.read().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_vec() {
        let s = Storage::from_vec(vec![1.0f32, 2.0, 3.0]);
        assert_eq!(s.numel(), 3);
        assert_eq!(s.read().as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
        assert!(s.read().as_slice::<f64>().is_none());
    }

    #[test]
    fn test_shared_writes_visible() {
        let s1 = Storage::from_vec(vec![1.0f32, 2.0, 3.0]);
        let s2 = s1.clone();
        assert!(!s1.is_unique());
        assert!(s1.same_storage(&s2));

        s2.write().as_mut_slice::<f32>().unwrap()[0] = 99.0;
        assert_eq!(s1.read().as_slice::<f32>().unwrap()[0], 99.0);
    }

    #[test]
    fn test_ref_count_tracks_holders() {
        let s1 = Storage::zeros(DType::I64, 4);
        assert_eq!(s1.ref_count(), 1);
        let s2 = s1.clone();
        let s3 = s2.clone();
        assert_eq!(s1.ref_count(), 3);
        drop(s2);
        drop(s3);
        assert!(s1.is_unique());
    }

    #[test]
    fn test_allocate_on_accelerator() {
        let s = Storage::allocate(8, DType::F64, Device::Cuda(0), Init::Uninit);
        assert_eq!(s.device(), Device::Cuda(0));
        assert_eq!(s.nbytes(), 64);
    }

    #[test]
    fn test_buffer_bytes() {
        let b = Buffer::I32(vec![1, 2]);
        assert_eq!(b.as_bytes().len(), 8);
        assert_eq!(b.get_f64(1), Some(2.0));
        assert_eq!(b.get_f64(2), None);
    }
}
