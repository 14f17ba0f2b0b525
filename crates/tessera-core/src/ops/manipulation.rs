//! Tensor manipulation operations: concat, stack, unsqueeze.

use super::check_dtype;
use crate::dispatch::common_device;
use crate::error::TesseraError;
use crate::shape::{Layout, Shape, Strides};
use crate::storage::{Init, Storage};
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Concatenate tensors along a given dimension into new storage.
    ///
    /// All tensors must have the same rank, dtype and device, and the same
    /// extents except along `dim`.
    pub fn concat(tensors: &[&Tensor], dim: isize) -> Result<Tensor> {
        let device = common_device("concat", tensors)?;
        let first = tensors[0];
        let dim = first.shape().resolve_axis(dim)?;

        // Validate shapes match on all non-concat dims
        for t in &tensors[1..] {
            check_dtype("concat", first, t)?;
            let compatible = t.ndim() == first.ndim()
                && t.dims()
                    .iter()
                    .zip(first.dims())
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            if !compatible {
                return Err(TesseraError::ShapeMismatch {
                    op: "concat",
                    expected: first.dims().to_vec(),
                    got: t.dims().to_vec(),
                });
            }
        }

        let mut out_dims = first.dims().to_vec();
        out_dims[dim] = tensors.iter().map(|t| t.dims()[dim]).sum();
        let shape = Shape::from(out_dims);
        let storage = Storage::allocate(shape.numel(), first.dtype(), device, Init::Uninit);
        let out = Tensor::from_parts(storage, Layout::contiguous(shape));

        {
            let kernels = out.kernels();
            let mut dst = out.storage().write();
            let mut start = 0;
            for t in tensors {
                let len = t.dims()[dim];
                let region = out.layout().narrow(dim, start, len, 1)?;
                kernels.copy_strided(&mut dst, &region, &t.storage().read(), t.layout())?;
                start += len;
            }
        }
        Ok(out)
    }

    /// Alias for [`Tensor::concat`].
    pub fn cat(tensors: &[&Tensor], dim: isize) -> Result<Tensor> {
        Self::concat(tensors, dim)
    }

    /// Stack equally shaped tensors along a new dimension.
    pub fn stack(tensors: &[&Tensor], dim: isize) -> Result<Tensor> {
        let Some(first) = tensors.first() else {
            return Tensor::concat(tensors, dim);
        };
        for t in &tensors[1..] {
            if t.dims() != first.dims() {
                return Err(TesseraError::ShapeMismatch {
                    op: "stack",
                    expected: first.dims().to_vec(),
                    got: t.dims().to_vec(),
                });
            }
        }
        let unsqueezed = tensors
            .iter()
            .map(|t| t.unsqueeze(dim))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&Tensor> = unsqueezed.iter().collect();
        let dim = unsqueezed[0].shape().resolve_axis(dim)?;
        Tensor::concat(&refs, dim as isize)
    }

    /// Insert a dimension of extent 1 at `dim` (a view).
    pub fn unsqueeze(&self, dim: isize) -> Result<Tensor> {
        let ndim = self.ndim();
        let resolved = if dim < 0 { dim + ndim as isize + 1 } else { dim };
        if resolved < 0 || resolved > ndim as isize {
            return Err(TesseraError::InvalidAxis {
                axis: dim.unsigned_abs(),
                ndim: ndim + 1,
            });
        }
        let at = resolved as usize;
        let mut dims = self.dims().to_vec();
        let mut strides = Strides::from_slice(self.strides());
        let stride = if at < ndim { self.strides()[at] * self.dims()[at] } else { 1 };
        dims.insert(at, 1);
        strides.insert(at, stride);
        Ok(self.view(Layout::new(Shape::from(dims), strides, self.offset())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::{nested, DType, ErrorKind};

    #[test]
    fn test_concat_dim0() {
        let a = Tensor::from_data(nested![[1, 2, 3], [4, 5, 6]]).unwrap();
        let b = Tensor::from_data(nested![[7, 8, 9], [10, 11, 12]]).unwrap();
        let c = Tensor::concat(&[&a, &b], 0).unwrap();
        assert_eq!(c.dims(), &[4, 3]);
        assert_eq!(c.to_vec::<i64>().unwrap(), (1..=12).collect::<Vec<i64>>());
    }

    #[test]
    fn test_concat_dim1() {
        let a = Tensor::from_data(nested![[1, 2, 3], [4, 5, 6]]).unwrap();
        let b = Tensor::from_data(nested![[7, 8, 9], [10, 11, 12]]).unwrap();
        let c = Tensor::cat(&[&a, &b], 1).unwrap();
        assert_eq!(c.dims(), &[2, 6]);
        assert_eq!(c.to_vec::<i64>().unwrap(), vec![1, 2, 3, 7, 8, 9, 4, 5, 6, 10, 11, 12]);
    }

    #[test]
    fn test_concat_three_with_view() {
        let t = Tensor::ones([4, 4], DType::F32);
        let c = Tensor::concat(&[&t, &t, &t.t().unwrap()], 1).unwrap();
        assert_eq!(c.dims(), &[4, 12]);
        assert!(!c.shares_storage(&t));
    }

    #[test]
    fn test_concat_errors() {
        crate::device::test_devices();
        assert_eq!(Tensor::concat(&[], 0).unwrap_err().kind(), ErrorKind::Shape);

        let a = Tensor::ones([2, 3], DType::F32);
        let b = Tensor::ones([3, 3], DType::F32);
        assert_eq!(Tensor::concat(&[&a, &b], 1).unwrap_err().kind(), ErrorKind::Shape);

        let i = Tensor::ones([2, 3], DType::I32);
        assert_eq!(Tensor::concat(&[&a, &i], 0).unwrap_err().kind(), ErrorKind::DType);

        let d = a.to(Device::Cuda(0)).unwrap();
        assert_eq!(Tensor::concat(&[&a, &d], 0).unwrap_err().kind(), ErrorKind::DeviceMismatch);
    }

    #[test]
    fn test_stack() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0], [2]).unwrap();
        let b = Tensor::from_vec(vec![3.0f32, 4.0], [2]).unwrap();
        let s0 = Tensor::stack(&[&a, &b], 0).unwrap();
        assert_eq!(s0.dims(), &[2, 2]);
        assert_eq!(s0.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        let s1 = Tensor::stack(&[&a, &b], -1).unwrap();
        assert_eq!(s1.dims(), &[2, 2]);
        assert_eq!(s1.to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_unsqueeze() {
        let a = Tensor::zeros([2, 3], DType::F32);
        assert_eq!(a.unsqueeze(0).unwrap().dims(), &[1, 2, 3]);
        assert_eq!(a.unsqueeze(-1).unwrap().dims(), &[2, 3, 1]);
        assert!(a.unsqueeze(1).unwrap().is_contiguous());
        assert!(a.unsqueeze(4).is_err());
    }
}
