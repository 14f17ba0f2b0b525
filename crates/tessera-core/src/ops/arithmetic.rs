//! Element-wise arithmetic and matrix multiplication. Every result is new storage.

use super::check_dtype;
use crate::dispatch::common_device;
use crate::error::TesseraError;
use crate::kernels::{BinaryOp, MatmulDims};
use crate::shape::{Layout, Shape};
use crate::storage::Buffer;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Element-wise addition: self + other.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(BinaryOp::Add, self, other)
    }

    /// Element-wise subtraction: self - other.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(BinaryOp::Sub, self, other)
    }

    /// Element-wise multiplication: self * other.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(BinaryOp::Mul, self, other)
    }

    /// Element-wise division: self / other. Integer division by zero yields 0.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(BinaryOp::Div, self, other)
    }

    pub fn add_scalar(&self, scalar: f64) -> Result<Tensor> {
        scalar_op(BinaryOp::Add, self, scalar)
    }

    pub fn sub_scalar(&self, scalar: f64) -> Result<Tensor> {
        scalar_op(BinaryOp::Sub, self, scalar)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Result<Tensor> {
        scalar_op(BinaryOp::Mul, self, scalar)
    }

    pub fn div_scalar(&self, scalar: f64) -> Result<Tensor> {
        scalar_op(BinaryOp::Div, self, scalar)
    }

    /// Matrix multiplication: self @ other.
    ///
    /// Supports:
    /// - [K] @ [K] → [] (dot product)
    /// - [M, K] @ [K] → [M] and [K] @ [K, N] → [N]
    /// - [M, K] @ [K, N] → [M, N]
    /// - [..., M, K] @ [..., K, N] → [..., M, N] with broadcast batch dims
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let device = common_device("matmul", &[self, other])?;
        check_dtype("matmul", self, other)?;
        let mismatch = || TesseraError::MatmulDimMismatch {
            lhs: self.dims().to_vec(),
            rhs: other.dims().to_vec(),
        };
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(mismatch());
        }

        // Promote vectors to matrices; the extra dim is dropped again below.
        let a_dims: Vec<usize> = match self.dims() {
            &[k] => vec![1, k],
            dims => dims.to_vec(),
        };
        let b_dims: Vec<usize> = match other.dims() {
            &[k] => vec![k, 1],
            dims => dims.to_vec(),
        };
        let (a_batch, a_mat) = a_dims.split_at(a_dims.len() - 2);
        let (b_batch, b_mat) = b_dims.split_at(b_dims.len() - 2);
        let (m, k) = (a_mat[0], a_mat[1]);
        let n = b_mat[1];
        if k != b_mat[0] {
            return Err(mismatch());
        }

        let batch = Shape::from(a_batch)
            .broadcast_with(&Shape::from(b_batch))
            .ok_or_else(|| TesseraError::Broadcast {
                op: "matmul",
                a: self.dims().to_vec(),
                b: other.dims().to_vec(),
            })?;
        let lhs = pack(self, &a_dims, batch.dims(), [m, k])?;
        let rhs = pack(other, &b_dims, batch.dims(), [k, n])?;

        let dims = MatmulDims {
            batch: batch.numel(),
            m,
            k,
            n,
        };
        tracing::trace!("matmul {dims:?} via {}", self.kernels_name());
        let buffer = self.kernels().matmul(&lhs, &rhs, dims)?;

        let mut out = batch.dims().to_vec();
        if self.ndim() > 1 {
            out.push(m);
        }
        if other.ndim() > 1 {
            out.push(n);
        }
        Ok(Tensor::from_buffer(buffer, Shape::from(out), device))
    }
}

/// Gather `t` (read as `dims`) broadcast to `batch ++ mat`, contiguously.
fn pack(t: &Tensor, dims: &[usize], batch: &[usize], mat: [usize; 2]) -> Result<Buffer> {
    let kernels = t.kernels();
    let flat = kernels.gather(&t.storage().read(), t.layout())?;
    let mut target = batch.to_vec();
    target.extend_from_slice(&mat);
    let layout = Layout::contiguous(dims).broadcast_to(&Shape::from(target))?;
    kernels.gather(&flat, &layout)
}

fn binary_op(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let device = common_device(op.name(), &[a, b])?;
    check_dtype(op.name(), a, b)?;
    let shape = a
        .shape()
        .broadcast_with(b.shape())
        .ok_or_else(|| TesseraError::Broadcast {
            op: op.name(),
            a: a.dims().to_vec(),
            b: b.dims().to_vec(),
        })?;
    let la = a.layout().broadcast_to(&shape)?;
    let lb = b.layout().broadcast_to(&shape)?;

    tracing::trace!("{} {shape} via {}", op.name(), a.kernels_name());
    let kernels = a.kernels();
    let buffer = if a.shares_storage(b) {
        let memory = a.storage().read();
        kernels.binary(op, &memory, &la, &memory, &lb)?
    } else {
        kernels.binary(op, &a.storage().read(), &la, &b.storage().read(), &lb)?
    };
    Ok(Tensor::from_buffer(buffer, shape, device))
}

fn scalar_op(op: BinaryOp, a: &Tensor, scalar: f64) -> Result<Tensor> {
    let kernels = a.kernels();
    let mut buffer = kernels.gather(&a.storage().read(), a.layout())?;
    let layout = Layout::contiguous(a.shape());
    kernels.scalar_inplace(op, &mut buffer, &layout, scalar)?;
    Ok(Tensor::from_buffer(buffer, a.shape().clone(), a.device()))
}

// Operator overloads panic on error; use the methods to handle failures.

impl std::ops::Add for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Tensor {
        Tensor::add(self, rhs).expect("Add failed")
    }
}

impl std::ops::Sub for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Tensor {
        Tensor::sub(self, rhs).expect("Sub failed")
    }
}

impl std::ops::Mul for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Tensor {
        Tensor::mul(self, rhs).expect("Mul failed")
    }
}

impl std::ops::Div for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Tensor {
        Tensor::div(self, rhs).expect("Div failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::{nested, DType, ErrorKind};

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{x} vs {y}");
        }
    }

    #[test]
    fn test_add_same_shape() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], [3]).unwrap();
        let b = Tensor::from_vec(vec![4.0f32, 5.0, 6.0], [3]).unwrap();
        let c = &a + &b;
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
        assert!(!c.shares_storage(&a));
    }

    #[test]
    fn test_broadcast_mul() {
        let a = Tensor::from_data(nested![[1, 2, 3], [4, 5, 6]]).unwrap();
        let b = Tensor::from_data(nested![10, 100, 1000]).unwrap();
        let c = a.mul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.to_vec::<i64>().unwrap(), vec![10, 200, 3000, 40, 500, 6000]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Tensor::ones([2, 3], DType::F32);
        let b = Tensor::ones([4, 3], DType::F32);
        let err = a.add(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_dtype_mismatch() {
        let a = Tensor::ones([2], DType::F32);
        let b = Tensor::ones([2], DType::I64);
        let err = a.sub(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DType);
    }

    #[test]
    fn test_device_mismatch() {
        crate::device::test_devices();
        let a = Tensor::ones([2], DType::F32);
        let b = Tensor::ones([2], DType::F32).to(Device::Cuda(0)).unwrap();
        let err = a.mul(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceMismatch);
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_self_multiply_squares() {
        let a = Tensor::arange(0.0, 4.0, 1.0, DType::F32).unwrap();
        let sq = a.mul(&a).unwrap();
        assert_eq!(sq.to_vec::<f32>().unwrap(), vec![0.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_integer_div_by_zero() {
        let a = Tensor::from_vec(vec![7i32, 8], [2]).unwrap();
        let b = Tensor::from_vec(vec![2i32, 0], [2]).unwrap();
        assert_eq!(a.div(&b).unwrap().to_vec::<i32>().unwrap(), vec![3, 0]);
    }

    #[test]
    fn test_scalar_ops() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0], [2]).unwrap();
        assert_close(&a.add_scalar(0.5).unwrap().to_vec::<f32>().unwrap(), &[1.5, 2.5]);
        assert_close(&a.mul_scalar(3.0).unwrap().to_vec::<f32>().unwrap(), &[3.0, 6.0]);
        assert_close(&a.div_scalar(4.0).unwrap().to_vec::<f32>().unwrap(), &[0.25, 0.5]);
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let b = Tensor::from_vec(vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0], [3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_with_transpose_view() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let c = a.matmul(&a.t().unwrap()).unwrap();
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![5.0, 11.0, 11.0, 25.0]);
    }

    #[test]
    fn test_matmul_vectors() {
        let v = Tensor::from_vec(vec![1i64, 2, 3], [3]).unwrap();
        let dot = v.matmul(&v).unwrap();
        assert_eq!(dot.ndim(), 0);
        assert_eq!(dot.item().unwrap(), 14.0);

        let m = Tensor::from_vec(vec![1i64, 0, 0, 0, 1, 0], [2, 3]).unwrap();
        let mv = m.matmul(&v).unwrap();
        assert_eq!(mv.dims(), &[2]);
        assert_eq!(mv.to_vec::<i64>().unwrap(), vec![1, 2]);

        let vm = v.matmul(&m.t().unwrap()).unwrap();
        assert_eq!(vm.dims(), &[2]);
        assert_eq!(vm.to_vec::<i64>().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_matmul_broadcast_batch() {
        let a = Tensor::ones([2, 1, 2, 3], DType::F64);
        let b = Tensor::ones([4, 3, 5], DType::F64);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 4, 2, 5]);
        assert!(c.to_f64_vec().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let a = Tensor::ones([2, 3], DType::F32);
        let b = Tensor::ones([4, 2], DType::F32);
        let err = a.matmul(&b).unwrap_err();
        assert_eq!(err, TesseraError::MatmulDimMismatch { lhs: vec![2, 3], rhs: vec![4, 2] });
    }

    #[test]
    fn test_accelerator_matches_host() {
        crate::device::test_devices();
        let a = Tensor::rand([3, 8, 8], DType::F32).unwrap();
        let b = Tensor::rand([8, 4], DType::F32).unwrap();
        let host = a.matmul(&b).unwrap();
        let dev = a
            .to(Device::Mps(0))
            .unwrap()
            .matmul(&b.to(Device::Mps(0)).unwrap())
            .unwrap();
        assert_eq!(dev.device(), Device::Mps(0));
        assert_eq!(host.to_vec::<f32>().unwrap(), dev.to_vec::<f32>().unwrap());
    }
}
