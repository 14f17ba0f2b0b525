//! Sequential host kernels.

use super::{split_at_dim, typed, typed_mut, BinaryOp, Kernels, MatmulDims};
use crate::device::DeviceKind;
use crate::shape::Layout;
use crate::storage::Buffer;
use crate::{with_dtype, DType, Element, Result};

/// Kernel set for host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostKernels;

impl Kernels for HostKernels {
    fn name(&self) -> &'static str {
        "host"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Host
    }

    fn gather(&self, src: &Buffer, layout: &Layout) -> Result<Buffer> {
        with_dtype!(src.dtype(), T => {
            let s = typed::<T>("gather", src)?;
            Ok(T::into_buffer(layout.offsets().map(|i| s[i]).collect()))
        })
    }

    fn copy_strided(
        &self,
        dst: &mut Buffer,
        dst_layout: &Layout,
        src: &Buffer,
        src_layout: &Layout,
    ) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let s = typed::<T>("copy", src)?;
            let d = typed_mut::<T>("copy", dst)?;
            for (di, si) in dst_layout.offsets().zip(src_layout.offsets()) {
                d[di] = s[si];
            }
            Ok(())
        })
    }

    fn fill(&self, dst: &mut Buffer, layout: &Layout, value: f64) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let v = T::from_f64(value);
            let d = typed_mut::<T>("fill", dst)?;
            for i in layout.offsets() {
                d[i] = v;
            }
            Ok(())
        })
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Buffer,
        lhs_layout: &Layout,
        rhs: &Buffer,
        rhs_layout: &Layout,
    ) -> Result<Buffer> {
        with_dtype!(lhs.dtype(), T => {
            let a = typed::<T>(op.name(), lhs)?;
            let b = typed::<T>(op.name(), rhs)?;
            let out: Vec<T> = lhs_layout
                .offsets()
                .zip(rhs_layout.offsets())
                .map(|(i, j)| op.apply(a[i], b[j]))
                .collect();
            Ok(T::into_buffer(out))
        })
    }

    fn binary_inplace(
        &self,
        op: BinaryOp,
        dst: &mut Buffer,
        dst_layout: &Layout,
        rhs: &Buffer,
        rhs_layout: &Layout,
    ) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let b = typed::<T>(op.name(), rhs)?;
            let d = typed_mut::<T>(op.name(), dst)?;
            for (i, j) in dst_layout.offsets().zip(rhs_layout.offsets()) {
                d[i] = op.apply(d[i], b[j]);
            }
            Ok(())
        })
    }

    fn scalar_inplace(&self, op: BinaryOp, dst: &mut Buffer, layout: &Layout, scalar: f64) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let s = T::from_f64(scalar);
            let d = typed_mut::<T>(op.name(), dst)?;
            for i in layout.offsets() {
                d[i] = op.apply(d[i], s);
            }
            Ok(())
        })
    }

    fn matmul(&self, lhs: &Buffer, rhs: &Buffer, dims: MatmulDims) -> Result<Buffer> {
        with_dtype!(lhs.dtype(), T => {
            let a = typed::<T>("matmul", lhs)?;
            let b = typed::<T>("matmul", rhs)?;
            let MatmulDims { batch, m, k, n } = dims;
            let mut c = vec![T::zero(); batch * m * n];

            for bi in 0..batch {
                let a_off = bi * m * k;
                let b_off = bi * k * n;
                let c_off = bi * m * n;
                for i in 0..m {
                    for j in 0..n {
                        let mut sum = T::zero();
                        for p in 0..k {
                            sum = sum.add(a[a_off + i * k + p].mul(b[b_off + p * n + j]));
                        }
                        c[c_off + i * n + j] = sum;
                    }
                }
            }
            Ok(T::into_buffer(c))
        })
    }

    fn sum(&self, src: &Buffer, layout: &Layout, dim: Option<usize>) -> Result<Buffer> {
        with_dtype!(src.dtype(), T => {
            let s = typed::<T>("sum", src)?;
            let values: Vec<T> = layout.offsets().map(|i| s[i]).collect();
            let out = match dim {
                None => vec![values.iter().fold(T::zero(), |acc, &v| acc.add(v))],
                Some(dim) => {
                    let (outer, axis, inner) = split_at_dim(layout.dims(), dim);
                    let mut out = vec![T::zero(); outer * inner];
                    for o in 0..outer {
                        for a in 0..axis {
                            let base = (o * axis + a) * inner;
                            for i in 0..inner {
                                out[o * inner + i] = out[o * inner + i].add(values[base + i]);
                            }
                        }
                    }
                    out
                }
            };
            Ok(T::into_buffer(out))
        })
    }

    fn cast(&self, src: &Buffer, layout: &Layout, dtype: DType) -> Result<Buffer> {
        with_dtype!(src.dtype(), S => {
            let s = typed::<S>("cast", src)?;
            with_dtype!(dtype, T => Ok(T::into_buffer(
                layout.offsets().map(|i| convert::<S, T>(s[i])).collect()
            )))
        })
    }
}

/// Element conversion: integer to integer goes through i64 so it stays exact.
pub(crate) fn convert<S: Element, T: Element>(v: S) -> T {
    if S::DTYPE.is_integer() && T::DTYPE.is_integer() {
        T::from_i64(v.to_i64())
    } else {
        T::from_f64(v.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_2d() {
        // [2,3] @ [3,2] → [2,2]
        let a = Buffer::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Buffer::F32(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = HostKernels
            .matmul(&a, &b, MatmulDims { batch: 1, m: 2, k: 3, n: 2 })
            .unwrap();
        assert_eq!(c, Buffer::F32(vec![58.0, 64.0, 139.0, 154.0]));
    }

    #[test]
    fn test_integer_matmul() {
        let a = Buffer::I64(vec![1, 2, 3, 4]);
        let c = HostKernels
            .matmul(&a, &a, MatmulDims { batch: 1, m: 2, k: 2, n: 2 })
            .unwrap();
        assert_eq!(c, Buffer::I64(vec![7, 10, 15, 22]));
    }

    #[test]
    fn test_fill_strided() {
        let mut buf = Buffer::F32(vec![1.0; 16]);
        let col = Layout::contiguous([4, 4]).narrow(1, 1, 1, 1).unwrap();
        HostKernels.fill(&mut buf, &col, 0.0).unwrap();
        let d = buf.as_slice::<f32>().unwrap();
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(d[r * 4 + c], if c == 1 { 0.0 } else { 1.0 });
            }
        }
    }

    #[test]
    fn test_sum_dims() {
        let buf = Buffer::I32(vec![1, 2, 3, 4, 5, 6]);
        let l = Layout::contiguous([2, 3]);
        assert_eq!(HostKernels.sum(&buf, &l, None).unwrap(), Buffer::I32(vec![21]));
        assert_eq!(HostKernels.sum(&buf, &l, Some(0)).unwrap(), Buffer::I32(vec![5, 7, 9]));
        assert_eq!(HostKernels.sum(&buf, &l, Some(1)).unwrap(), Buffer::I32(vec![6, 15]));
    }

    #[test]
    fn test_cast() {
        let buf = Buffer::F64(vec![1.7, -2.2]);
        let l = Layout::contiguous([2]);
        assert_eq!(HostKernels.cast(&buf, &l, DType::I32).unwrap(), Buffer::I32(vec![1, -2]));
        let big = Buffer::I64(vec![(1 << 60) + 1]);
        assert_eq!(
            HostKernels.cast(&big, &Layout::contiguous([1]), DType::I64).unwrap(),
            Buffer::I64(vec![(1 << 60) + 1])
        );
    }
}
