//! Accelerator kernels.
//!
//! Accelerator memory is a separate arena from host memory, so a tensor
//! moved to an accelerator never aliases its host source. Kernels run
//! data-parallel with rayon and join before returning, which makes every
//! call synchronous from the caller's side.

use rayon::prelude::*;

use super::host::convert;
use super::{split_at_dim, typed, typed_mut, BinaryOp, Kernels, MatmulDims};
use crate::device::DeviceKind;
use crate::shape::Layout;
use crate::storage::Buffer;
use crate::{with_dtype, DType, Element, Result};

/// Below this many elements the launch overhead dominates; run inline.
const PAR_THRESHOLD: usize = 4096;

/// Kernel set for accelerator memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceleratorKernels;

fn offsets(layout: &Layout) -> Vec<usize> {
    layout.offsets().collect()
}

/// Map each output index through `f`, in parallel for large outputs.
fn launch<T: Element>(len: usize, f: impl Fn(usize) -> T + Sync + Send) -> Vec<T> {
    if len < PAR_THRESHOLD {
        (0..len).map(f).collect()
    } else {
        (0..len).into_par_iter().map(f).collect()
    }
}

/// Compute new values for the addressed elements in parallel, then store them.
fn update<T: Element>(d: &mut [T], dst: &[usize], f: impl Fn(usize, T) -> T + Sync + Send) {
    let values = {
        let current: &[T] = d;
        launch(dst.len(), |k| f(k, current[dst[k]]))
    };
    for (&i, v) in dst.iter().zip(values) {
        d[i] = v;
    }
}

impl Kernels for AcceleratorKernels {
    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Accelerator
    }

    fn gather(&self, src: &Buffer, layout: &Layout) -> Result<Buffer> {
        with_dtype!(src.dtype(), T => {
            let s = typed::<T>("gather", src)?;
            let idx = offsets(layout);
            Ok(T::into_buffer(launch(idx.len(), |k| s[idx[k]])))
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
            let si = offsets(src_layout);
            update(d, &offsets(dst_layout), |k, _| s[si[k]]);
            Ok(())
        })
    }

    fn fill(&self, dst: &mut Buffer, layout: &Layout, value: f64) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let v = T::from_f64(value);
            let d = typed_mut::<T>("fill", dst)?;
            if layout.is_contiguous() {
                let start = layout.offset();
                d[start..start + layout.numel()].par_iter_mut().for_each(|x| *x = v);
            } else {
                update(d, &offsets(layout), |_, _| v);
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
            let ai = offsets(lhs_layout);
            let bi = offsets(rhs_layout);
            Ok(T::into_buffer(launch(ai.len(), |k| op.apply(a[ai[k]], b[bi[k]]))))
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
            let bi = offsets(rhs_layout);
            update(d, &offsets(dst_layout), |k, x| op.apply(x, b[bi[k]]));
            Ok(())
        })
    }

    fn scalar_inplace(&self, op: BinaryOp, dst: &mut Buffer, layout: &Layout, scalar: f64) -> Result<()> {
        with_dtype!(dst.dtype(), T => {
            let s = T::from_f64(scalar);
            let d = typed_mut::<T>(op.name(), dst)?;
            update(d, &offsets(layout), |_, x| op.apply(x, s));
            Ok(())
        })
    }

    fn matmul(&self, lhs: &Buffer, rhs: &Buffer, dims: MatmulDims) -> Result<Buffer> {
        with_dtype!(lhs.dtype(), T => {
            let a = typed::<T>("matmul", lhs)?;
            let b = typed::<T>("matmul", rhs)?;
            let MatmulDims { batch, m, k, n } = dims;
            let mut c = vec![T::zero(); batch * m * n];
            if n > 0 {
                // One task per output row.
                c.par_chunks_mut(n).enumerate().for_each(|(row, out)| {
                    let bi = row / m.max(1);
                    let i = row % m.max(1);
                    let a_row = &a[bi * m * k + i * k..bi * m * k + (i + 1) * k];
                    let b_off = bi * k * n;
                    for (j, o) in out.iter_mut().enumerate() {
                        let mut sum = T::zero();
                        for (p, &av) in a_row.iter().enumerate() {
                            sum = sum.add(av.mul(b[b_off + p * n + j]));
                        }
                        *o = sum;
                    }
                });
            }
            Ok(T::into_buffer(c))
        })
    }

    fn sum(&self, src: &Buffer, layout: &Layout, dim: Option<usize>) -> Result<Buffer> {
        with_dtype!(src.dtype(), T => {
            let s = typed::<T>("sum", src)?;
            let idx = offsets(layout);
            let out = match dim {
                // Sequential fold keeps float rounding identical to the host set.
                None => vec![idx.iter().fold(T::zero(), |acc, &i| acc.add(s[i]))],
                Some(dim) => {
                    let (outer, axis, inner) = split_at_dim(layout.dims(), dim);
                    launch(outer * inner, |q| {
                        let (o, i) = (q / inner, q % inner);
                        (0..axis).fold(T::zero(), |acc, a| acc.add(s[idx[(o * axis + a) * inner + i]]))
                    })
                }
            };
            Ok(T::into_buffer(out))
        })
    }

    fn cast(&self, src: &Buffer, layout: &Layout, dtype: DType) -> Result<Buffer> {
        with_dtype!(src.dtype(), S => {
            let s = typed::<S>("cast", src)?;
            let idx = offsets(layout);
            with_dtype!(dtype, T => Ok(T::into_buffer(
                launch(idx.len(), |k| convert::<S, T>(s[idx[k]]))
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_binary_runs_parallel_path() {
        let n = PAR_THRESHOLD * 2;
        let a = Buffer::F64((0..n).map(|v| v as f64).collect());
        let l = Layout::contiguous([n]);
        let out = AcceleratorKernels.binary(BinaryOp::Mul, &a, &l, &a, &l).unwrap();
        let d = out.as_slice::<f64>().unwrap();
        assert_eq!(d[n - 1], ((n - 1) * (n - 1)) as f64);
    }

    #[test]
    fn test_batched_matmul() {
        // Two batches of [1,2] @ [2,1].
        let a = Buffer::I32(vec![1, 2, 3, 4]);
        let b = Buffer::I32(vec![5, 6, 7, 8]);
        let c = AcceleratorKernels
            .matmul(&a, &b, MatmulDims { batch: 2, m: 1, k: 2, n: 1 })
            .unwrap();
        assert_eq!(c, Buffer::I32(vec![17, 53]));
    }

    #[test]
    fn test_fill_contiguous_window() {
        let mut buf = Buffer::F32(vec![0.0; 8]);
        let l = Layout::contiguous([8]).narrow(0, 2, 4, 1).unwrap();
        AcceleratorKernels.fill(&mut buf, &l, 3.0).unwrap();
        assert_eq!(
            buf.as_slice::<f32>().unwrap(),
            &[0.0, 0.0, 3.0, 3.0, 3.0, 3.0, 0.0, 0.0]
        );
    }
}
