//! Basic indexing: slicing views and writes through them.

use std::ops::{Range, RangeFrom, RangeFull, RangeInclusive, RangeTo, RangeToInclusive};

use crate::error::TesseraError;
use crate::tensor::{resolve_index, Tensor};
use crate::Result;

/// One entry of a slicing expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceArg {
    /// Pick one position and drop the dimension. Negative counts from the end.
    Index(isize),
    /// `start..end` taking every `step`-th entry; missing bounds mean the
    /// whole extent. Bounds are clamped to the extent.
    Range {
        start: Option<isize>,
        end: Option<isize>,
        step: isize,
    },
    /// `..`: keep the dimension.
    Full,
    /// `...`: as many `Full` entries as needed.
    Ellipsis,
}

impl SliceArg {
    pub fn range(start: Option<isize>, end: Option<isize>, step: isize) -> Self {
        SliceArg::Range { start, end, step }
    }
}

macro_rules! impl_slice_arg_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for SliceArg {
                fn from(i: $t) -> Self {
                    SliceArg::Index(i as isize)
                }
            }

            impl From<Range<$t>> for SliceArg {
                fn from(r: Range<$t>) -> Self {
                    SliceArg::range(Some(r.start as isize), Some(r.end as isize), 1)
                }
            }

            impl From<RangeInclusive<$t>> for SliceArg {
                fn from(r: RangeInclusive<$t>) -> Self {
                    SliceArg::range(Some(*r.start() as isize), Some(*r.end() as isize + 1), 1)
                }
            }

            impl From<RangeFrom<$t>> for SliceArg {
                fn from(r: RangeFrom<$t>) -> Self {
                    SliceArg::range(Some(r.start as isize), None, 1)
                }
            }

            impl From<RangeTo<$t>> for SliceArg {
                fn from(r: RangeTo<$t>) -> Self {
                    SliceArg::range(None, Some(r.end as isize), 1)
                }
            }

            impl From<RangeToInclusive<$t>> for SliceArg {
                fn from(r: RangeToInclusive<$t>) -> Self {
                    SliceArg::range(None, Some(r.end as isize + 1), 1)
                }
            }
        )*
    };
}

impl_slice_arg_from!(i32, i64, isize, usize);

impl From<RangeFull> for SliceArg {
    fn from(_: RangeFull) -> Self {
        SliceArg::Full
    }
}

/// Build a slicing expression: `s![.., 1]`, `s![1..3, ..]`, `s![..., -1]`.
#[macro_export]
macro_rules! s {
    (@acc [$($acc:expr),*]) => {
        [$($acc),*]
    };
    (@acc [$($acc:expr),*] ... $(, $($rest:tt)*)?) => {
        $crate::s!(@acc [$($acc,)* $crate::SliceArg::Ellipsis] $($($rest)*)?)
    };
    (@acc [$($acc:expr),*] $x:expr $(, $($rest:tt)*)?) => {
        $crate::s!(@acc [$($acc,)* $crate::SliceArg::from($x)] $($($rest)*)?)
    };
    ($($t:tt)*) => {
        $crate::s!(@acc [] $($t)*)
    };
}

impl Tensor {
    /// A view selecting a region; shares storage with `self`.
    ///
    /// Integer entries drop their dimension, range entries keep it.
    /// Dimensions not mentioned are kept whole.
    pub fn slice(&self, args: &[SliceArg]) -> Result<Tensor> {
        let ndim = self.ndim();
        let ellipses = args.iter().filter(|a| **a == SliceArg::Ellipsis).count();
        if ellipses > 1 {
            return Err(TesseraError::InvalidSlice("only one ellipsis is allowed".into()));
        }
        let explicit = args.len() - ellipses;
        if explicit > ndim {
            return Err(TesseraError::InvalidSlice(format!(
                "{explicit} indices given for a {ndim}-d tensor"
            )));
        }

        let mut layout = self.layout().clone();
        let mut dim = 0;
        for arg in args {
            match *arg {
                SliceArg::Index(i) => {
                    let size = layout.dims()[dim];
                    layout = layout.select(dim, resolve_index(i, dim, size)?)?;
                }
                SliceArg::Full => dim += 1,
                SliceArg::Ellipsis => dim += ndim - explicit,
                SliceArg::Range { start, end, step } => {
                    if step <= 0 {
                        return Err(TesseraError::InvalidSlice(format!(
                            "slice step must be positive, got {step}"
                        )));
                    }
                    let size = layout.dims()[dim];
                    let start = clamp_bound(start.unwrap_or(0), size);
                    let end = clamp_bound(end.unwrap_or(size as isize), size);
                    let step = step as usize;
                    let len = if end > start { (end - start).div_ceil(step) } else { 0 };
                    layout = layout.narrow(dim, start, len, step)?;
                    dim += 1;
                }
            }
        }
        tracing::trace!("slice {:?} -> {:?}", self.dims(), layout.dims());
        Ok(self.view(layout))
    }

    /// `slice(&[SliceArg::Index(i)])`.
    pub fn index(&self, i: isize) -> Result<Tensor> {
        self.slice(&[SliceArg::Index(i)])
    }

    /// Fill the addressed region with `value`, in place.
    ///
    /// The write is visible through every view of the storage.
    pub fn assign(&self, args: &[SliceArg], value: f64) -> Result<()> {
        self.slice(args)?.fill_(value)?;
        Ok(())
    }

    /// Copy `src`, broadcast to the region's shape, into the addressed region.
    pub fn assign_tensor(&self, args: &[SliceArg], src: &Tensor) -> Result<()> {
        self.slice(args)?.copy_(src)?;
        Ok(())
    }
}

/// Python-style bound: negative counts from the end, then clamp to `[0, size]`.
fn clamp_bound(bound: isize, size: usize) -> usize {
    let size = size as isize;
    let resolved = if bound < 0 { bound + size } else { bound };
    resolved.clamp(0, size) as usize
}
