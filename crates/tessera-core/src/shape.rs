use smallvec::SmallVec;
use std::fmt;

use crate::error::TesseraError;
use crate::Result;

/// Stride vector, stored inline for up to four dimensions.
pub type Strides = SmallVec<[usize; 4]>;

/// Extents of a tensor, outermost first. Rank 0 is a scalar.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A scalar holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Extent of `axis`, if the rank has one.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Row-major strides: the last dimension moves fastest.
    pub fn contiguous_strides(&self) -> Strides {
        let mut strides: Strides = SmallVec::from_elem(1, self.ndim());
        for i in (1..self.ndim()).rev() {
            strides[i - 1] = strides[i] * self.dims[i].max(1);
        }
        strides
    }

    /// The shape both operands broadcast to, aligning trailing dimensions.
    ///
    /// Missing leading dimensions count as 1; an extent of 1 stretches to
    /// match. `None` when two extents differ and neither is 1.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let rank = self.ndim().max(other.ndim());
        let extent = |s: &Shape, i: usize| {
            let pad = rank - s.ndim();
            if i < pad { 1 } else { s.dims[i - pad] }
        };
        let dims = (0..rank)
            .map(|i| match (extent(self, i), extent(other, i)) {
                (a, b) if a == b || b == 1 => Some(a),
                (1, b) => Some(b),
                _ => None,
            })
            .collect::<Option<SmallVec<[usize; 4]>>>()?;
        Some(Shape { dims })
    }

    /// Extents for a reshape of this shape to `target`.
    ///
    /// One entry may be `-1` and is inferred from the element count. Any
    /// other negative entry, a second `-1` or a count mismatch gives `None`.
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut inferred = None;
        let mut dims: SmallVec<[usize; 4]> = SmallVec::with_capacity(target.len());
        for (i, &d) in target.iter().enumerate() {
            match d {
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    dims.push(1);
                }
                d if d >= 0 => dims.push(d as usize),
                _ => return None,
            }
        }
        let known = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        if let Some(i) = inferred {
            if known == 0 || numel % known != 0 {
                return None;
            }
            dims[i] = numel / known;
        } else if known != numel {
            return None;
        }
        Some(Shape { dims })
    }

    /// Resolve a possibly negative axis against this rank.
    pub fn resolve_axis(&self, axis: isize) -> Result<usize> {
        let ndim = self.ndim() as isize;
        let resolved = if axis < 0 { axis + ndim } else { axis };
        if resolved < 0 || resolved >= ndim {
            return Err(TesseraError::InvalidAxis {
                axis: axis.unsigned_abs(),
                ndim: self.ndim(),
            });
        }
        Ok(resolved as usize)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}

impl<const N: usize> From<&[usize; N]> for Shape {
    fn from(dims: &[usize; N]) -> Self {
        Shape::new(dims)
    }
}

/// Shape, strides and element offset: how a view addresses its storage.
///
/// Derived layouts (transpose, narrow, select, broadcast) address the same
/// storage as their source; nothing here ever copies element data.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl Layout {
    /// Canonical row-major layout starting at offset 0.
    pub fn contiguous(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let strides = shape.contiguous_strides();
        Self { shape, strides, offset: 0 }
    }

    /// Layout with explicit strides and offset.
    pub fn new(shape: Shape, strides: Strides, offset: usize) -> Self {
        debug_assert_eq!(shape.ndim(), strides.len());
        Self { shape, strides, offset }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Whether the strides are the canonical row-major strides for the shape.
    ///
    /// Extents of 0 or 1 never move the cursor, so their strides are ignored.
    pub fn is_contiguous(&self) -> bool {
        let canonical = self.shape.contiguous_strides();
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter().zip(canonical.iter()))
            .all(|(&d, (&s, &c))| d <= 1 || s == c)
    }

    /// Whether two logical positions share one physical element (a broadcast view).
    pub fn has_internal_overlap(&self) -> bool {
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter())
            .any(|(&d, &s)| d > 1 && s == 0)
    }

    /// Largest physical offset this layout touches, or None for empty views.
    pub fn max_offset(&self) -> Option<usize> {
        if self.numel() == 0 {
            return None;
        }
        let span: usize = self
            .shape
            .dims()
            .iter()
            .zip(self.strides.iter())
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        Some(self.offset + span)
    }

    /// Swap two dimensions.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let ndim = self.ndim();
        for axis in [dim0, dim1] {
            if axis >= ndim {
                return Err(TesseraError::InvalidAxis { axis, ndim });
            }
        }
        let mut dims: SmallVec<[usize; 4]> = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        dims.swap(dim0, dim1);
        strides.swap(dim0, dim1);
        Ok(Layout {
            shape: Shape { dims },
            strides,
            offset: self.offset,
        })
    }

    /// Keep `len` entries of `dim` starting at `start`, taking every `step`-th.
    pub fn narrow(&self, dim: usize, start: usize, len: usize, step: usize) -> Result<Layout> {
        let ndim = self.ndim();
        if dim >= ndim {
            return Err(TesseraError::InvalidAxis { axis: dim, ndim });
        }
        if step == 0 {
            return Err(TesseraError::InvalidSlice("slice step cannot be zero".into()));
        }
        let size = self.dims()[dim];
        let out_of_range = |index: usize| TesseraError::IndexOutOfRange {
            index: isize::try_from(index).unwrap_or(isize::MAX),
            dim,
            size,
        };
        // One past the last position taken; the step only matters past the first.
        let end = match len {
            0 => Some(start),
            1 => start.checked_add(1),
            _ => (len - 1)
                .checked_mul(step)
                .and_then(|span| span.checked_add(start))
                .and_then(|last| last.checked_add(1)),
        }
        .ok_or_else(|| out_of_range(start))?;
        if start > size || end > size {
            return Err(out_of_range(end.saturating_sub(1).max(start)));
        }
        let mut dims: SmallVec<[usize; 4]> = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        dims[dim] = len;
        let offset = if len == 0 { self.offset } else { self.offset + start * strides[dim] };
        if len > 1 {
            strides[dim] = strides[dim]
                .checked_mul(step)
                .ok_or_else(|| out_of_range(end - 1))?;
        }
        Ok(Layout {
            shape: Shape { dims },
            strides,
            offset,
        })
    }

    /// Fix `dim` at `index`, removing the dimension.
    pub fn select(&self, dim: usize, index: usize) -> Result<Layout> {
        let ndim = self.ndim();
        if dim >= ndim {
            return Err(TesseraError::InvalidAxis { axis: dim, ndim });
        }
        let size = self.dims()[dim];
        if index >= size {
            return Err(TesseraError::IndexOutOfRange {
                index: index as isize,
                dim,
                size,
            });
        }
        let mut dims: SmallVec<[usize; 4]> = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        let offset = self.offset + index * strides[dim];
        dims.remove(dim);
        strides.remove(dim);
        Ok(Layout {
            shape: Shape { dims },
            strides,
            offset,
        })
    }

    /// View this layout as `target`, repeating broadcast dimensions with stride 0.
    pub fn broadcast_to(&self, target: &Shape) -> Result<Layout> {
        let err = || TesseraError::Broadcast {
            op: "broadcast_to",
            a: self.dims().to_vec(),
            b: target.dims().to_vec(),
        };
        if target.ndim() < self.ndim() {
            return Err(err());
        }
        let lead = target.ndim() - self.ndim();
        let mut strides: Strides = SmallVec::from_elem(0, target.ndim());
        for (i, &t) in target.dims().iter().enumerate() {
            if i < lead {
                continue;
            }
            let src = self.dims()[i - lead];
            if src == t {
                strides[i] = self.strides[i - lead];
            } else if src != 1 {
                return Err(err());
            }
        }
        Ok(Layout {
            shape: target.clone(),
            strides,
            offset: self.offset,
        })
    }

    /// Physical offsets of every element, in logical row-major order.
    pub fn offsets(&self) -> StridedOffsets<'_> {
        StridedOffsets::new(self)
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Layout(shape={}, strides={:?}, offset={})",
            self.shape,
            self.strides.as_slice(),
            self.offset
        )
    }
}

/// Iterator over the storage offsets a [`Layout`] addresses.
pub struct StridedOffsets<'a> {
    layout: &'a Layout,
    index: SmallVec<[usize; 4]>,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> StridedOffsets<'a> {
    fn new(layout: &'a Layout) -> Self {
        let remaining = layout.numel();
        Self {
            layout,
            index: SmallVec::from_elem(0, layout.ndim()),
            next: (remaining > 0).then_some(layout.offset),
            remaining,
        }
    }
}

impl Iterator for StridedOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.next = None;
            return Some(current);
        }

        // Odometer increment from the innermost dimension.
        let dims = self.layout.dims();
        let strides = self.layout.strides();
        let mut offset = current;
        for d in (0..dims.len()).rev() {
            if self.index[d] + 1 < dims[d] {
                self.index[d] += 1;
                offset += strides[d];
                break;
            }
            offset -= self.index[d] * strides[d];
            self.index[d] = 0;
        }
        self.next = Some(offset);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedOffsets<'_> {}
