//! Literal nested data: the input of [`Tensor::from_data`](crate::Tensor::from_data).

use crate::error::TesseraError;
use crate::storage::Buffer;
use crate::{with_dtype, DType, Element, Result, Shape};

/// A literal scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

/// Arbitrarily nested sequences of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedData {
    Scalar(Scalar),
    List(Vec<NestedData>),
}

impl NestedData {
    /// Infer the shape from nesting depth and list lengths.
    ///
    /// Every list at the same depth must have the same length and every leaf
    /// must sit at the same depth; otherwise the data is jagged.
    pub fn infer_shape(&self) -> Result<Shape> {
        let mut dims = Vec::new();
        let mut node = self;
        while let NestedData::List(items) = node {
            dims.push(items.len());
            match items.first() {
                Some(first) => node = first,
                None => break,
            }
        }
        self.check_regular(&dims, 0, &mut String::from("data"))?;
        Ok(Shape::from(dims))
    }

    fn check_regular(&self, dims: &[usize], depth: usize, path: &mut String) -> Result<()> {
        match self {
            NestedData::Scalar(_) if depth == dims.len() => Ok(()),
            NestedData::Scalar(_) => Err(TesseraError::IrregularData {
                path: path.clone(),
                reason: format!("scalar at depth {depth}, expected a list of {}", dims[depth]),
            }),
            NestedData::List(_) if depth == dims.len() => Err(TesseraError::IrregularData {
                path: path.clone(),
                reason: format!("list at depth {depth}, expected a scalar"),
            }),
            NestedData::List(items) => {
                if items.len() != dims[depth] {
                    return Err(TesseraError::IrregularData {
                        path: path.clone(),
                        reason: format!("length {}, expected {}", items.len(), dims[depth]),
                    });
                }
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{i}]"));
                    item.check_regular(dims, depth + 1, path)?;
                    path.truncate(len);
                }
                Ok(())
            }
        }
    }

    /// Integer leaves only give I64; any float leaf gives F32.
    pub fn infer_dtype(&self) -> DType {
        let mut saw_float = false;
        let mut saw_any = false;
        self.visit(&mut |s| {
            saw_any = true;
            saw_float |= matches!(s, Scalar::Float(_));
        });
        if saw_float || !saw_any {
            DType::F32
        } else {
            DType::I64
        }
    }

    /// Leaves in row-major order.
    pub fn flatten(&self) -> Vec<Scalar> {
        let mut out = Vec::new();
        self.visit(&mut |s| out.push(s));
        out
    }

    fn visit(&self, f: &mut impl FnMut(Scalar)) {
        match self {
            NestedData::Scalar(s) => f(*s),
            NestedData::List(items) => {
                for item in items {
                    item.visit(f);
                }
            }
        }
    }

    /// Validate and materialize into a shape and a buffer of `dtype`.
    pub(crate) fn into_buffer(&self, dtype: DType) -> Result<(Shape, Buffer)> {
        let shape = self.infer_shape()?;
        let leaves = self.flatten();
        let buffer = with_dtype!(dtype, T => T::into_buffer(
            leaves.iter().map(|s| scalar_to::<T>(*s)).collect()
        ));
        Ok((shape, buffer))
    }
}

fn scalar_to<T: Element>(s: Scalar) -> T {
    match s {
        Scalar::Int(v) => T::from_i64(v),
        Scalar::Float(v) => T::from_f64(v),
    }
}

macro_rules! impl_scalar_from {
    ($variant:ident: $($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Scalar::$variant(v.into())
                }
            }

            impl From<$t> for NestedData {
                fn from(v: $t) -> Self {
                    NestedData::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

impl_scalar_from!(Int: u8, i32, i64);
impl_scalar_from!(Float: f32, f64);

impl From<Scalar> for NestedData {
    fn from(s: Scalar) -> Self {
        NestedData::Scalar(s)
    }
}

impl<T: Into<NestedData>> From<Vec<T>> for NestedData {
    fn from(items: Vec<T>) -> Self {
        NestedData::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<NestedData>, const N: usize> From<[T; N]> for NestedData {
    fn from(items: [T; N]) -> Self {
        NestedData::List(items.into_iter().map(Into::into).collect())
    }
}

/// Build [`NestedData`] from bracket literals: `nested![[1, 2], [3, 4]]`.
#[macro_export]
macro_rules! nested {
    ($([$($inner:tt)*]),+ $(,)?) => {
        $crate::NestedData::List(vec![$($crate::nested![$($inner)*]),+])
    };
    ($($x:expr),* $(,)?) => {
        $crate::NestedData::List(vec![$($crate::NestedData::from($x)),*])
    };
}
