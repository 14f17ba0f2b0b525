use crate::{DType, Device};

/// Coarse classification of a [`TesseraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Incompatible or irregular shapes.
    Shape,
    /// Out-of-range index, slice bound or axis.
    Index,
    /// Operands live on different devices.
    DeviceMismatch,
    /// Operands or requested fill are of an unsupported dtype.
    DType,
    /// An external buffer cannot be aliased.
    Format,
    /// Bad device configuration or unavailable device.
    Config,
}

/// Errors raised by tensor construction and operations.
///
/// Every error is returned to the immediate caller. Operations validate
/// before they write, so an error implies no operand was modified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TesseraError {
    #[error("{op}: shape mismatch, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("irregular nested data at {path}: {reason}")]
    IrregularData { path: String, reason: String },

    #[error("{op}: shapes {a:?} and {b:?} are not broadcast-compatible")]
    Broadcast {
        op: &'static str,
        a: Vec<usize>,
        b: Vec<usize>,
    },

    #[error("matmul: inner dimensions differ, lhs {lhs:?} vs rhs {rhs:?}")]
    MatmulDimMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("cannot reshape {numel} elements into {shape:?}")]
    InvalidReshape { numel: usize, shape: Vec<isize> },

    #[error("{op}: more than one element of the destination refers to the same memory")]
    InternalOverlap { op: &'static str },

    #[error("index {index} out of range for dimension {dim} of size {size}")]
    IndexOutOfRange { index: isize, dim: usize, size: usize },

    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    #[error("axis {axis} out of range for {ndim}-d tensor")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("{op}: operands on different devices ({lhs} vs {rhs})")]
    DeviceMismatch {
        op: &'static str,
        lhs: Device,
        rhs: Device,
    },

    #[error("{op}: dtype mismatch, expected {expected}, got {got}")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        got: DType,
    },

    #[error("{op}: unsupported dtype {dtype}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("external buffer format error: {0}")]
    Format(String),

    #[error("device configuration error: {0}")]
    Config(String),
}

impl TesseraError {
    /// The coarse class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TesseraError::ShapeMismatch { .. }
            | TesseraError::IrregularData { .. }
            | TesseraError::Broadcast { .. }
            | TesseraError::MatmulDimMismatch { .. }
            | TesseraError::InvalidReshape { .. }
            | TesseraError::InternalOverlap { .. } => ErrorKind::Shape,
            TesseraError::IndexOutOfRange { .. }
            | TesseraError::InvalidSlice(_)
            | TesseraError::InvalidAxis { .. } => ErrorKind::Index,
            TesseraError::DeviceMismatch { .. } => ErrorKind::DeviceMismatch,
            TesseraError::DTypeMismatch { .. } | TesseraError::UnsupportedDType { .. } => {
                ErrorKind::DType
            }
            TesseraError::Format(_) => ErrorKind::Format,
            TesseraError::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let e = TesseraError::Broadcast { op: "mul", a: vec![2, 3], b: vec![4, 3] };
        assert_eq!(e.kind(), ErrorKind::Shape);

        let e = TesseraError::IndexOutOfRange { index: 7, dim: 0, size: 4 };
        assert_eq!(e.kind(), ErrorKind::Index);

        let e = TesseraError::DeviceMismatch { op: "add", lhs: Device::Cpu, rhs: Device::Cuda(0) };
        assert_eq!(e.kind(), ErrorKind::DeviceMismatch);
    }

    #[test]
    fn test_display_names_operands() {
        let e = TesseraError::DeviceMismatch { op: "add", lhs: Device::Cpu, rhs: Device::Cuda(0) };
        assert_eq!(e.to_string(), "add: operands on different devices (cpu vs cuda:0)");

        let e = TesseraError::MatmulDimMismatch { lhs: vec![2, 3], rhs: vec![4, 2] };
        assert!(e.to_string().contains("[2, 3]"));
    }
}
