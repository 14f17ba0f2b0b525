//! Reductions: sum and mean.

use crate::error::TesseraError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Sum all elements, returning a scalar tensor of the same dtype.
    pub fn sum(&self) -> Result<Tensor> {
        let buffer = self.kernels().sum(&self.storage().read(), self.layout(), None)?;
        Ok(Tensor::from_buffer(buffer, Shape::scalar(), self.device()))
    }

    /// Sum along `dim`, removing that dimension.
    pub fn sum_dim(&self, dim: isize) -> Result<Tensor> {
        let dim = self.shape().resolve_axis(dim)?;
        let buffer = self
            .kernels()
            .sum(&self.storage().read(), self.layout(), Some(dim))?;
        let mut out = self.dims().to_vec();
        out.remove(dim);
        Ok(Tensor::from_buffer(buffer, Shape::from(out), self.device()))
    }

    /// Mean of all elements. Float dtypes only.
    pub fn mean(&self) -> Result<Tensor> {
        if !self.dtype().is_float() {
            return Err(TesseraError::UnsupportedDType {
                op: "mean",
                dtype: self.dtype(),
            });
        }
        self.sum()?.div_scalar(self.numel() as f64)
    }
}
