use crate::errors::DdrError;
use candle_core::{Result as TensorResult, Tensor};
use serde::{Deserialize, Serialize};

// Validation
pub fn validate_positive_dim(value: usize, parameter: &str) -> Result<(), DdrError> {
    if value == 0 {
        Err(DdrError::InvalidParameter(
            parameter.to_string(),
            "a positive integer".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_even(value: usize, parameter: &str) -> Result<(), DdrError> {
    if value % 2 != 0 {
        Err(DdrError::InvalidParameter(
            parameter.to_string(),
            "an even number".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Check a tensor against the expected shape, naming it in the error.
pub fn validate_shape(tensor: &Tensor, expected: &[usize], what: &str) -> Result<(), DdrError> {
    let found = tensor.dims();
    if found != expected {
        return Err(DdrError::ShapeMismatch(
            what.to_string(),
            expected.to_vec(),
            found.to_vec(),
        ));
    }
    Ok(())
}

/// Map a quantile level from `(0, 1)` onto `(-1, 1)`.
pub fn rescale_quantile(q: &Tensor) -> TensorResult<Tensor> {
    q.affine(2.0, -1.0)
}

/// Squash a logit back to a probability.
pub fn squash_logit(logit: &Tensor) -> TensorResult<Tensor> {
    candle_nn::ops::sigmoid(logit)
}

/// `ln(1 + exp(x))`, computed as `relu(x) + ln(1 + exp(-|x|))` to stay finite.
pub fn softplus(x: &Tensor) -> TensorResult<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()? + tail
}

pub fn mish(x: &Tensor) -> TensorResult<Tensor> {
    x * softplus(x)?.tanh()?
}

/// Affine map between known target bounds and `[-1, 1]`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct TargetScaler {
    pub lower: f64,
    pub upper: f64,
}

impl TargetScaler {
    pub fn new(lower: f64, upper: f64) -> Result<Self, DdrError> {
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(DdrError::InvalidParameter(
                "target_bounds".to_string(),
                "finite bounds with lower < upper".to_string(),
                format!("({}, {})", lower, upper),
            ));
        }
        Ok(TargetScaler { lower, upper })
    }

    pub fn scale(&self, y: &Tensor) -> TensorResult<Tensor> {
        let span = self.upper - self.lower;
        y.affine(2.0 / span, -2.0 * self.lower / span - 1.0)
    }

    pub fn unscale(&self, y: &Tensor) -> TensorResult<Tensor> {
        let span = self.upper - self.lower;
        y.affine(0.5 * span, 0.5 * (self.upper + self.lower))
    }
}
