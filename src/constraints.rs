use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Monotonicity constraint of a layer with respect to its input.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Constrain the relationship to be monotonically increasing.
    Positive,
    /// Constrain the relationship to be monotonically decreasing.
    Negative,
    /// No monotonicity constraint.
    Unconstrained,
}

impl Constraint {
    /// Constraint for an ascending (`true`) or descending (`false`) mapping.
    pub fn from_ascent(ascent: bool) -> Self {
        if ascent {
            Constraint::Positive
        } else {
            Constraint::Negative
        }
    }

    pub fn is_monotonic(&self) -> bool {
        !matches!(self, Constraint::Unconstrained)
    }

    /// Map raw weights onto the sign the constraint requires.
    ///
    /// The restriction is part of the forward computation, so it holds for
    /// every parameter value the optimizer may produce.
    pub fn restrict(&self, weight: &Tensor) -> Result<Tensor> {
        match self {
            Constraint::Positive => weight.abs(),
            Constraint::Negative => weight.abs()?.neg(),
            Constraint::Unconstrained => Ok(weight.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_restrict_signs() {
        let w = Tensor::new(&[[-1.5f32, 0.0, 2.0]], &Device::Cpu).unwrap();
        let pos = Constraint::Positive.restrict(&w).unwrap().to_vec2::<f32>().unwrap();
        let neg = Constraint::Negative.restrict(&w).unwrap().to_vec2::<f32>().unwrap();
        let raw = Constraint::Unconstrained.restrict(&w).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pos, vec![vec![1.5, 0.0, 2.0]]);
        assert_eq!(neg, vec![vec![-1.5, 0.0, -2.0]]);
        assert_eq!(raw, vec![vec![-1.5, 0.0, 2.0]]);
    }

    #[test]
    fn test_from_ascent() {
        assert_eq!(Constraint::from_ascent(true), Constraint::Positive);
        assert_eq!(Constraint::from_ascent(false), Constraint::Negative);
        assert!(!Constraint::Unconstrained.is_monotonic());
    }
}
