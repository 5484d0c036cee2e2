//! Outputs of a distribution core call.
//!
//! Branches that were not computed are `None`; [`DistributionOutput::to_map`]
//! omits their keys instead of filling them.
use candle_core::Tensor;
use hashbrown::HashMap;

pub const MEDIAN: &str = "median";
pub const POS_MED_RES: &str = "pos_med_res";
pub const NEG_MED_RES: &str = "neg_med_res";
pub const Y_RES: &str = "y_res";
pub const MED_ADD: &str = "med_add";
pub const MED_MUL: &str = "med_mul";
pub const MED_RES: &str = "med_res";
pub const Q_POSITIVE_MASK: &str = "q_positive_mask";
pub const Q_INVERSE: &str = "q_inverse";
pub const Q: &str = "q";
pub const Q_LOGIT: &str = "q_logit";
pub const Y_INVERSE_RES: &str = "y_inverse_res";

/// Conditional median and its two signed residual scales, each `(batch, 1)`.
#[derive(Debug, Clone)]
pub struct MedianOutput {
    pub median: Tensor,
    pub pos_med_res: Tensor,
    pub neg_med_res: Tensor,
}

/// Quantile direction results, each `(batch, 1)`.
#[derive(Debug, Clone)]
pub struct QuantileOutput {
    /// Predicted value at the requested level, as a residual from the median.
    pub y_res: Tensor,
    pub med_add: Tensor,
    pub med_mul: Tensor,
    /// Median residual selected by `q_positive_mask`.
    pub med_res: Tensor,
    /// `u8` mask, 1 where the rescaled level is strictly positive.
    pub q_positive_mask: Tensor,
    /// Level recovered by feeding `y_res` through the cdf direction.
    pub q_inverse: Option<Tensor>,
}

/// Cdf direction results, each `(batch, 1)`.
#[derive(Debug, Clone)]
pub struct CdfOutput {
    pub q: Tensor,
    pub q_logit: Tensor,
    /// Residual recovered by feeding `q` through the quantile direction.
    pub y_inverse_res: Option<Tensor>,
}

#[derive(Debug, Clone)]
pub struct DistributionOutput {
    pub median: MedianOutput,
    pub quantile: Option<QuantileOutput>,
    pub cdf: Option<CdfOutput>,
}

impl DistributionOutput {
    pub fn new(median: MedianOutput) -> Self {
        DistributionOutput {
            median,
            quantile: None,
            cdf: None,
        }
    }

    /// Flatten into the keyed mapping consumed by loss construction.
    pub fn to_map(&self) -> HashMap<&'static str, Tensor> {
        let mut map = HashMap::new();
        map.insert(MEDIAN, self.median.median.clone());
        map.insert(POS_MED_RES, self.median.pos_med_res.clone());
        map.insert(NEG_MED_RES, self.median.neg_med_res.clone());
        if let Some(quantile) = &self.quantile {
            map.insert(Y_RES, quantile.y_res.clone());
            map.insert(MED_ADD, quantile.med_add.clone());
            map.insert(MED_MUL, quantile.med_mul.clone());
            map.insert(MED_RES, quantile.med_res.clone());
            map.insert(Q_POSITIVE_MASK, quantile.q_positive_mask.clone());
            if let Some(q_inverse) = &quantile.q_inverse {
                map.insert(Q_INVERSE, q_inverse.clone());
            }
        }
        if let Some(cdf) = &self.cdf {
            map.insert(Q, cdf.q.clone());
            map.insert(Q_LOGIT, cdf.q_logit.clone());
            if let Some(y_inverse_res) = &cdf.y_inverse_res {
                map.insert(Y_INVERSE_RES, y_inverse_res.clone());
            }
        }
        map
    }
}
