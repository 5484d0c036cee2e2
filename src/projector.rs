//! Pseudo-invertible projectors
//!
//! Map a scalar batch (quantile level or target residual) into a latent pair
//! and a latent pair back into a scalar batch. The two directions are built
//! from independent parameters; how well they invert each other is a trained
//! property, never enforced here.
use crate::constants::MEDIAN_CHANNELS;
use crate::coupling::LatentPair;
use crate::errors::DdrError;
use crate::monotonic::{Activation, ConditionNetwork, ConditionalMapping, ConditionalOutput, MonotonicMapping};
use crate::param::{Param, ParamStore};
use crate::utils::validate_shape;
use candle_core::Tensor;
use std::sync::Arc;

/// Architecture shared by every mapping of a projector.
#[derive(Debug, Clone, Copy)]
pub struct SplitLayout {
    pub latent_dim: usize,
    pub num_layers: usize,
    pub condition_dim: usize,
}

impl SplitLayout {
    pub fn half_dim(&self) -> usize {
        self.latent_dim / 2
    }
}

/// Conditioning networks producing `(median, pos_med_res, neg_med_res)`.
///
/// The outputs of the two networks are summed. When both directions are
/// available the same heads are referenced by the from-latent split of both
/// projectors; the distribution core owns them.
#[derive(Debug, Clone)]
pub struct MedianHeads {
    pub first: Arc<ConditionNetwork>,
    pub second: Arc<ConditionNetwork>,
}

impl MedianHeads {
    pub fn new(prefix: &str, layout: SplitLayout, store: &mut ParamStore) -> Result<Self, DdrError> {
        let units = vec![layout.half_dim(); layout.num_layers];
        let mut head = |name: &str| -> Result<Arc<ConditionNetwork>, DdrError> {
            let net = ConditionNetwork::new(
                &format!("{}.{}", prefix, name),
                layout.condition_dim,
                Some(MEDIAN_CHANNELS),
                &units,
                true,
                store,
            )?;
            Ok(Arc::new(net))
        };
        let first = head("first")?;
        let second = head("second")?;
        Ok(MedianHeads { first, second })
    }

    pub fn params(&self) -> Vec<Param> {
        let mut params = self.first.params();
        params.extend(self.second.params());
        params
    }
}

/// Expands a `(batch, 1)` scalar into a latent pair, one mapping per half.
#[derive(Debug, Clone)]
pub struct SplitToLatent {
    m1: ConditionalMapping,
    m2: ConditionalMapping,
}

impl SplitToLatent {
    /// `ascent1` and `ascent2` set the direction of each half.
    pub fn new(
        prefix: &str,
        layout: SplitLayout,
        ascent1: bool,
        ascent2: bool,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        let units = vec![layout.half_dim(); layout.num_layers + 1];
        let mut build = |name: &str, ascent: bool| -> Result<ConditionalMapping, DdrError> {
            let prefix = format!("{}.{}", prefix, name);
            let mapping = MonotonicMapping::stack(
                &format!("{}.main", prefix),
                1,
                None,
                &units,
                ascent,
                Activation::Sigmoid,
                true,
                store,
            )?;
            let conditions = ConditionNetwork::new(
                &format!("{}.cond", prefix),
                layout.condition_dim,
                None,
                &units,
                false,
                store,
            )?;
            ConditionalMapping::new(mapping, Arc::new(conditions), true, false)
        };
        let m1 = build("m1", ascent1)?;
        let m2 = build("m2", ascent2)?;
        Ok(SplitToLatent { m1, m2 })
    }

    pub fn forward(&self, net: &Tensor, cond: &Tensor) -> Result<LatentPair, DdrError> {
        let l1 = self.m1.forward(net, cond)?.net;
        let l2 = self.m2.forward(net, cond)?.net;
        Ok((l1, l2))
    }

    pub fn params(&self) -> Vec<Param> {
        let mut params = self.m1.params();
        params.extend(self.m2.params());
        params
    }
}

/// Compresses a latent pair into `out_dim` monotonic channels plus the
/// median channels of the [`MedianHeads`].
#[derive(Debug, Clone)]
pub struct SplitFromLatent {
    m1: ConditionalMapping,
    m2: ConditionalMapping,
    out_dim: usize,
}

impl SplitFromLatent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prefix: &str,
        layout: SplitLayout,
        out_dim: usize,
        ascent1: bool,
        ascent2: bool,
        heads: &MedianHeads,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        let units = vec![layout.half_dim(); layout.num_layers];
        let mut build = |name: &str,
                         ascent: bool,
                         conditions: &Arc<ConditionNetwork>|
         -> Result<ConditionalMapping, DdrError> {
            let mapping = MonotonicMapping::stack(
                &format!("{}.{}.main", prefix, name),
                layout.half_dim(),
                Some(out_dim),
                &units,
                ascent,
                Activation::Tanh,
                true,
                store,
            )?;
            ConditionalMapping::new(mapping, Arc::clone(conditions), false, true)
        };
        let m1 = build("m1", ascent1, &heads.first)?;
        let m2 = build("m2", ascent2, &heads.second)?;
        Ok(SplitFromLatent { m1, m2, out_dim })
    }

    pub fn forward(&self, pair: &LatentPair, cond: &Tensor) -> Result<ConditionalOutput, DdrError> {
        let o1 = self.m1.forward(&pair.0, cond)?;
        let o2 = self.m2.forward(&pair.1, cond)?;
        Ok(ConditionalOutput {
            net: (o1.net + o2.net)?,
            cond: (o1.cond + o2.cond)?,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Parameters of the monotonic branches, without the median heads.
    pub fn main_params(&self) -> Vec<Param> {
        let mut params = self.m1.main_params();
        params.extend(self.m2.main_params());
        params
    }

    pub fn heads(&self) -> MedianHeads {
        MedianHeads {
            first: Arc::clone(self.m1.conditions()),
            second: Arc::clone(self.m2.conditions()),
        }
    }
}

/// Scalar <-> latent projector with independently parameterized directions.
///
/// A direction the owning core never uses is left unbuilt; calling it is a
/// contract violation reported as [`DdrError::MissingDirection`].
#[derive(Debug, Clone)]
pub struct PseudoInvertibleProjector {
    name: &'static str,
    to_latent: Option<SplitToLatent>,
    from_latent: Option<SplitFromLatent>,
    layout: SplitLayout,
}

impl PseudoInvertibleProjector {
    pub fn new(
        name: &'static str,
        layout: SplitLayout,
        to_latent: Option<SplitToLatent>,
        from_latent: Option<SplitFromLatent>,
    ) -> Self {
        PseudoInvertibleProjector {
            name,
            to_latent,
            from_latent,
            layout,
        }
    }

    fn check_condition(&self, cond: &Tensor, batch: usize) -> Result<(), DdrError> {
        validate_shape(cond, &[batch, self.layout.condition_dim], "condition")
    }

    /// Project a `(batch, 1)` scalar batch into a latent pair.
    pub fn project(&self, scalar: &Tensor, cond: &Tensor) -> Result<LatentPair, DdrError> {
        let to_latent = self
            .to_latent
            .as_ref()
            .ok_or(DdrError::MissingDirection("to-latent", self.name))?;
        let (batch, _) = cond.dims2()?;
        validate_shape(scalar, &[batch, 1], self.name)?;
        self.check_condition(cond, batch)?;
        to_latent.forward(scalar, cond)
    }

    /// Compress a latent pair back into the scalar channels (`net`) and the
    /// median channels (`cond`).
    pub fn unproject(&self, pair: &LatentPair, cond: &Tensor) -> Result<ConditionalOutput, DdrError> {
        let from_latent = self
            .from_latent
            .as_ref()
            .ok_or(DdrError::MissingDirection("from-latent", self.name))?;
        let (batch, _) = cond.dims2()?;
        let half = [batch, self.layout.half_dim()];
        validate_shape(&pair.0, &half, "first latent half")?;
        validate_shape(&pair.1, &half, "second latent half")?;
        self.check_condition(cond, batch)?;
        from_latent.forward(pair, cond)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn has_to_latent(&self) -> bool {
        self.to_latent.is_some()
    }

    pub fn has_from_latent(&self) -> bool {
        self.from_latent.is_some()
    }

    pub fn from_latent(&self) -> Option<&SplitFromLatent> {
        self.from_latent.as_ref()
    }

    pub fn to_latent_params(&self) -> Vec<Param> {
        self.to_latent.as_ref().map(SplitToLatent::params).unwrap_or_default()
    }

    /// Monotonic parameters of the from-latent direction; the median heads
    /// are reported by their owner.
    pub fn from_latent_main_params(&self) -> Vec<Param> {
        self.from_latent
            .as_ref()
            .map(SplitFromLatent::main_params)
            .unwrap_or_default()
    }
}
