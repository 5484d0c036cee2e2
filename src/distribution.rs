//! Distribution core
//!
//! Orchestrates the quantile projector, the target projector and the shared
//! coupling stack. The quantile direction runs
//! `q -> latent -> blocks -> y`, the cdf direction runs
//! `y -> latent -> inverse blocks (reversed) -> q`, both anchored on the
//! conditional median.
use crate::config::{Capability, DistributionConfig};
use crate::constants::MIN_USEFUL_LATENT_DIM;
use crate::coupling::{InvertibleBlock, LatentPair};
use crate::errors::DdrError;
use crate::output::{CdfOutput, DistributionOutput, MedianOutput, QuantileOutput};
use crate::param::{Param, ParamGroup, ParamStore};
use crate::projector::{MedianHeads, PseudoInvertibleProjector, SplitFromLatent, SplitLayout, SplitToLatent};
use crate::utils::{rescale_quantile, squash_logit, validate_shape, TargetScaler};
use candle_core::{DType, Device, Tensor, Var};
use hashbrown::HashMap;
use log::{debug, info, warn};

/// What a single [`DistributionCore::forward`] call should compute.
#[derive(Debug, Clone, Default)]
pub struct ForwardRequest {
    /// Quantile levels in `(0, 1)`, shape `(batch, 1)`.
    pub q_batch: Option<Tensor>,
    /// Target values, shape `(batch, 1)`.
    pub y_batch: Option<Tensor>,
    /// Only compute the median branch.
    pub median: bool,
    /// Also run each computed direction back through the other one.
    pub do_inverse: bool,
}

impl ForwardRequest {
    pub fn median() -> Self {
        ForwardRequest {
            median: true,
            ..Default::default()
        }
    }

    pub fn quantile(q_batch: Tensor) -> Self {
        ForwardRequest::default().set_q_batch(q_batch)
    }

    pub fn cdf(y_batch: Tensor) -> Self {
        ForwardRequest::default().set_y_batch(y_batch)
    }

    pub fn set_q_batch(mut self, q_batch: Tensor) -> Self {
        self.q_batch = Some(q_batch);
        self
    }

    pub fn set_y_batch(mut self, y_batch: Tensor) -> Self {
        self.y_batch = Some(y_batch);
        self
    }

    pub fn set_do_inverse(mut self, do_inverse: bool) -> Self {
        self.do_inverse = do_inverse;
        self
    }
}

/// Conditional quantile function and cdf sharing one invertible graph.
///
/// Parameters are only mutated by an external trainer between calls. The
/// cdf direction temporarily freezes the quantile group, so calls on one
/// instance must be serialized.
pub struct DistributionCore {
    config: DistributionConfig,
    capability: Capability,
    q_proj: PseudoInvertibleProjector,
    y_proj: PseudoInvertibleProjector,
    /// Median heads, referenced by the from-latent split of every projector
    /// that has one.
    heads: MedianHeads,
    blocks: Vec<InvertibleBlock>,
    q_parameters: ParamGroup,
    block_parameters: ParamGroup,
    /// `q_parameters` followed by `block_parameters`.
    isolated: ParamGroup,
    scaler: Option<TargetScaler>,
    store: ParamStore,
}

impl DistributionCore {
    pub fn new(config: DistributionConfig, device: &Device) -> Result<Self, DdrError> {
        config.validate()?;
        let capability = config.capability;
        if config.latent_dim < MIN_USEFUL_LATENT_DIM {
            warn!(
                "Latent width {} leaves coupling transitions of width {}.",
                config.latent_dim,
                config.latent_dim / 2
            );
        }
        let mut store = ParamStore::new(config.seed, device);
        let layout = SplitLayout {
            latent_dim: config.latent_dim,
            num_layers: config.num_layers,
            condition_dim: config.in_dim,
        };
        let heads = MedianHeads::new("median_heads", layout, &mut store)?;

        // q projector: to-latent serves the quantile direction, from-latent
        // produces the cdf logit.
        let q_to_latent = if capability.fetch_q() {
            Some(SplitToLatent::new("q_proj.to_latent", layout, true, true, &mut store)?)
        } else {
            None
        };
        let q_from_latent = if capability.fetch_cdf() {
            Some(SplitFromLatent::new(
                "q_proj.from_latent",
                layout,
                1,
                true,
                false,
                &heads,
                &mut store,
            )?)
        } else {
            None
        };
        let q_proj = PseudoInvertibleProjector::new("q", layout, q_to_latent, q_from_latent);

        // y projector: to-latent serves the cdf direction, from-latent
        // produces `(y_add, y_mul)`.
        let y_to_latent = if capability.fetch_cdf() {
            Some(SplitToLatent::new("y_proj.to_latent", layout, true, false, &mut store)?)
        } else {
            None
        };
        let y_from_latent = if capability.fetch_q() {
            Some(SplitFromLatent::new(
                "y_proj.from_latent",
                layout,
                2,
                true,
                true,
                &heads,
                &mut store,
            )?)
        } else {
            None
        };
        let y_proj = PseudoInvertibleProjector::new("y", layout, y_to_latent, y_from_latent);

        let blocks = (0..config.num_blocks)
            .map(|i| InvertibleBlock::new(&format!("blocks.{}", i), config.latent_dim, &mut store))
            .collect::<Result<Vec<_>, _>>()?;

        let mut q_parameters = ParamGroup::default();
        if capability.fetch_q() {
            q_parameters.extend(q_proj.to_latent_params());
            q_parameters.extend(y_proj.from_latent_main_params());
            q_parameters.extend(heads.params());
        }
        let block_parameters = ParamGroup::new(blocks.iter().flat_map(InvertibleBlock::params).collect());
        let mut isolated = q_parameters.clone();
        isolated.extend(block_parameters.params().iter().cloned());

        let scaler = config.target_scaler()?;
        let core = DistributionCore {
            config,
            capability,
            q_proj,
            y_proj,
            heads,
            blocks,
            q_parameters,
            block_parameters,
            isolated,
            scaler,
            store,
        };
        info!(
            "Built distribution core: capability {:?}, latent width {}, {} coupling blocks, {} parameters ({} in the quantile group).",
            core.capability,
            core.config.latent_dim,
            core.blocks.len(),
            core.store.vars().len(),
            core.q_parameters.len()
        );
        Ok(core)
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn q_projector(&self) -> &PseudoInvertibleProjector {
        &self.q_proj
    }

    pub fn y_projector(&self) -> &PseudoInvertibleProjector {
        &self.y_proj
    }

    pub fn median_heads(&self) -> &MedianHeads {
        &self.heads
    }

    pub fn blocks(&self) -> &[InvertibleBlock] {
        &self.blocks
    }

    /// Parameters exclusive to the quantile-producing path.
    pub fn q_parameters(&self) -> &ParamGroup {
        &self.q_parameters
    }

    pub fn block_parameters(&self) -> &ParamGroup {
        &self.block_parameters
    }

    /// Group frozen while the cdf direction runs.
    pub fn isolation_group(&self) -> &ParamGroup {
        &self.isolated
    }

    /// Every parameter exactly once, shared heads included.
    pub fn all_params(&self) -> Vec<Param> {
        let mut params = self.q_proj.to_latent_params();
        params.extend(self.q_proj.from_latent_main_params());
        params.extend(self.y_proj.to_latent_params());
        params.extend(self.y_proj.from_latent_main_params());
        params.extend(self.heads.params());
        params.extend(self.block_parameters.params().iter().cloned());
        params
    }

    /// Variables to hand to an optimizer.
    pub fn parameters(&self) -> Vec<Var> {
        self.store.vars()
    }

    pub fn named_parameters(&self) -> Result<HashMap<String, Var>, DdrError> {
        self.store.named_vars()
    }

    /// The map every parameter was created in, e.g. to save or load weights.
    pub fn varmap(&self) -> &candle_nn::VarMap {
        self.store.varmap()
    }

    fn check_condition(&self, condition: &Tensor) -> Result<usize, DdrError> {
        let dims = condition.dims();
        if dims.len() != 2 || dims[1] != self.config.in_dim {
            let batch = dims.first().copied().unwrap_or(0);
            return Err(DdrError::ShapeMismatch(
                "condition".to_string(),
                vec![batch, self.config.in_dim],
                dims.to_vec(),
            ));
        }
        Ok(dims[0])
    }

    pub fn forward(&self, condition: &Tensor, request: &ForwardRequest) -> Result<DistributionOutput, DdrError> {
        let batch = self.check_condition(condition)?;
        if request.median {
            if request.q_batch.is_some() {
                return Err(DdrError::MedianWithInput("a quantile level".to_string()));
            }
            if request.y_batch.is_some() {
                return Err(DdrError::MedianWithInput("a target value".to_string()));
            }
        }
        if let Some(q_batch) = &request.q_batch {
            validate_shape(q_batch, &[batch, 1], "q_batch")?;
        }
        if let Some(y_batch) = &request.y_batch {
            validate_shape(y_batch, &[batch, 1], "y_batch")?;
        }

        let mut output = DistributionOutput::new(self.median_results(condition)?);
        if request.median {
            return Ok(output);
        }
        if let Some(q_batch) = &request.q_batch {
            if self.capability.fetch_q() {
                debug!("Quantile direction over a batch of {}.", batch);
                output.quantile = Some(self.q_results(condition, q_batch, request.do_inverse)?);
            } else {
                debug!("Ignoring quantile levels, capability is {:?}.", self.capability);
            }
        }
        if let Some(y_batch) = &request.y_batch {
            if self.capability.fetch_cdf() {
                debug!("Cdf direction over a batch of {}.", batch);
                let y_batch = match &self.scaler {
                    Some(scaler) => scaler.scale(y_batch)?,
                    None => y_batch.clone(),
                };
                let median_residual = (y_batch - output.median.median.detach())?;
                output.cdf = Some(self.y_results(condition, &median_residual, request.do_inverse)?);
            } else {
                debug!("Ignoring target values, capability is {:?}.", self.capability);
            }
        }
        Ok(output)
    }

    fn split_median(cond: &Tensor) -> Result<MedianOutput, DdrError> {
        Ok(MedianOutput {
            median: cond.narrow(1, 0, 1)?,
            pos_med_res: cond.narrow(1, 1, 1)?,
            neg_med_res: cond.narrow(1, 2, 1)?,
        })
    }

    /// The median heads do not read the latent pair, so a zero pair through
    /// whichever from-latent split exists yields them.
    fn median_results(&self, condition: &Tensor) -> Result<MedianOutput, DdrError> {
        let (batch, _) = condition.dims2()?;
        let zeros = Tensor::zeros((batch, self.config.latent_dim / 2), DType::F32, condition.device())?;
        let projector = if self.capability.fetch_q() {
            &self.y_proj
        } else {
            &self.q_proj
        };
        let pack = projector.unproject(&(zeros.clone(), zeros), condition)?;
        DistributionCore::split_median(&pack.cond)
    }

    fn q_results(&self, condition: &Tensor, q_batch: &Tensor, do_inverse: bool) -> Result<QuantileOutput, DdrError> {
        let q_batch = rescale_quantile(q_batch)?;
        let mut pair: LatentPair = self.q_proj.project(&q_batch, condition)?;
        for block in &self.blocks {
            pair = block.forward(&pair.0, &pair.1)?;
        }
        let y_pack = self.y_proj.unproject(&pair, condition)?;
        let median = DistributionCore::split_median(&y_pack.cond)?;

        // Ties at the median (rescaled level exactly 0) take the negative residual.
        let q_positive_mask = q_batch.gt(0.0)?;
        let med_res = q_positive_mask.where_cond(&median.pos_med_res, &median.neg_med_res)?;
        let y_add = y_pack.net.narrow(1, 0, 1)?;
        let y_mul = y_pack.net.narrow(1, 1, 1)?;
        let y_res = ((med_res.detach() * &y_mul)? + &y_add)?;

        let q_inverse = if do_inverse && self.capability.fetch_cdf() {
            Some(self.y_results(condition, &y_res.detach(), false)?.q)
        } else {
            None
        };
        Ok(QuantileOutput {
            y_res,
            med_add: y_add,
            med_mul: y_mul,
            med_res,
            q_positive_mask,
            q_inverse,
        })
    }

    fn y_results(&self, condition: &Tensor, median_residual: &Tensor, do_inverse: bool) -> Result<CdfOutput, DdrError> {
        let mut pair: LatentPair = self.y_proj.project(median_residual, condition)?;
        let _guard = self.isolated.isolate_if(self.capability.fetch_q());
        for block in self.blocks.iter().rev() {
            pair = block.inverse(&pair.0, &pair.1)?;
        }
        let q_logit = self.q_proj.unproject(&pair, condition)?.net;
        let q = squash_logit(&q_logit)?;
        let y_inverse_res = if do_inverse && self.capability.fetch_q() {
            Some(self.q_results(condition, &q.detach(), false)?.y_res)
        } else {
            None
        };
        Ok(CdfOutput { q, q_logit, y_inverse_res })
    }

    fn unscale(&self, y: Tensor) -> Result<Tensor, DdrError> {
        match &self.scaler {
            Some(scaler) => Ok(scaler.unscale(&y)?),
            None => Ok(y),
        }
    }

    /// Conditional median in target units.
    pub fn predict_median(&self, condition: &Tensor) -> Result<Tensor, DdrError> {
        let output = self.forward(condition, &ForwardRequest::median())?;
        self.unscale(output.median.median)
    }

    /// Value at quantile level `q_batch`, in target units.
    pub fn predict_quantile(&self, condition: &Tensor, q_batch: &Tensor) -> Result<Tensor, DdrError> {
        let output = self.forward(condition, &ForwardRequest::quantile(q_batch.clone()))?;
        let quantile = output
            .quantile
            .ok_or(DdrError::MissingDirection("from-latent", "y"))?;
        self.unscale((output.median.median + quantile.y_res)?)
    }

    /// Probability that the target is at most `y_batch`.
    pub fn predict_cdf(&self, condition: &Tensor, y_batch: &Tensor) -> Result<Tensor, DdrError> {
        let output = self.forward(condition, &ForwardRequest::cdf(y_batch.clone()))?;
        let cdf = output.cdf.ok_or(DdrError::MissingDirection("from-latent", "q"))?;
        Ok(cdf.q)
    }

    /// Central intervals: for each `alpha`, the quantiles at `alpha / 2` and
    /// `1 - alpha / 2`, keyed by `alpha.to_string()`.
    pub fn predict_intervals(&self, condition: &Tensor, alpha: &[f64]) -> Result<HashMap<String, [Tensor; 2]>, DdrError> {
        let batch = self.check_condition(condition)?;
        let mut intervals = HashMap::new();
        for alpha_ in alpha {
            if !(*alpha_ > 0.0 && *alpha_ < 1.0) {
                return Err(DdrError::InvalidParameter(
                    "alpha".to_string(),
                    "a value in (0, 1)".to_string(),
                    alpha_.to_string(),
                ));
            }
            let lower_q = Tensor::full((alpha_ / 2.0) as f32, (batch, 1), condition.device())?;
            let upper_q = Tensor::full((1.0 - alpha_ / 2.0) as f32, (batch, 1), condition.device())?;
            let lower = self.predict_quantile(condition, &lower_q)?;
            let upper = self.predict_quantile(condition, &upper_q)?;
            intervals.insert(alpha_.to_string(), [lower, upper]);
        }
        Ok(intervals)
    }
}
