//! Monotonic mappings
//!
//! Sign-constrained layers and their compositions. A stack of layers whose
//! weights are restricted to one sign, joined by increasing activations, is
//! monotonic in its input for any parameter value. Conditioned variants scale
//! every hidden response by a strictly positive function of the feature
//! encoding, which keeps that property.
use crate::constraints::Constraint;
use crate::errors::DdrError;
use crate::param::{Param, ParamStore};
use crate::utils::mish;
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Elementwise activation applied after a layer.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    /// Not monotonic, only allowed on unconstrained layers.
    Mish,
}

impl Activation {
    pub fn is_monotonic(&self) -> bool {
        !matches!(self, Activation::Mish)
    }

    pub fn apply(&self, net: &Tensor) -> Result<Tensor, DdrError> {
        let out = match self {
            Activation::Identity => net.clone(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(net)?,
            Activation::Tanh => net.tanh()?,
            Activation::Mish => mish(net)?,
        };
        Ok(out)
    }
}

/// Fully connected layer whose weights follow a [`Constraint`].
#[derive(Debug, Clone)]
pub struct ConstrainedLayer {
    weight: Param,
    bias: Option<Param>,
    constraint: Constraint,
    activation: Activation,
    in_dim: usize,
    out_dim: usize,
}

impl ConstrainedLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prefix: &str,
        in_dim: usize,
        out_dim: usize,
        constraint: Constraint,
        activation: Activation,
        bias: bool,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        if constraint.is_monotonic() && !activation.is_monotonic() {
            return Err(DdrError::InvalidParameter(
                format!("{}.activation", prefix),
                "a monotonic activation".to_string(),
                format!("{:?}", activation),
            ));
        }
        let bound = 1.0 / (in_dim as f32).sqrt();
        let weight = store.uniform(&format!("{}.weight", prefix), (out_dim, in_dim), bound)?;
        let bias = if bias {
            Some(store.zeros(&format!("{}.bias", prefix), out_dim)?)
        } else {
            None
        };
        Ok(ConstrainedLayer {
            weight,
            bias,
            constraint,
            activation,
            in_dim,
            out_dim,
        })
    }

    pub fn forward(&self, net: &Tensor) -> Result<Tensor, DdrError> {
        let weight = self.constraint.restrict(&self.weight.tensor())?;
        let mut net = net.matmul(&weight.t()?)?;
        if let Some(bias) = &self.bias {
            net = net.broadcast_add(&bias.tensor())?;
        }
        self.activation.apply(&net)
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn constraint(&self) -> Constraint {
        self.constraint
    }

    pub fn params(&self) -> Vec<Param> {
        let mut params = vec![self.weight.clone()];
        params.extend(self.bias.clone());
        params
    }
}

/// Mapping that is monotonic in every input coordinate, in one direction.
#[derive(Debug, Clone)]
pub struct MonotonicMapping {
    layers: Vec<ConstrainedLayer>,
    ascent: bool,
}

impl MonotonicMapping {
    /// Stack of layers of widths `num_units`, optionally followed by a linear
    /// output layer of width `out_dim`.
    ///
    /// Hidden layers are ascending; the direction is set by the last layer,
    /// which is the output layer when `out_dim` is given.
    #[allow(clippy::too_many_arguments)]
    pub fn stack(
        prefix: &str,
        in_dim: usize,
        out_dim: Option<usize>,
        num_units: &[usize],
        ascent: bool,
        activation: Activation,
        bias: bool,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        let mut widths: Vec<(usize, Activation)> = num_units.iter().map(|&u| (u, activation)).collect();
        if let Some(out_dim) = out_dim {
            widths.push((out_dim, Activation::Identity));
        }
        if widths.is_empty() {
            return Err(DdrError::InvalidParameter(
                format!("{}.num_units", prefix),
                "at least one layer".to_string(),
                "none".to_string(),
            ));
        }
        let last = widths.len() - 1;
        let mut layers = Vec::with_capacity(widths.len());
        let mut current = in_dim;
        for (i, (width, act)) in widths.into_iter().enumerate() {
            let constraint = if i == last {
                Constraint::from_ascent(ascent)
            } else {
                Constraint::Positive
            };
            let layer = ConstrainedLayer::new(
                &format!("{}.{}", prefix, i),
                current,
                width,
                constraint,
                act,
                bias,
                store,
            )?;
            layers.push(layer);
            current = width;
        }
        Ok(MonotonicMapping { layers, ascent })
    }

    /// Two-layer mapping `in_dim -> hidden_dim -> out_dim`, used as the
    /// transition function of the coupling blocks.
    #[allow(clippy::too_many_arguments)]
    pub fn couple(
        prefix: &str,
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        activation: Activation,
        ascent: bool,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        MonotonicMapping::stack(
            prefix,
            in_dim,
            Some(out_dim),
            &[hidden_dim],
            ascent,
            activation,
            true,
            store,
        )
    }

    pub fn forward(&self, net: &Tensor) -> Result<Tensor, DdrError> {
        let mut net = net.clone();
        for layer in &self.layers {
            net = layer.forward(&net)?;
        }
        Ok(net)
    }

    pub fn layers(&self) -> &[ConstrainedLayer] {
        &self.layers
    }

    pub fn is_ascending(&self) -> bool {
        self.ascent
    }

    pub fn in_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    pub fn out_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    pub fn params(&self) -> Vec<Param> {
        self.layers.iter().flat_map(ConstrainedLayer::params).collect()
    }
}

/// Unconstrained per-layer network over the feature encoding.
///
/// Each layer's response conditions the matching layer of a
/// [`ConditionalMapping`].
#[derive(Debug, Clone)]
pub struct ConditionNetwork {
    layers: Vec<ConstrainedLayer>,
}

impl ConditionNetwork {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prefix: &str,
        condition_dim: usize,
        out_dim: Option<usize>,
        num_units: &[usize],
        bias: bool,
        store: &mut ParamStore,
    ) -> Result<Self, DdrError> {
        let mut layers = Vec::with_capacity(num_units.len() + 1);
        let mut current = condition_dim;
        for (i, &width) in num_units.iter().enumerate() {
            layers.push(ConstrainedLayer::new(
                &format!("{}.{}", prefix, i),
                current,
                width,
                Constraint::Unconstrained,
                Activation::Mish,
                bias,
                store,
            )?);
            current = width;
        }
        if let Some(out_dim) = out_dim {
            layers.push(ConstrainedLayer::new(
                &format!("{}.{}", prefix, num_units.len()),
                current,
                out_dim,
                Constraint::Unconstrained,
                Activation::Identity,
                bias,
                store,
            )?);
        }
        Ok(ConditionNetwork { layers })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn in_dim(&self) -> Option<usize> {
        self.layers.first().map(ConstrainedLayer::in_dim)
    }

    pub fn out_dims(&self) -> Vec<usize> {
        self.layers.iter().map(ConstrainedLayer::out_dim).collect()
    }

    pub fn layer(&self, i: usize) -> &ConstrainedLayer {
        &self.layers[i]
    }

    pub fn params(&self) -> Vec<Param> {
        self.layers.iter().flat_map(ConstrainedLayer::params).collect()
    }
}

/// Outputs of a conditioned mapping: the monotonic branch and the final
/// conditioning response.
#[derive(Debug, Clone)]
pub struct ConditionalOutput {
    pub net: Tensor,
    pub cond: Tensor,
}

/// Strictly positive modulation keeping `net` monotonic for any `cond`.
fn modulate(net: &Tensor, cond: &Tensor) -> Result<Tensor, DdrError> {
    let scale = cond.tanh()?.exp()?;
    Ok((net * scale)?)
}

/// A [`MonotonicMapping`] whose hidden responses are modulated by a
/// [`ConditionNetwork`].
#[derive(Debug, Clone)]
pub struct ConditionalMapping {
    mapping: MonotonicMapping,
    conditions: Arc<ConditionNetwork>,
    add_last: bool,
    detach_condition: bool,
}

impl ConditionalMapping {
    /// `add_last` also modulates the output layer; `detach_condition` stops
    /// this mapping's gradient from reaching the feature encoder.
    pub fn new(
        mapping: MonotonicMapping,
        conditions: Arc<ConditionNetwork>,
        add_last: bool,
        detach_condition: bool,
    ) -> Result<Self, DdrError> {
        let main_dims: Vec<usize> = mapping.layers().iter().map(ConstrainedLayer::out_dim).collect();
        let cond_dims = conditions.out_dims();
        if main_dims.len() != cond_dims.len() {
            return Err(DdrError::InvalidParameter(
                "condition layers".to_string(),
                main_dims.len().to_string(),
                cond_dims.len().to_string(),
            ));
        }
        let modulated = if add_last { main_dims.len() } else { main_dims.len() - 1 };
        if main_dims[..modulated] != cond_dims[..modulated] {
            return Err(DdrError::InvalidParameter(
                "condition widths".to_string(),
                format!("{:?}", &main_dims[..modulated]),
                format!("{:?}", &cond_dims[..modulated]),
            ));
        }
        Ok(ConditionalMapping {
            mapping,
            conditions,
            add_last,
            detach_condition,
        })
    }

    pub fn forward(&self, net: &Tensor, cond: &Tensor) -> Result<ConditionalOutput, DdrError> {
        let num_layers = self.mapping.layers().len();
        let mut net = net.clone();
        let mut cond = if self.detach_condition {
            cond.detach()
        } else {
            cond.clone()
        };
        for (i, layer) in self.mapping.layers().iter().enumerate() {
            net = layer.forward(&net)?;
            cond = self.conditions.layer(i).forward(&cond)?;
            if i + 1 < num_layers || self.add_last {
                net = modulate(&net, &cond)?;
            }
        }
        Ok(ConditionalOutput { net, cond })
    }

    pub fn mapping(&self) -> &MonotonicMapping {
        &self.mapping
    }

    pub fn conditions(&self) -> &Arc<ConditionNetwork> {
        &self.conditions
    }

    /// Parameters of the monotonic branch only.
    pub fn main_params(&self) -> Vec<Param> {
        self.mapping.params()
    }

    pub fn params(&self) -> Vec<Param> {
        let mut params = self.mapping.params();
        params.extend(self.conditions.params());
        params
    }
}
