//! Parameters
//!
//! Learned tensors with a shared trainable flag, parameter groups, and the
//! scoped guard used to isolate the gradients of a group during one sub-call.
use crate::errors::DdrError;
use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::{Init, VarMap};
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A learned tensor owned by a module.
///
/// Clones share both the variable and the trainable flag, so a parameter
/// referenced from two places is frozen or unfrozen in one step.
#[derive(Clone, Debug)]
pub struct Param {
    name: String,
    var: Var,
    trainable: Arc<AtomicBool>,
}

impl Param {
    pub fn from_var(name: impl Into<String>, var: Var) -> Self {
        Param {
            name: name.into(),
            var,
            trainable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Tensor to use in a forward pass.
    ///
    /// A frozen parameter hands out a detached copy, so the backward pass
    /// records no gradient for its variable.
    pub fn tensor(&self) -> Tensor {
        if self.requires_grad() {
            self.var.as_tensor().clone()
        } else {
            self.var.as_tensor().detach()
        }
    }

    pub fn var(&self) -> &Var {
        &self.var
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_grad(&self) -> bool {
        self.trainable.load(Ordering::Relaxed)
    }

    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.trainable.store(requires_grad, Ordering::Relaxed)
    }
}

/// Creates every parameter of a model into one [`VarMap`].
///
/// Names are unique within a store. Biases use candle's constant init;
/// weights are drawn from a seeded `StdRng`, since candle's CPU generator
/// behind `Init::Uniform` cannot be seeded.
pub struct ParamStore {
    varmap: VarMap,
    rng: StdRng,
    device: Device,
}

impl ParamStore {
    pub fn new(seed: u64, device: &Device) -> Self {
        ParamStore {
            varmap: VarMap::new(),
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    fn create<S: Into<Shape>>(&self, name: &str, shape: S, init: Init) -> Result<Param, DdrError> {
        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| DdrError::Registry(e.to_string()))?;
        if data.contains_key(name) {
            return Err(DdrError::Registry(format!("parameter {} already exists", name)));
        }
        let var = init.var(shape, DType::F32, &self.device)?;
        data.insert(name.to_string(), var.clone());
        Ok(Param::from_var(name, var))
    }

    pub fn zeros<S: Into<Shape>>(&mut self, name: &str, shape: S) -> Result<Param, DdrError> {
        self.create(name, shape, Init::Const(0.0))
    }

    /// Parameter drawn uniformly from `[-bound, bound)`.
    pub fn uniform<S: Into<Shape>>(&mut self, name: &str, shape: S, bound: f32) -> Result<Param, DdrError> {
        let shape = shape.into();
        let param = self.create(name, shape.clone(), Init::Const(0.0))?;
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| self.rng.gen_range(-bound..bound))
            .collect();
        param.var().set(&Tensor::from_vec(data, shape, &self.device)?)?;
        Ok(param)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn named_vars(&self) -> Result<HashMap<String, Var>, DdrError> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| DdrError::Registry(e.to_string()))?;
        Ok(data.iter().map(|(name, var)| (name.clone(), var.clone())).collect())
    }
}

/// An ordered, named collection of parameters.
#[derive(Clone, Debug, Default)]
pub struct ParamGroup {
    params: Vec<Param>,
}

impl ParamGroup {
    pub fn new(params: Vec<Param>) -> Self {
        ParamGroup { params }
    }

    pub fn extend(&mut self, params: impl IntoIterator<Item = Param>) {
        self.params.extend(params)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.params.iter().map(|p| p.var().clone()).collect()
    }

    pub fn requires_grad_flags(&self) -> Vec<bool> {
        self.params.iter().map(Param::requires_grad).collect()
    }

    pub fn set_requires_grad(&self, requires_grad: bool) {
        for p in &self.params {
            p.set_requires_grad(requires_grad);
        }
    }

    /// Freeze every parameter of the group until the guard is dropped.
    ///
    /// The guard restores the flags seen on entry, on every exit path.
    /// Toggling is not reentrant across threads: two concurrent calls that
    /// isolate the same group race on the flags.
    pub fn isolate(&self) -> IsolationGuard<'_> {
        IsolationGuard::new(self, true)
    }

    /// Like [`ParamGroup::isolate`], but only freezes when `active` is set.
    pub fn isolate_if(&self, active: bool) -> IsolationGuard<'_> {
        IsolationGuard::new(self, active)
    }

    /// Run `f` with the group frozen, restoring the flags before returning.
    pub fn with_isolated<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let _guard = self.isolate();
        f()
    }
}

/// Scoped gradient isolation over a [`ParamGroup`].
pub struct IsolationGuard<'a> {
    group: &'a ParamGroup,
    saved: Vec<bool>,
}

impl<'a> IsolationGuard<'a> {
    fn new(group: &'a ParamGroup, active: bool) -> Self {
        let saved = group.requires_grad_flags();
        if active {
            group.set_requires_grad(false);
        }
        IsolationGuard { group, saved }
    }
}

impl Drop for IsolationGuard<'_> {
    fn drop(&mut self) {
        for (p, flag) in self.group.params.iter().zip(&self.saved) {
            p.set_requires_grad(*flag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn group() -> ParamGroup {
        let mut store = ParamStore::new(0, &Device::Cpu);
        let a = store.uniform("a", (2, 3), 1.0).unwrap();
        let b = store.zeros("b", 3).unwrap();
        ParamGroup::new(vec![a, b])
    }

    #[test]
    fn test_uniform_within_bound() {
        let mut store = ParamStore::new(1, &Device::Cpu);
        let p = store.uniform("w", (4, 5), 0.5).unwrap();
        let values = p.tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 20);
        assert!(values.iter().all(|v| (-0.5..0.5).contains(v)));
        assert_eq!(p.name(), "w");
    }

    #[test]
    fn test_store_registers_vars() {
        let mut store = ParamStore::new(2, &Device::Cpu);
        let w = store.uniform("layer.weight", (3, 2), 1.0).unwrap();
        store.zeros("layer.bias", 3).unwrap();
        assert_eq!(store.vars().len(), 2);
        let named = store.named_vars().unwrap();
        assert_eq!(named["layer.bias"].dims(), &[3]);
        let registered = named["layer.weight"].flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let own = w.tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(registered, own);
        assert!(matches!(store.zeros("layer.bias", 3), Err(DdrError::Registry(_))));
    }

    #[test]
    fn test_store_seed_is_reproducible() {
        let draw = |seed| {
            let mut store = ParamStore::new(seed, &Device::Cpu);
            let p = store.uniform("w", 16, 1.0).unwrap();
            p.tensor().to_vec1::<f32>().unwrap()
        };
        assert_eq!(draw(5), draw(5));
        assert_ne!(draw(5), draw(6));
    }

    #[test]
    fn test_clones_share_flag() {
        let g = group();
        let alias = g.params()[0].clone();
        alias.set_requires_grad(false);
        assert!(!g.params()[0].requires_grad());
    }

    #[test]
    fn test_frozen_param_gets_no_gradient() {
        let g = group();
        let w = &g.params()[0];
        let loss = w.tensor().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(w.var().as_tensor()).is_some());

        let _guard = g.isolate();
        let loss = w.tensor().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(w.var().as_tensor()).is_none());
    }

    #[test]
    fn test_guard_restores_prior_flags() {
        let g = group();
        g.params()[1].set_requires_grad(false);
        {
            let _guard = g.isolate();
            assert_eq!(g.requires_grad_flags(), vec![false, false]);
        }
        assert_eq!(g.requires_grad_flags(), vec![true, false]);
    }

    #[test]
    fn test_inactive_guard_keeps_flags() {
        let g = group();
        {
            let _guard = g.isolate_if(false);
            assert_eq!(g.requires_grad_flags(), vec![true, true]);
        }
        assert_eq!(g.requires_grad_flags(), vec![true, true]);
    }

    #[test]
    fn test_restored_on_error_and_panic() {
        let g = group();
        let result: Result<(), DdrError> = g.with_isolated(|| Err(DdrError::NothingToFetch));
        assert!(result.is_err());
        assert_eq!(g.requires_grad_flags(), vec![true, true]);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _guard = g.isolate();
            panic!("boom");
        }));
        assert!(outcome.is_err());
        assert_eq!(g.requires_grad_flags(), vec![true, true]);
    }
}
