//! Coupling blocks
//!
//! Volume-preserving additive coupling over a latent pair. The transition is
//! an ascending [`MonotonicMapping`] over half of the latent width, so a stack
//! of blocks stays increasing in the quantity that was projected in.
use crate::errors::DdrError;
use crate::monotonic::{Activation, MonotonicMapping};
use crate::param::{Param, ParamStore};
use crate::utils::{validate_even, validate_positive_dim};
use candle_core::Tensor;

/// Two equal-width halves `(l1, l2)`, each of shape `(batch, latent_dim / 2)`.
pub type LatentPair = (Tensor, Tensor);

/// Exactly invertible coupling block.
///
/// `forward(l1, l2) = (l2 + T(l1), l1)`: the second half is shifted by a
/// function of the first, then the halves swap slots. After an even number of
/// blocks both halves have been updated equally often and sit in their
/// original slots.
#[derive(Debug, Clone)]
pub struct InvertibleBlock {
    transition: MonotonicMapping,
    half_dim: usize,
}

impl InvertibleBlock {
    pub fn new(prefix: &str, latent_dim: usize, store: &mut ParamStore) -> Result<Self, DdrError> {
        validate_positive_dim(latent_dim, "latent_dim")?;
        validate_even(latent_dim, "latent_dim")?;
        let half_dim = latent_dim / 2;
        let transition = MonotonicMapping::couple(
            &format!("{}.transition", prefix),
            half_dim,
            half_dim,
            half_dim,
            Activation::Sigmoid,
            true,
            store,
        )?;
        Ok(InvertibleBlock { transition, half_dim })
    }

    fn check_pair(&self, l1: &Tensor, l2: &Tensor) -> Result<(), DdrError> {
        let (batch, width) = l1.dims2()?;
        let expected = [batch, self.half_dim];
        if width != self.half_dim {
            return Err(DdrError::ShapeMismatch(
                "first latent half".to_string(),
                expected.to_vec(),
                l1.dims().to_vec(),
            ));
        }
        if l2.dims() != expected {
            return Err(DdrError::ShapeMismatch(
                "second latent half".to_string(),
                expected.to_vec(),
                l2.dims().to_vec(),
            ));
        }
        Ok(())
    }

    pub fn forward(&self, l1: &Tensor, l2: &Tensor) -> Result<LatentPair, DdrError> {
        self.check_pair(l1, l2)?;
        let shifted = (l2 + self.transition.forward(l1)?)?;
        Ok((shifted, l1.clone()))
    }

    /// Closed-form inverse of [`InvertibleBlock::forward`].
    pub fn inverse(&self, l1: &Tensor, l2: &Tensor) -> Result<LatentPair, DdrError> {
        self.check_pair(l1, l2)?;
        let restored = (l1 - self.transition.forward(l2)?)?;
        Ok((l2.clone(), restored))
    }

    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    pub fn params(&self) -> Vec<Param> {
        self.transition.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn assert_close(a: &Tensor, b: &Tensor) {
        let a = a.to_vec2::<f32>().unwrap();
        let b = b.to_vec2::<f32>().unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (x, y) in ra.iter().zip(rb.iter()) {
                assert!((x - y).abs() <= 1e-5 * y.abs().max(1.0), "{} != {}", x, y);
            }
        }
    }

    #[test]
    fn test_inverse_recovers_input() {
        let mut store = ParamStore::new(42, &Device::Cpu);
        let device = Device::Cpu;
        for i in 0..5 {
            let block = InvertibleBlock::new(&format!("b{}", i), 16, &mut store).unwrap();
            let l1 = Tensor::randn(0f32, 2f32, (32, 8), &device).unwrap();
            let l2 = Tensor::randn(0f32, 2f32, (32, 8), &device).unwrap();
            let (f1, f2) = block.forward(&l1, &l2).unwrap();
            let (r1, r2) = block.inverse(&f1, &f2).unwrap();
            assert_close(&r1, &l1);
            assert_close(&r2, &l2);
        }
    }

    #[test]
    fn test_stack_inverts_in_reverse_order() {
        let mut store = ParamStore::new(1, &Device::Cpu);
        let device = Device::Cpu;
        let blocks: Vec<InvertibleBlock> = (0..4)
            .map(|i| InvertibleBlock::new(&format!("b{}", i), 8, &mut store).unwrap())
            .collect();
        let l1 = Tensor::randn(0f32, 1f32, (10, 4), &device).unwrap();
        let l2 = Tensor::randn(0f32, 1f32, (10, 4), &device).unwrap();
        let (mut a, mut b) = (l1.clone(), l2.clone());
        for block in &blocks {
            (a, b) = block.forward(&a, &b).unwrap();
        }
        for block in blocks.iter().rev() {
            (a, b) = block.inverse(&a, &b).unwrap();
        }
        assert_close(&a, &l1);
        assert_close(&b, &l2);
    }

    #[test]
    fn test_forward_swaps_and_shifts() {
        let mut store = ParamStore::new(2, &Device::Cpu);
        let device = Device::Cpu;
        let block = InvertibleBlock::new("b", 4, &mut store).unwrap();
        let l1 = Tensor::randn(0f32, 1f32, (3, 2), &device).unwrap();
        let l2 = Tensor::zeros((3, 2), candle_core::DType::F32, &device).unwrap();
        let (f1, f2) = block.forward(&l1, &l2).unwrap();
        assert_eq!(f2.to_vec2::<f32>().unwrap(), l1.to_vec2::<f32>().unwrap());
        assert_close(&f1, &block.transition.forward(&l1).unwrap());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let mut store = ParamStore::new(3, &Device::Cpu);
        let device = Device::Cpu;
        assert!(InvertibleBlock::new("b", 5, &mut store).is_err());
        let block = InvertibleBlock::new("b", 8, &mut store).unwrap();
        let l1 = Tensor::zeros((2, 4), candle_core::DType::F32, &device).unwrap();
        let l2 = Tensor::zeros((2, 3), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(block.forward(&l1, &l2), Err(DdrError::ShapeMismatch(..))));
        assert!(matches!(block.inverse(&l2, &l1), Err(DdrError::ShapeMismatch(..))));
    }
}
