//! Configuration
//!
//! Construction-time settings of the distribution core, the capability
//! variant resolving which sub-graphs get built, and JSON IO.
use crate::constants::{DEFAULT_LATENT_DIM, DEFAULT_NUM_BLOCKS, DEFAULT_NUM_LAYERS};
use crate::errors::DdrError;
use crate::utils::{validate_even, validate_positive_dim, TargetScaler};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which directions of the distribution the core can answer.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Capability {
    /// Quantile function only: `q -> y`.
    Quantile,
    /// Cumulative distribution function only: `y -> q`.
    Cdf,
    /// Both directions through the shared coupling stack.
    #[default]
    Both,
}

impl Capability {
    /// Resolve the two request flags, at least one of which must be set.
    pub fn from_flags(fetch_q: bool, fetch_cdf: bool) -> Result<Self, DdrError> {
        match (fetch_q, fetch_cdf) {
            (true, true) => Ok(Capability::Both),
            (true, false) => Ok(Capability::Quantile),
            (false, true) => Ok(Capability::Cdf),
            (false, false) => Err(DdrError::NothingToFetch),
        }
    }

    pub fn fetch_q(&self) -> bool {
        matches!(self, Capability::Quantile | Capability::Both)
    }

    pub fn fetch_cdf(&self) -> bool {
        matches!(self, Capability::Cdf | Capability::Both)
    }
}

fn default_latent_dim() -> usize {
    DEFAULT_LATENT_DIM
}
fn default_num_blocks() -> usize {
    DEFAULT_NUM_BLOCKS
}
fn default_num_layers() -> usize {
    DEFAULT_NUM_LAYERS
}

/// Configuration for the `DistributionCore`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Width of the feature encoding.
    pub in_dim: usize,
    /// Width of the latent pair, both halves together. Must be even.
    #[serde(default = "default_latent_dim")]
    pub latent_dim: usize,
    /// Number of coupling blocks. Must be even.
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    /// Hidden layers of every projector mapping.
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Directions to build.
    #[serde(default)]
    pub capability: Capability,
    /// Seed for parameter initialization.
    #[serde(default)]
    pub seed: u64,
    /// Known `(lower, upper)` range of the target, if any.
    #[serde(default)]
    pub target_bounds: Option<(f64, f64)>,
}

impl DistributionConfig {
    pub fn new(in_dim: usize) -> Self {
        DistributionConfig {
            in_dim,
            latent_dim: DEFAULT_LATENT_DIM,
            num_blocks: DEFAULT_NUM_BLOCKS,
            num_layers: DEFAULT_NUM_LAYERS,
            capability: Capability::Both,
            seed: 0,
            target_bounds: None,
        }
    }

    /// Set the latent width.
    /// * `latent_dim` - Width of the latent pair, must be even.
    pub fn set_latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the number of coupling blocks.
    /// * `num_blocks` - Must be even.
    pub fn set_num_blocks(mut self, num_blocks: usize) -> Self {
        self.num_blocks = num_blocks;
        self
    }

    /// Set the number of hidden layers of the projector mappings.
    pub fn set_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Set the capability.
    pub fn set_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Set the seed used to initialize parameters.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the known target range.
    /// * `target_bounds` - `(lower, upper)`, or `None` to use raw targets.
    pub fn set_target_bounds(mut self, target_bounds: Option<(f64, f64)>) -> Self {
        self.target_bounds = target_bounds;
        self
    }

    pub fn validate(&self) -> Result<(), DdrError> {
        validate_positive_dim(self.in_dim, "in_dim")?;
        validate_positive_dim(self.latent_dim, "latent_dim")?;
        validate_even(self.latent_dim, "latent_dim")?;
        validate_even(self.num_blocks, "num_blocks")?;
        validate_positive_dim(self.num_layers, "num_layers")?;
        self.target_scaler()?;
        Ok(())
    }

    pub fn target_scaler(&self) -> Result<Option<TargetScaler>, DdrError> {
        self.target_bounds
            .map(|(lower, upper)| TargetScaler::new(lower, upper))
            .transpose()
    }
}

/// IO
pub trait ConfigIO: Serialize + DeserializeOwned + Sized {
    /// Save a configuration as a json object to a file.
    ///
    /// * `path` - Path to save the configuration.
    fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<(), DdrError> {
        fs::write(path, self.json_dump()?).map_err(|e| DdrError::UnableToWrite(e.to_string()))
    }

    /// Dump a configuration as a json object.
    fn json_dump(&self) -> Result<String, DdrError> {
        serde_json::to_string(self).map_err(|e| DdrError::UnableToWrite(e.to_string()))
    }

    /// Load a configuration from a json string.
    fn from_json(json_str: &str) -> Result<Self, DdrError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| DdrError::UnableToRead(e.to_string()))
    }

    /// Load a configuration from a path to a json object.
    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self, DdrError> {
        let json_str = fs::read_to_string(path).map_err(|e| DdrError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl ConfigIO for DistributionConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_from_flags() {
        assert_eq!(Capability::from_flags(true, true).unwrap(), Capability::Both);
        assert_eq!(Capability::from_flags(true, false).unwrap(), Capability::Quantile);
        assert_eq!(Capability::from_flags(false, true).unwrap(), Capability::Cdf);
        assert!(matches!(Capability::from_flags(false, false), Err(DdrError::NothingToFetch)));
        assert!(Capability::Quantile.fetch_q() && !Capability::Quantile.fetch_cdf());
        assert!(!Capability::Cdf.fetch_q() && Capability::Cdf.fetch_cdf());
    }

    #[test]
    fn test_defaults() {
        let cfg = DistributionConfig::new(8);
        assert_eq!(cfg.latent_dim, 512);
        assert_eq!(cfg.num_blocks, 2);
        assert_eq!(cfg.num_layers, 1);
        assert_eq!(cfg.capability, Capability::Both);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(DistributionConfig::new(0).validate().is_err());
        assert!(DistributionConfig::new(8).set_num_blocks(3).validate().is_err());
        assert!(DistributionConfig::new(8).set_latent_dim(15).validate().is_err());
        assert!(DistributionConfig::new(8).set_latent_dim(0).validate().is_err());
        assert!(DistributionConfig::new(8).set_num_layers(0).validate().is_err());
        assert!(DistributionConfig::new(8)
            .set_target_bounds(Some((2.0, 1.0)))
            .validate()
            .is_err());
        assert!(DistributionConfig::new(8).set_num_blocks(0).validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = DistributionConfig::new(8)
            .set_latent_dim(16)
            .set_capability(Capability::Cdf)
            .set_target_bounds(Some((0.0, 10.0)));
        let json = cfg.json_dump().unwrap();
        assert_eq!(DistributionConfig::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn test_json_defaults() {
        let cfg = DistributionConfig::from_json(r#"{"in_dim": 4}"#).unwrap();
        assert_eq!(cfg, DistributionConfig::new(4));
        assert!(matches!(
            DistributionConfig::from_json("{}"),
            Err(DdrError::UnableToRead(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join("ddr_config_test.json");
        let cfg = DistributionConfig::new(3).set_seed(9);
        cfg.save_config(&path).unwrap();
        assert_eq!(DistributionConfig::load_config(&path).unwrap(), cfg);
        std::fs::remove_file(path).unwrap();
    }
}
