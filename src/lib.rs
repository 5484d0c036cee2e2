//! Deep distribution regression core.
//!
//! One parameterization answers both "what is the value at probability `q`"
//! (the conditional quantile function) and "what is the probability of value
//! `y`" (the conditional cdf), by traversing a shared stack of exactly
//! invertible, monotonic coupling blocks in opposite directions.

// Modules
pub mod config;
pub mod constants;
pub mod constraints;
pub mod coupling;
pub mod distribution;
pub mod errors;
pub mod monotonic;
pub mod output;
pub mod param;
pub mod projector;
pub mod utils;

// Individual classes, and functions
pub use config::{Capability, ConfigIO, DistributionConfig};
pub use distribution::{DistributionCore, ForwardRequest};
pub use errors::DdrError;
pub use output::DistributionOutput;
