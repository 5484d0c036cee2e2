//! Errors
//!
//! Custom error types used throughout the `ddr` crate.
use thiserror::Error;

/// Errors that can occur while building or evaluating a distribution core.
#[derive(Debug, Error)]
pub enum DdrError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Neither the quantile function nor the cdf was requested.
    #[error("Something must be fetched, either the quantile function or the cdf.")]
    NothingToFetch,
    /// A tensor handed to the core does not have the expected shape.
    #[error("Shape mismatch for {0}: expected {1:?}, found {2:?}.")]
    ShapeMismatch(String, Vec<usize>, Vec<usize>),
    /// A median-only request also carried a quantile level or a target value.
    #[error("A median-only request cannot carry {0}.")]
    MedianWithInput(String),
    /// A projector direction was used although the capability never built it.
    #[error("The {0} direction of the {1} projector is not available.")]
    MissingDirection(&'static str, &'static str),
    /// The parameter store rejected a registration or could not be read.
    #[error("Parameter store error: {0}")]
    Registry(String),
    /// Unable to write configuration.
    #[error("Unable to write configuration: {0}")]
    UnableToWrite(String),
    /// Unable to read configuration.
    #[error("Unable to read configuration: {0}")]
    UnableToRead(String),
    /// Error raised by the tensor backend.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}
