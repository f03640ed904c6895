//! Error types for the random-variable algebra and covariance engine.

use ssta_core::{ExprError, QuadratureError};
use thiserror::Error;

/// Errors raised by random-variable construction, moment evaluation and
/// the covariance engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatError {
    /// A `Normal` was given a NaN or infinite parameter.
    #[error("normal parameters must be finite, got mean {mean}, variance {variance}")]
    NonFiniteParameter {
        /// The supplied mean.
        mean: f64,
        /// The supplied variance.
        variance: f64,
    },

    /// A `Normal` was given a negative variance.
    #[error("normal variance must be non-negative, got {variance}")]
    NegativeVariance {
        /// The supplied variance.
        variance: f64,
    },

    /// A computed variance stayed negative past the minimum-variance floor.
    #[error("variance {variance} is negative past the minimum-variance floor")]
    VarianceInvariant {
        /// The offending variance.
        variance: f64,
    },

    /// A computed variance came out NaN.
    #[error("variance calculation resulted in NaN")]
    NanVariance,

    /// A rectifier or standardization needed a positive operand variance.
    #[error("operand variance must be positive to extract a standard deviation, got {variance}")]
    NonPositiveVariance {
        /// The offending variance.
        variance: f64,
    },

    /// A covariance computation produced NaN or infinity.
    #[error("covariance calculation produced a non-finite value")]
    NonFiniteCovariance,

    /// A covariance at the variance floor exceeded the negligible bound.
    #[error("covariance {cov} exceeds bound {bound} at the minimum-variance floor")]
    CovarianceAtFloor {
        /// The computed covariance.
        cov: f64,
        /// The Cauchy-Schwarz bound it had to stay under.
        bound: f64,
    },

    /// Error from the underlying expression graph.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// Error building a quadrature rule.
    #[error(transparent)]
    Quadrature(#[from] QuadratureError),
}
