//! Numeric primitives: normal-distribution helpers, Gauss-Hermite rules
//! and the bivariate-normal kernel used by the covariance engine.

pub mod bivariate;
pub mod distributions;
pub mod hermite;

use thiserror::Error;

/// Errors from quadrature-rule construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuadratureError {
    /// A rule needs at least one point.
    #[error("Gauss-Hermite rule needs at least one point")]
    EmptyRule,

    /// Newton iteration for a rule node failed to converge.
    #[error("Gauss-Hermite root {index} failed to converge after {iterations} iterations")]
    NonConvergence {
        /// Index of the root that failed.
        index: usize,
        /// Iteration budget that was exhausted.
        iterations: usize,
    },
}
