//! Statistical timing algebra over a differentiable expression graph.
//!
//! A [`Context`] owns Normal leaves and the `Add`/`Sub`/`Max`/`Max0`
//! combinators built on them, computes their moments by Clark's method,
//! and resolves the covariance between any two variables through a cached
//! rewrite engine. Every statistic exists twice: as a scalar `f64` and as
//! a node in the context's [`ssta_core::Graph`], so a single backward pass
//! yields the sensitivity of a mean or variance to every underlying
//! Normal parameter.
//!
//! ```
//! use ssta_stats::Context;
//!
//! let mut ctx = Context::new()?;
//! let a = ctx.normal(10.0, 4.0)?;
//! let b = ctx.normal(8.0, 1.0)?;
//! let m = ctx.max(a, b)?;
//! assert!(ctx.mean(m)? > 10.0);
//!
//! let e = ctx.mean_expr(m)?;
//! ctx.backward(e)?;
//! let mu_a = ctx.mean_expr(a)?;
//! assert!(ctx.gradient(mu_a) > 0.0);
//! # Ok::<(), ssta_stats::StatError>(())
//! ```

#![deny(missing_docs)]

mod context;
mod covariance;
mod error;
mod funcs;

pub use context::{Context, Rv, CV_ZERO_THRESHOLD, MINIMUM_VARIANCE};
pub use error::StatError;
pub use funcs::StatFns;
