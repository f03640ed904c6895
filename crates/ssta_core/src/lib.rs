//! Expression-graph foundation for statistical timing analysis.
//!
//! This crate provides the differentiable-scalar substrate everything else
//! is built on:
//!
//! - [`graph`] - an arena-owned expression DAG with memoized forward
//!   evaluation, reverse-mode automatic differentiation, reusable custom
//!   functions, and a bivariate-normal-CDF primitive with closed-form
//!   partials.
//! - [`math`] - scalar numeric primitives: normal PDF/CDF, the
//!   thresholded-maximum moment family, Gauss-Hermite rules, and the joint
//!   rectified moment `E[D₀⁺D₁⁺]` with its ρ = ±1 closed forms.
//!
//! The crate has no global state. A [`Graph`] is a self-contained unit;
//! parallel work runs one graph per thread.

#![deny(missing_docs)]

pub mod graph;
pub mod math;

pub use graph::{ExprError, FuncId, Graph, NodeDump, NodeId};
pub use math::QuadratureError;
