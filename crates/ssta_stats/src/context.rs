//! The random-variable algebra: `Normal` leaves, `Add`/`Sub`/`Max`/`Max0`
//! combinators, and their scalar and differentiable statistics.
//!
//! Everything hangs off a [`Context`]: the expression graph, the
//! random-variable arena, the statistical function registry and the
//! covariance caches. A context is an isolated unit with no global state;
//! parallel batch work runs one context per thread.
//!
//! Statistics are computed lazily and memoized per node. The scalar side
//! caches `f64` moments; the differentiable side caches `NodeId`s into the
//! context's graph, so `backward()` on a root's `mean_expr` yields the
//! sensitivity of that statistic to every ancestor Normal's mean and
//! standard-deviation leaf.

use std::collections::HashMap;

use ssta_core::math::distributions::{mean_max, mean_max2};
use ssta_core::math::hermite::GhCache;
use ssta_core::{Graph, NodeId};

use crate::error::StatError;
use crate::funcs::StatFns;

/// Floor applied to every computed variance, guarding downstream division
/// and standardization.
pub const MINIMUM_VARIANCE: f64 = 1e-6;

/// Means below this magnitude make the coefficient of variation infinite.
pub const CV_ZERO_THRESHOLD: f64 = 1e-10;

/// Handle to a random variable in a [`Context`].
///
/// Handles are assigned in creation order and are only meaningful for the
/// context that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rv(pub(crate) u32);

impl Rv {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Closed set of random-variable constructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RvKind {
    Normal { mean: f64, variance: f64 },
    Add(Rv, Rv),
    Sub(Rv, Rv),
    /// Clark decomposition: `Max(A,B) = base + Max0(other - base)`.
    Max { base: Rv, max0: Rv },
    Max0(Rv),
}

#[derive(Debug, Clone)]
struct RvNode {
    kind: RvKind,
    mean: Option<f64>,
    variance: Option<f64>,
    mean_expr: Option<NodeId>,
    var_expr: Option<NodeId>,
    std_expr: Option<NodeId>,
}

impl RvNode {
    fn new(kind: RvKind) -> Self {
        RvNode {
            kind,
            mean: None,
            variance: None,
            mean_expr: None,
            var_expr: None,
            std_expr: None,
        }
    }
}

/// Owns an expression [`Graph`], the random-variable arena, the
/// statistical function registry and both covariance caches.
#[derive(Debug)]
pub struct Context {
    pub(crate) graph: Graph,
    pub(crate) funcs: StatFns,
    nodes: Vec<RvNode>,
    pub(crate) cov_cache: HashMap<(Rv, Rv), f64>,
    pub(crate) cov_expr_cache: HashMap<(Rv, Rv), NodeId>,
    pub(crate) gh: GhCache,
}

impl Context {
    /// Creates a context with a fresh graph and the statistical functions
    /// defined on it.
    pub fn new() -> Result<Self, StatError> {
        let mut graph = Graph::new();
        let funcs = StatFns::define(&mut graph)?;
        Ok(Context {
            graph,
            funcs,
            nodes: Vec::new(),
            cov_cache: HashMap::new(),
            cov_expr_cache: HashMap::new(),
            gh: GhCache::new(),
        })
    }

    /// The underlying expression graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access to the graph, e.g. to reassign a Normal's mean leaf
    /// for a what-if run or to toggle backward tracing.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    fn push(&mut self, kind: RvKind) -> Rv {
        let id = Rv(self.nodes.len() as u32);
        self.nodes.push(RvNode::new(kind));
        id
    }

    pub(crate) fn kind(&self, rv: Rv) -> RvKind {
        self.nodes[rv.index()].kind
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// A Normal leaf. Rejects NaN or infinite parameters and negative
    /// variance.
    pub fn normal(&mut self, mean: f64, variance: f64) -> Result<Rv, StatError> {
        if !mean.is_finite() || !variance.is_finite() {
            return Err(StatError::NonFiniteParameter { mean, variance });
        }
        if variance < 0.0 {
            return Err(StatError::NegativeVariance { variance });
        }
        Ok(self.push(RvKind::Normal { mean, variance }))
    }

    /// `a + b`.
    pub fn add(&mut self, a: Rv, b: Rv) -> Rv {
        self.push(RvKind::Add(a, b))
    }

    /// `a - b`.
    pub fn sub(&mut self, a: Rv, b: Rv) -> Rv {
        self.push(RvKind::Sub(a, b))
    }

    /// `max(0, d)` - the rectifier.
    pub fn max0(&mut self, d: Rv) -> Rv {
        self.push(RvKind::Max0(d))
    }

    /// `max(a, b)` by Clark's decomposition `base + Max0(other - base)`.
    ///
    /// The base is the operand with the strictly larger mean; an exact tie
    /// goes to the older handle. Both rules are independent of argument
    /// order, so `max(a, b)` and `max(b, a)` build identical nodes.
    pub fn max(&mut self, a: Rv, b: Rv) -> Result<Rv, StatError> {
        let ma = self.mean(a)?;
        let mb = self.mean(b)?;
        let (base, other) = if ma > mb {
            (a, b)
        } else if mb > ma {
            (b, a)
        } else if a <= b {
            (a, b)
        } else {
            (b, a)
        };
        let diff = self.sub(other, base);
        let max0 = self.max0(diff);
        Ok(self.push(RvKind::Max { base, max0 }))
    }

    // ------------------------------------------------------------------
    // Scalar statistics
    // ------------------------------------------------------------------

    /// Mean, memoized.
    pub fn mean(&mut self, rv: Rv) -> Result<f64, StatError> {
        if let Some(m) = self.nodes[rv.index()].mean {
            return Ok(m);
        }
        let m = match self.kind(rv) {
            RvKind::Normal { mean, .. } => mean,
            RvKind::Add(l, r) => self.mean(l)? + self.mean(r)?,
            RvKind::Sub(l, r) => self.mean(l)? - self.mean(r)?,
            RvKind::Max { base, max0 } => self.mean(base)? + self.mean(max0)?,
            RvKind::Max0(d) => {
                let (mu, sigma) = self.operand_mu_sigma(d)?;
                mu + sigma * mean_max(-mu / sigma)
            }
        };
        self.nodes[rv.index()].mean = Some(m);
        Ok(m)
    }

    /// Variance, memoized. Composite variances are floored at
    /// [`MINIMUM_VARIANCE`]; a variance that stays negative past the floor
    /// is an invariant violation, as is NaN.
    pub fn variance(&mut self, rv: Rv) -> Result<f64, StatError> {
        if let Some(v) = self.nodes[rv.index()].variance {
            return Ok(v);
        }
        let v = match self.kind(rv) {
            RvKind::Normal { variance, .. } => variance,
            RvKind::Add(l, r) => {
                let (vl, vr) = (self.variance(l)?, self.variance(r)?);
                let c = self.covariance(l, r)?;
                check_variance(vl + 2.0 * c + vr)?
            }
            RvKind::Sub(l, r) => {
                let (vl, vr) = (self.variance(l)?, self.variance(r)?);
                let c = self.covariance(l, r)?;
                check_variance(vl - 2.0 * c + vr)?
            }
            RvKind::Max { base, max0 } => {
                let (vb, vm) = (self.variance(base)?, self.variance(max0)?);
                let c = self.covariance(base, max0)?;
                check_variance(vb + 2.0 * c + vm)?
            }
            RvKind::Max0(d) => {
                let (mu, sigma) = self.operand_mu_sigma(d)?;
                let a = -mu / sigma;
                let mm = mean_max(a);
                check_variance(sigma * sigma * (mean_max2(a) - mm * mm))?
            }
        };
        self.nodes[rv.index()].variance = Some(v);
        Ok(v)
    }

    /// `√variance`.
    pub fn standard_deviation(&mut self, rv: Rv) -> Result<f64, StatError> {
        Ok(self.variance(rv)?.sqrt())
    }

    /// `σ / |μ|`, infinite below the zero-mean threshold.
    pub fn coefficient_of_variation(&mut self, rv: Rv) -> Result<f64, StatError> {
        let m = self.mean(rv)?;
        if m.abs() < CV_ZERO_THRESHOLD {
            return Ok(f64::INFINITY);
        }
        let sd = self.standard_deviation(rv)?;
        Ok(sd / m.abs())
    }

    /// Mean and standard deviation of a rectifier or standardization
    /// operand; the variance must be strictly positive.
    pub(crate) fn operand_mu_sigma(&mut self, d: Rv) -> Result<(f64, f64), StatError> {
        let mu = self.mean(d)?;
        let v = self.variance(d)?;
        if v <= 0.0 {
            return Err(StatError::NonPositiveVariance { variance: v });
        }
        Ok((mu, v.sqrt()))
    }

    // ------------------------------------------------------------------
    // Differentiable statistics
    // ------------------------------------------------------------------

    /// Lazily creates the μ and σ variable leaves of a Normal; both are
    /// created together so a caller holding `mean_expr` can rely on
    /// `std_expr` pointing at a sibling leaf. Returns `(μ, σ)`.
    fn normal_leaves(&mut self, rv: Rv, mean: f64, variance: f64) -> (NodeId, NodeId) {
        let node = &self.nodes[rv.index()];
        if let (Some(mu), Some(sigma)) = (node.mean_expr, node.std_expr) {
            return (mu, sigma);
        }
        let mu = self.graph.variable_with(mean);
        let sigma = self.graph.variable_with(variance.sqrt());
        self.nodes[rv.index()].mean_expr = Some(mu);
        self.nodes[rv.index()].std_expr = Some(sigma);
        (mu, sigma)
    }

    /// Differentiable mean, memoized. For a Normal this is its mutable μ
    /// variable leaf.
    pub fn mean_expr(&mut self, rv: Rv) -> Result<NodeId, StatError> {
        if let Some(e) = self.nodes[rv.index()].mean_expr {
            return Ok(e);
        }
        let e = match self.kind(rv) {
            RvKind::Normal { mean, variance } => {
                return Ok(self.normal_leaves(rv, mean, variance).0);
            }
            RvKind::Add(l, r) => {
                let (le, re) = (self.mean_expr(l)?, self.mean_expr(r)?);
                self.graph.add(le, re)
            }
            RvKind::Sub(l, r) => {
                let (le, re) = (self.mean_expr(l)?, self.mean_expr(r)?);
                self.graph.sub(le, re)
            }
            RvKind::Max { base, max0 } => {
                let (be, me) = (self.mean_expr(base)?, self.mean_expr(max0)?);
                self.graph.add(be, me)
            }
            RvKind::Max0(d) => {
                let mu = self.mean_expr(d)?;
                let sigma = self.std_expr(d)?;
                let f = self.funcs.max0_mean;
                self.graph.call(f, &[mu, sigma])?
            }
        };
        self.nodes[rv.index()].mean_expr = Some(e);
        Ok(e)
    }

    /// Differentiable variance, memoized. Mirrors the scalar formulas
    /// without the floor, so its gradient is the raw sensitivity.
    pub fn var_expr(&mut self, rv: Rv) -> Result<NodeId, StatError> {
        if let Some(e) = self.nodes[rv.index()].var_expr {
            return Ok(e);
        }
        let e = match self.kind(rv) {
            RvKind::Normal { mean, variance } => {
                let (_, sigma) = self.normal_leaves(rv, mean, variance);
                self.graph.mul(sigma, sigma)
            }
            RvKind::Add(l, r) => {
                let (vl, vr) = (self.var_expr(l)?, self.var_expr(r)?);
                let c = self.cov_expr(l, r)?;
                let two = self.graph.constant(2.0);
                let t = self.graph.mul(two, c);
                let s = self.graph.add(vl, t);
                self.graph.add(s, vr)
            }
            RvKind::Sub(l, r) => {
                let (vl, vr) = (self.var_expr(l)?, self.var_expr(r)?);
                let c = self.cov_expr(l, r)?;
                let two = self.graph.constant(2.0);
                let t = self.graph.mul(two, c);
                let s = self.graph.sub(vl, t);
                self.graph.add(s, vr)
            }
            RvKind::Max { base, max0 } => {
                let (vb, vm) = (self.var_expr(base)?, self.var_expr(max0)?);
                let c = self.cov_expr(base, max0)?;
                let two = self.graph.constant(2.0);
                let t = self.graph.mul(two, c);
                let s = self.graph.add(vb, t);
                self.graph.add(s, vm)
            }
            RvKind::Max0(d) => {
                let mu = self.mean_expr(d)?;
                let sigma = self.std_expr(d)?;
                let f = self.funcs.max0_var;
                self.graph.call(f, &[mu, sigma])?
            }
        };
        self.nodes[rv.index()].var_expr = Some(e);
        Ok(e)
    }

    /// Differentiable standard deviation: a Normal's σ leaf, otherwise
    /// `sqrt(var_expr)`.
    pub fn std_expr(&mut self, rv: Rv) -> Result<NodeId, StatError> {
        if let Some(e) = self.nodes[rv.index()].std_expr {
            return Ok(e);
        }
        let e = match self.kind(rv) {
            RvKind::Normal { mean, variance } => {
                return Ok(self.normal_leaves(rv, mean, variance).1);
            }
            _ => {
                let v = self.var_expr(rv)?;
                self.graph.sqrt(v)
            }
        };
        self.nodes[rv.index()].std_expr = Some(e);
        Ok(e)
    }

    // ------------------------------------------------------------------
    // Backward pass passthroughs
    // ------------------------------------------------------------------

    /// Backward pass from `root` with seed 1.
    pub fn backward(&mut self, root: NodeId) -> Result<(), StatError> {
        Ok(self.graph.backward(root)?)
    }

    /// Clears every accumulated gradient in the graph.
    pub fn zero_all_grad(&mut self) {
        self.graph.zero_all_grad();
    }

    /// Accumulated gradient of a graph node, 0 if unreached.
    pub fn gradient(&self, id: NodeId) -> f64 {
        self.graph.gradient(id)
    }
}

/// Floors small variances and rejects NaN or negative survivors.
fn check_variance(v: f64) -> Result<f64, StatError> {
    if v.is_nan() {
        return Err(StatError::NanVariance);
    }
    let v = if v.abs() < MINIMUM_VARIANCE {
        MINIMUM_VARIANCE
    } else {
        v
    };
    if v < 0.0 {
        return Err(StatError::VarianceInvariant { variance: v });
    }
    Ok(v)
}
