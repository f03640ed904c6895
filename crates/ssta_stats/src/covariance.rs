//! The covariance engine: a cached, recursive rewrite system over the
//! random-variable algebra, in scalar and differentiable form.
//!
//! Both paths apply the same rule order on a cache miss:
//!
//! 1. identity - `Cov(X, X) = Var(X)`
//! 2. bilinearity through `Add`/`Sub` on either side
//! 3. expansion of a `Max` into `base + Max0(diff)`
//! 4. collapse of a nested rectifier (`max(0, w) = w` when `w ≥ 0`)
//! 5. same-operand `Max0` pair - the rectified variance
//! 6. general `Max0` pair - `E[D₀⁺D₁⁺] − E[D₀⁺]·E[D₁⁺]`
//! 7. single `Max0` - `Cov(X, Z)·Φ(μ_Z/σ_Z)`
//! 8. distinct Normals are independent - 0
//!
//! Sharing the rule order (in particular rule 3, instead of a direct
//! Clark weighting for `Max`) is what keeps the scalar and expression
//! results in lockstep. Cache keys are unordered pairs, so each pair is
//! looked up exactly once per query. Every scalar result is clamped to
//! the Cauchy-Schwarz bound; at the variance floor a non-negligible
//! covariance is an invariant violation rather than something to clamp
//! away.

use tracing::debug;

use ssta_core::math::bivariate::{covariance_max0_max0, RHO_LIMIT};
use ssta_core::math::distributions::mean_phi_max;
use ssta_core::NodeId;

use crate::context::{Context, Rv, RvKind, MINIMUM_VARIANCE};
use crate::error::StatError;

/// Normalizes a pair of handles into an unordered cache key.
#[inline]
fn pair_key(a: Rv, b: Rv) -> (Rv, Rv) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Context {
    // ------------------------------------------------------------------
    // Scalar path
    // ------------------------------------------------------------------

    /// `Cov(a, b)`, cached and clamped to the Cauchy-Schwarz bound.
    pub fn covariance(&mut self, a: Rv, b: Rv) -> Result<f64, StatError> {
        let key = pair_key(a, b);
        if let Some(&c) = self.cov_cache.get(&key) {
            return Ok(c);
        }
        let raw = self.covariance_uncached(a, b)?;
        let cov = self.check_covariance(raw, a, b)?;
        debug!(target: "ssta_stats::covariance", a = a.0, b = b.0, cov, "covariance cached");
        self.cov_cache.insert(key, cov);
        Ok(cov)
    }

    fn covariance_uncached(&mut self, a: Rv, b: Rv) -> Result<f64, StatError> {
        if a == b {
            return self.variance(a);
        }
        let (ka, kb) = (self.kind(a), self.kind(b));
        if let RvKind::Add(l, r) = ka {
            return Ok(self.covariance(l, b)? + self.covariance(r, b)?);
        }
        if let RvKind::Add(l, r) = kb {
            return Ok(self.covariance(a, l)? + self.covariance(a, r)?);
        }
        if let RvKind::Sub(l, r) = ka {
            return Ok(self.covariance(l, b)? - self.covariance(r, b)?);
        }
        if let RvKind::Sub(l, r) = kb {
            return Ok(self.covariance(a, l)? - self.covariance(a, r)?);
        }
        if let RvKind::Max { base, max0 } = ka {
            return Ok(self.covariance(base, b)? + self.covariance(max0, b)?);
        }
        if let RvKind::Max { base, max0 } = kb {
            return Ok(self.covariance(a, base)? + self.covariance(a, max0)?);
        }
        // a rectifier of a rectifier is the inner rectifier
        if let RvKind::Max0(inner) = ka {
            if matches!(self.kind(inner), RvKind::Max0(_)) {
                return self.covariance(inner, b);
            }
        }
        if let RvKind::Max0(inner) = kb {
            if matches!(self.kind(inner), RvKind::Max0(_)) {
                return self.covariance(a, inner);
            }
        }
        match (ka, kb) {
            (RvKind::Max0(d0), RvKind::Max0(d1)) => {
                if d0 == d1 {
                    self.variance(a)
                } else {
                    self.cov_max0_max0(d0, d1)
                }
            }
            (RvKind::Max0(z), _) => self.cov_x_max0(b, z),
            (_, RvKind::Max0(z)) => self.cov_x_max0(a, z),
            // two distinct Normal leaves are independent by default
            _ => Ok(0.0),
        }
    }

    /// `Cov(X, max(0, Z)) = Cov(X, Z)·Φ(μ_Z/σ_Z)`.
    fn cov_x_max0(&mut self, x: Rv, z: Rv) -> Result<f64, StatError> {
        let c = self.covariance(x, z)?;
        let (mu, sigma) = self.operand_mu_sigma(z)?;
        Ok(c * mean_phi_max(-mu / sigma))
    }

    /// `Cov(max(0,D₀), max(0,D₁))` via the joint rectified moment.
    fn cov_max0_max0(&mut self, d0: Rv, d1: Rv) -> Result<f64, StatError> {
        let (mu0, s0) = self.operand_mu_sigma(d0)?;
        let (mu1, s1) = self.operand_mu_sigma(d1)?;
        let cov_d = self.covariance(d0, d1)?;
        if !cov_d.is_finite() {
            return Err(StatError::NonFiniteCovariance);
        }
        Ok(covariance_max0_max0(mu0, s0, mu1, s1, cov_d, &mut self.gh)?)
    }

    /// Cauchy-Schwarz clamp with the near-floor guard.
    fn check_covariance(&mut self, cov: f64, a: Rv, b: Rv) -> Result<f64, StatError> {
        if !cov.is_finite() {
            return Err(StatError::NonFiniteCovariance);
        }
        let va = self.variance(a)?;
        let vb = self.variance(b)?;
        let bound = (va * vb).sqrt();
        if bound < MINIMUM_VARIANCE && cov.abs() >= MINIMUM_VARIANCE {
            return Err(StatError::CovarianceAtFloor { cov, bound });
        }
        Ok(cov.clamp(-bound, bound))
    }

    // ------------------------------------------------------------------
    // Expression path
    // ------------------------------------------------------------------

    /// Differentiable `Cov(a, b)`, cached. Mirrors the scalar recursion
    /// rule for rule; the ρ = ±1 function choice for a `Max0` pair is made
    /// from the scalar correlation at build time.
    pub fn cov_expr(&mut self, a: Rv, b: Rv) -> Result<NodeId, StatError> {
        let key = pair_key(a, b);
        if let Some(&e) = self.cov_expr_cache.get(&key) {
            return Ok(e);
        }
        let e = self.cov_expr_uncached(a, b)?;
        debug!(target: "ssta_stats::covariance", a = a.0, b = b.0, node = e.raw(), "covariance expression cached");
        self.cov_expr_cache.insert(key, e);
        Ok(e)
    }

    fn cov_expr_uncached(&mut self, a: Rv, b: Rv) -> Result<NodeId, StatError> {
        if a == b {
            return self.var_expr(a);
        }
        let (ka, kb) = (self.kind(a), self.kind(b));
        if let RvKind::Add(l, r) = ka {
            let (cl, cr) = (self.cov_expr(l, b)?, self.cov_expr(r, b)?);
            return Ok(self.graph.add(cl, cr));
        }
        if let RvKind::Add(l, r) = kb {
            let (cl, cr) = (self.cov_expr(a, l)?, self.cov_expr(a, r)?);
            return Ok(self.graph.add(cl, cr));
        }
        if let RvKind::Sub(l, r) = ka {
            let (cl, cr) = (self.cov_expr(l, b)?, self.cov_expr(r, b)?);
            return Ok(self.graph.sub(cl, cr));
        }
        if let RvKind::Sub(l, r) = kb {
            let (cl, cr) = (self.cov_expr(a, l)?, self.cov_expr(a, r)?);
            return Ok(self.graph.sub(cl, cr));
        }
        if let RvKind::Max { base, max0 } = ka {
            let (cb, cm) = (self.cov_expr(base, b)?, self.cov_expr(max0, b)?);
            return Ok(self.graph.add(cb, cm));
        }
        if let RvKind::Max { base, max0 } = kb {
            let (cb, cm) = (self.cov_expr(a, base)?, self.cov_expr(a, max0)?);
            return Ok(self.graph.add(cb, cm));
        }
        if let RvKind::Max0(inner) = ka {
            if matches!(self.kind(inner), RvKind::Max0(_)) {
                return self.cov_expr(inner, b);
            }
        }
        if let RvKind::Max0(inner) = kb {
            if matches!(self.kind(inner), RvKind::Max0(_)) {
                return self.cov_expr(a, inner);
            }
        }
        match (ka, kb) {
            (RvKind::Max0(d0), RvKind::Max0(d1)) => {
                if d0 == d1 {
                    self.var_expr(a)
                } else {
                    self.cov_max0_max0_expr(d0, d1)
                }
            }
            (RvKind::Max0(z), _) => self.cov_x_max0_expr(b, z),
            (_, RvKind::Max0(z)) => self.cov_x_max0_expr(a, z),
            _ => Ok(self.graph.zero()),
        }
    }

    fn cov_x_max0_expr(&mut self, x: Rv, z: Rv) -> Result<NodeId, StatError> {
        let c = self.cov_expr(x, z)?;
        let mu = self.mean_expr(z)?;
        let sigma = self.std_expr(z)?;
        let f = self.funcs.mean_phi_max;
        let ratio = self.graph.div(mu, sigma)?;
        let a = self.graph.neg(ratio);
        let weight = self.graph.call(f, &[a])?;
        Ok(self.graph.mul(c, weight))
    }

    fn cov_max0_max0_expr(&mut self, d0: Rv, d1: Rv) -> Result<NodeId, StatError> {
        let mu0 = self.mean_expr(d0)?;
        let s0 = self.std_expr(d0)?;
        let mu1 = self.mean_expr(d1)?;
        let s1 = self.std_expr(d1)?;
        let cov_d = self.cov_expr(d0, d1)?;

        // branch selection is scalar; the chosen branch is differentiable
        let cov_val = self.graph.value(cov_d)?;
        let s0_val = self.graph.value(s0)?;
        let s1_val = self.graph.value(s1)?;
        let rho_val = cov_val / (s0_val * s1_val);

        let funcs = self.funcs;
        let e0 = self.graph.call(funcs.max0_mean, &[mu0, s0])?;
        let e1 = self.graph.call(funcs.max0_mean, &[mu1, s1])?;

        let e_prod = if rho_val > RHO_LIMIT {
            self.graph
                .call(funcs.expected_prod_pos_rho1, &[mu0, s0, mu1, s1])?
        } else if rho_val < -RHO_LIMIT {
            self.graph
                .call(funcs.expected_prod_pos_rho_neg1, &[mu0, s0, mu1, s1])?
        } else {
            let den = self.graph.mul(s0, s1);
            let rho = self.graph.div(cov_d, den)?;
            self.graph
                .call(funcs.expected_prod_pos, &[mu0, s0, mu1, s1, rho])?
        };

        let marginal = self.graph.mul(e0, e1);
        Ok(self.graph.sub(e_prod, marginal))
    }

    /// Number of cached scalar covariances.
    pub fn cov_cache_len(&self) -> usize {
        self.cov_cache.len()
    }

    /// Number of cached covariance expressions.
    pub fn cov_expr_cache_len(&self) -> usize {
        self.cov_expr_cache.len()
    }

    /// Drops every cached scalar covariance and covariance expression.
    pub fn clear_cov_caches(&mut self) {
        self.cov_cache.clear();
        self.cov_expr_cache.clear();
    }
}
