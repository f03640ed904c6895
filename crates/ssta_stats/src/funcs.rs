//! The statistical custom-function library.
//!
//! Every function is defined exactly once per context, as a reusable body
//! graph over placeholder variables. The moment formulas are standardized
//! on the threshold `a = −μ/σ`, matching the `MeanMax` family: `MeanMax`
//! and `MeanMax2` are the first two moments of `max(Z, a)` for standard
//! normal `Z`.
//!
//! The ρ = ±1 variants replace the reference runtime branches with smooth
//! surrogates (a `√(x² + ε)` absolute value inside a min, and a smooth
//! step factor) so that each body stays a single differentiable graph.

use ssta_core::{ExprError, FuncId, Graph, NodeId};

const INV_SQRT_2PI: f64 = 0.3989422804014327;
const SMOOTH_EPS: f64 = 1e-10;

/// Handles to the per-context statistical functions.
#[derive(Debug, Clone, Copy)]
pub struct StatFns {
    /// `φ(x)` - standard normal density.
    pub phi: FuncId,
    /// `Φ(x)` - standard normal CDF via `erf`.
    pub cap_phi: FuncId,
    /// `MeanMax(a) = φ(a) + a·Φ(a)`.
    pub mean_max: FuncId,
    /// `MeanMax2(a) = 1 + (a² − 1)·Φ(a) + a·φ(a)`.
    pub mean_max2: FuncId,
    /// `MeanPhiMax(a) = 1 − Φ(a)`.
    pub mean_phi_max: FuncId,
    /// `E[max(0, D)] = μ + σ·MeanMax(−μ/σ)`.
    pub max0_mean: FuncId,
    /// `Var[max(0, D)] = σ²·(MeanMax2(a) − MeanMax(a)²)`, `a = −μ/σ`.
    pub max0_var: FuncId,
    /// `E[D₀⁺D₁⁺]` closed form over the Φ₂ primitive.
    pub expected_prod_pos: FuncId,
    /// `E[D₀⁺D₁⁺]` at ρ = 1, with a smooth min.
    pub expected_prod_pos_rho1: FuncId,
    /// `E[D₀⁺D₁⁺]` at ρ = −1, with a smooth empty-overlap step.
    pub expected_prod_pos_rho_neg1: FuncId,
}

impl StatFns {
    /// Defines every statistical function on `graph`.
    pub fn define(graph: &mut Graph) -> Result<Self, ExprError> {
        let phi = graph.define_fn(1, "phi", |g, p| {
            let x = p[0];
            let two = g.constant(2.0);
            let xx = g.mul(x, x);
            let q = g.div(xx, two)?;
            let nq = g.neg(q);
            let e = g.exp(nq);
            let c = g.constant(INV_SQRT_2PI);
            Ok(g.mul(c, e))
        })?;

        let cap_phi = graph.define_fn(1, "Phi", |g, p| {
            let inv_sqrt2 = g.constant(std::f64::consts::FRAC_1_SQRT_2);
            let sx = g.mul(p[0], inv_sqrt2);
            let er = g.erf(sx);
            let one = g.one();
            let s = g.add(one, er);
            let half = g.constant(0.5);
            Ok(g.mul(half, s))
        })?;

        let mean_max = graph.define_fn(1, "MeanMax", move |g, p| {
            let ph = g.call(phi, &[p[0]])?;
            let cp = g.call(cap_phi, &[p[0]])?;
            let t = g.mul(p[0], cp);
            Ok(g.add(ph, t))
        })?;

        let mean_max2 = graph.define_fn(1, "MeanMax2", move |g, p| {
            let a = p[0];
            let one = g.one();
            let aa = g.mul(a, a);
            let am1 = g.sub(aa, one);
            let cp = g.call(cap_phi, &[a])?;
            let t1 = g.mul(am1, cp);
            let ph = g.call(phi, &[a])?;
            let t2 = g.mul(a, ph);
            let s = g.add(one, t1);
            Ok(g.add(s, t2))
        })?;

        let mean_phi_max = graph.define_fn(1, "MeanPhiMax", move |g, p| {
            let one = g.one();
            let cp = g.call(cap_phi, &[p[0]])?;
            Ok(g.sub(one, cp))
        })?;

        let max0_mean = graph.define_fn(2, "max0_mean", move |g, p| {
            let (mu, sigma) = (p[0], p[1]);
            let r = g.div(mu, sigma)?;
            let a = g.neg(r);
            let mm = g.call(mean_max, &[a])?;
            let t = g.mul(sigma, mm);
            Ok(g.add(mu, t))
        })?;

        let max0_var = graph.define_fn(2, "max0_var", move |g, p| {
            let (mu, sigma) = (p[0], p[1]);
            let r = g.div(mu, sigma)?;
            let a = g.neg(r);
            let mm = g.call(mean_max, &[a])?;
            let mm2 = g.call(mean_max2, &[a])?;
            let mmsq = g.mul(mm, mm);
            let d = g.sub(mm2, mmsq);
            let ss = g.mul(sigma, sigma);
            Ok(g.mul(ss, d))
        })?;

        let expected_prod_pos = graph.define_fn(5, "expected_prod_pos", move |g, p| {
            Self::build_expected_prod_pos(g, p, phi, cap_phi)
        })?;

        let expected_prod_pos_rho1 = graph.define_fn(4, "expected_prod_pos_rho1", move |g, p| {
            Self::build_rho1(g, p, phi, cap_phi)
        })?;

        let expected_prod_pos_rho_neg1 =
            graph.define_fn(4, "expected_prod_pos_rho_neg1", move |g, p| {
                Self::build_rho_neg1(g, p, phi, cap_phi)
            })?;

        Ok(StatFns {
            phi,
            cap_phi,
            mean_max,
            mean_max2,
            mean_phi_max,
            max0_mean,
            max0_var,
            expected_prod_pos,
            expected_prod_pos_rho1,
            expected_prod_pos_rho_neg1,
        })
    }

    /// `E[D₀⁺ D₁⁺]` for bivariate normal operands:
    ///
    /// ```text
    /// μ₀μ₁·Φ₂(a₀,a₁;ρ) + μ₀σ₁·φ(a₁)·Φ((a₀−ρa₁)/√(1−ρ²))
    ///                  + μ₁σ₀·φ(a₀)·Φ((a₁−ρa₀)/√(1−ρ²))
    ///                  + σ₀σ₁·[ρ·Φ₂ + (1−ρ²)·φ₂(a₀,a₁;ρ)]
    /// ```
    fn build_expected_prod_pos(
        g: &mut Graph,
        p: &[NodeId],
        phi: FuncId,
        cap_phi: FuncId,
    ) -> Result<NodeId, ExprError> {
        let (mu0, sigma0, mu1, sigma1, rho) = (p[0], p[1], p[2], p[3], p[4]);
        let one = g.one();
        let two = g.constant(2.0);

        let a0 = g.div(mu0, sigma0)?;
        let a1 = g.div(mu1, sigma1)?;
        let rr = g.mul(rho, rho);
        let omr = g.sub(one, rr);
        let sq = g.sqrt(omr);

        let phi2_cdf = g.phi2(a0, a1, rho);
        let phi_a0 = g.call(phi, &[a0])?;
        let phi_a1 = g.call(phi, &[a1])?;

        // conditional thresholds (a0 - ρa1)/√(1-ρ²) and mirror
        let ra1 = g.mul(rho, a1);
        let d0 = g.sub(a0, ra1);
        let c0 = g.div(d0, sq)?;
        let cond0 = g.call(cap_phi, &[c0])?;
        let ra0 = g.mul(rho, a0);
        let d1 = g.sub(a1, ra0);
        let c1 = g.div(d1, sq)?;
        let cond1 = g.call(cap_phi, &[c1])?;

        // joint density φ₂(a0, a1; ρ)
        let two_pi = g.constant(2.0 * std::f64::consts::PI);
        let den = g.mul(two_pi, sq);
        let coeff = g.div(one, den)?;
        let a00 = g.mul(a0, a0);
        let a11 = g.mul(a1, a1);
        let cross = g.mul(two, rho);
        let cross = g.mul(cross, a0);
        let cross = g.mul(cross, a1);
        let quad = g.sub(a00, cross);
        let quad = g.add(quad, a11);
        let q = g.div(quad, omr)?;
        let qh = g.div(q, two)?;
        let nqh = g.neg(qh);
        let e = g.exp(nqh);
        let dens = g.mul(coeff, e);

        let mm = g.mul(mu0, mu1);
        let term1 = g.mul(mm, phi2_cdf);

        let ms = g.mul(mu0, sigma1);
        let t2 = g.mul(ms, phi_a1);
        let term2 = g.mul(t2, cond0);

        let ms = g.mul(mu1, sigma0);
        let t3 = g.mul(ms, phi_a0);
        let term3 = g.mul(t3, cond1);

        let rphi2 = g.mul(rho, phi2_cdf);
        let odens = g.mul(omr, dens);
        let inner = g.add(rphi2, odens);
        let ss = g.mul(sigma0, sigma1);
        let term4 = g.mul(ss, inner);

        let s = g.add(term1, term2);
        let s = g.add(s, term3);
        Ok(g.add(s, term4))
    }

    /// `E[D₀⁺ D₁⁺]` at ρ = 1. Both operands ride the same standard normal,
    /// so both are positive on `Z > c` with `c = −min(a₀, a₁)`; the min is
    /// smoothed with `|x| ≈ √(x² + ε)` to keep the body differentiable.
    fn build_rho1(
        g: &mut Graph,
        p: &[NodeId],
        phi: FuncId,
        cap_phi: FuncId,
    ) -> Result<NodeId, ExprError> {
        let (mu0, sigma0, mu1, sigma1) = (p[0], p[1], p[2], p[3]);
        let one = g.one();
        let two = g.constant(2.0);
        let eps = g.constant(SMOOTH_EPS);

        let a0 = g.div(mu0, sigma0)?;
        let a1 = g.div(mu1, sigma1)?;

        let diff = g.sub(a0, a1);
        let dd = g.mul(diff, diff);
        let dde = g.add(dd, eps);
        let abs_diff = g.sqrt(dde);
        let sum = g.add(a0, a1);
        let numer = g.sub(sum, abs_diff);
        let min01 = g.div(numer, two)?;
        let c = g.neg(min01);

        let neg_c = g.neg(c);
        let phi_neg_c = g.call(cap_phi, &[neg_c])?;
        let pdf_c = g.call(phi, &[c])?;

        let prod = g.mul(a0, a1);
        let p1 = g.add(prod, one);
        let t1 = g.mul(p1, phi_neg_c);
        let spc = g.add(sum, c);
        let t2 = g.mul(spc, pdf_c);
        let inner = g.add(t1, t2);
        let ss = g.mul(sigma0, sigma1);
        Ok(g.mul(ss, inner))
    }

    /// `E[D₀⁺ D₁⁺]` at ρ = −1. The operands are positive together only on
    /// `−a₀ < Z < a₁`; a smooth step factor `½(1 + s/√(s² + ε))` with
    /// `s = a₀ + a₁` zeroes the closed form when that interval is empty.
    /// The closed form itself vanishes at `s = 0`, so the factor's ½ at
    /// the boundary is harmless.
    fn build_rho_neg1(
        g: &mut Graph,
        p: &[NodeId],
        phi: FuncId,
        cap_phi: FuncId,
    ) -> Result<NodeId, ExprError> {
        let (mu0, sigma0, mu1, sigma1) = (p[0], p[1], p[2], p[3]);
        let one = g.one();
        let two = g.constant(2.0);
        let eps = g.constant(SMOOTH_EPS);

        let a0 = g.div(mu0, sigma0)?;
        let a1 = g.div(mu1, sigma1)?;

        let sum = g.add(a0, a1);
        let ss2 = g.mul(sum, sum);
        let ss2e = g.add(ss2, eps);
        let abs_sum = g.sqrt(ss2e);
        let numer = g.add(sum, abs_sum);
        let max_sum = g.div(numer, two)?;
        let step = g.div(max_sum, abs_sum)?;

        let cap0 = g.call(cap_phi, &[a0])?;
        let cap1 = g.call(cap_phi, &[a1])?;
        let pdf0 = g.call(phi, &[a0])?;
        let pdf1 = g.call(phi, &[a1])?;

        let prod = g.mul(a0, a1);
        let pm1 = g.sub(prod, one);
        let caps = g.add(cap0, cap1);
        let capsm1 = g.sub(caps, one);
        let t1 = g.mul(pm1, capsm1);
        let t2 = g.mul(a1, pdf0);
        let t3 = g.mul(a0, pdf1);
        let s = g.add(t1, t2);
        let inner = g.add(s, t3);
        let sig = g.mul(sigma0, sigma1);
        let result = g.mul(sig, inner);
        Ok(g.mul(result, step))
    }
}
