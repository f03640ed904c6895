//! Gauss-Hermite quadrature rules.
//!
//! Nodes are the roots of the physicists' Hermite polynomial `H_n`, found
//! by Newton iteration on the orthonormal three-term recurrence. Working
//! with the orthonormal polynomials keeps every intermediate of order one,
//! so rules of 128 points and beyond are built without touching the
//! `2^n n!` factors that overflow the textbook weight formula.

use std::collections::HashMap;

use super::QuadratureError;

const NEWTON_TOL: f64 = 3e-14;
const NEWTON_MAX_ITER: usize = 64;

/// Nodes and weights of one Gauss-Hermite rule: `∫ f(x) e^{-x²} dx ≈
/// Σ wᵢ f(xᵢ)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussHermite {
    /// Abscissas, descending then mirrored (symmetric about 0).
    pub nodes: Vec<f64>,
    /// Positive weights, symmetric with the nodes.
    pub weights: Vec<f64>,
}

impl GaussHermite {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` for the (unreachable) zero-point rule.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Orthonormal Hermite recurrence at `z`: returns `(p_n(z), p_{n-1}(z))`.
fn hermite_pair(n: usize, z: f64) -> (f64, f64) {
    // p_0 = π^{-1/4}
    let mut p1 = std::f64::consts::PI.powf(-0.25);
    let mut p2 = 0.0;
    for j in 1..=n {
        let p3 = p2;
        p2 = p1;
        p1 = z * (2.0 / j as f64).sqrt() * p2 - ((j as f64 - 1.0) / j as f64).sqrt() * p3;
    }
    (p1, p2)
}

/// Builds the `n`-point Gauss-Hermite rule.
pub fn gauss_hermite(n: usize) -> Result<GaussHermite, QuadratureError> {
    if n == 0 {
        return Err(QuadratureError::EmptyRule);
    }
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let m = (n + 1) / 2;
    let nf = n as f64;

    let mut z = 0.0;
    for i in 0..m {
        // starting guesses, largest root first
        z = match i {
            0 => (2.0 * nf + 1.0).sqrt() - 1.85575 * (2.0 * nf + 1.0).powf(-1.0 / 6.0),
            1 => z - 1.14 * nf.powf(0.426) / z,
            2 => 1.86 * z - 0.86 * nodes[0],
            3 => 1.91 * z - 0.91 * nodes[1],
            _ => 2.0 * z - nodes[i - 2],
        };
        let mut pp = 0.0;
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITER {
            let (p1, p2) = hermite_pair(n, z);
            pp = (2.0 * nf).sqrt() * p2;
            let z1 = z;
            z = z1 - p1 / pp;
            if (z - z1).abs() <= NEWTON_TOL {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(QuadratureError::NonConvergence {
                index: i,
                iterations: NEWTON_MAX_ITER,
            });
        }
        nodes[i] = z;
        nodes[n - 1 - i] = -z;
        weights[i] = 2.0 / (pp * pp);
        weights[n - 1 - i] = weights[i];
    }
    Ok(GaussHermite { nodes, weights })
}

/// Per-point-count cache of Gauss-Hermite rules.
///
/// The covariance engine escalates its point count with |ρ|, so the same
/// handful of rules are requested over and over; each is built once.
#[derive(Debug, Default)]
pub struct GhCache {
    rules: HashMap<usize, GaussHermite>,
}

impl GhCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`-point rule, built on first request.
    pub fn rule(&mut self, n: usize) -> Result<&GaussHermite, QuadratureError> {
        if !self.rules.contains_key(&n) {
            let rule = gauss_hermite(n)?;
            self.rules.insert(n, rule);
        }
        Ok(&self.rules[&n])
    }
}
