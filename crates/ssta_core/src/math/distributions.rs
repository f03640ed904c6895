//! Standard-normal distribution helpers and the rectified-moment family.
//!
//! The CDF goes through `libm::erfc` rather than a polynomial
//! approximation: the covariance engine asserts agreement between its
//! scalar and expression paths to 1e-6 relative, which a 1e-7-absolute
//! approximation of `erf` cannot support once amplified through the
//! conditional-moment formulas.

use num_traits::Float;

/// Standard normal probability density function.
///
/// # Mathematical Definition
///
/// ```text
/// φ(x) = exp(-x²/2) / √(2π)
/// ```
///
/// # Examples
///
/// ```
/// use ssta_core::math::distributions::norm_pdf;
///
/// let density: f64 = norm_pdf(0.0);
/// assert!((density - 0.3989422804014327).abs() < 1e-15);
/// ```
pub fn norm_pdf<T: Float>(x: T) -> T {
    let two_pi = T::from(2.0 * std::f64::consts::PI).unwrap();
    (-(x * x) / T::from(2.0).unwrap()).exp() / two_pi.sqrt()
}

/// Standard normal cumulative distribution function, `Φ(x)`.
///
/// Uses `erfc` so the deep lower tail keeps relative accuracy.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// `E[max(Z, a)] = φ(a) + a·Φ(a)` for standard normal `Z` and constant
/// threshold `a`.
///
/// The same value is `E[max(N(a,1), 0)]`, so this one table serves both
/// the thresholded-maximum and the rectified-normal mean.
pub fn mean_max(a: f64) -> f64 {
    norm_pdf(a) + a * norm_cdf(a)
}

/// `E[max(Z, a)²] = 1 + (a² − 1)·Φ(a) + a·φ(a)`.
pub fn mean_max2(a: f64) -> f64 {
    1.0 + (a * a - 1.0) * norm_cdf(a) + a * norm_pdf(a)
}

/// `P[Z > a] = 1 − Φ(a)`, computed as `Φ(−a)` for tail accuracy.
///
/// This is the probability that `max(Z, a)` is decided by `Z`, which is
/// the weight the single-rectifier covariance rule puts on the linear
/// channel.
pub fn mean_phi_max(a: f64) -> f64 {
    norm_cdf(-a)
}

/// `E[max(N(μ,σ²), 0)] = σ·φ(μ/σ) + μ·Φ(μ/σ)` for `σ > 0`.
pub fn expected_positive_part(mu: f64, sigma: f64) -> f64 {
    debug_assert!(sigma > 0.0);
    let a = mu / sigma;
    sigma * norm_pdf(a) + mu * norm_cdf(a)
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use proptest::prelude::*;

    use super::*;

    // ------------------------------------------------------------------
    // PDF / CDF reference values
    // ------------------------------------------------------------------

    #[test]
    fn test_norm_pdf_reference_values() {
        assert_relative_eq!(norm_pdf(0.0), 0.3989422804014327, max_relative = 1e-15);
        assert_relative_eq!(norm_pdf(1.0), 0.24197072451914337, max_relative = 1e-14);
        assert_relative_eq!(norm_pdf(-1.0), norm_pdf(1.0), max_relative = 1e-15);
        assert_relative_eq!(norm_pdf(2.5), 0.01752830049356854, max_relative = 1e-13);
    }

    #[test]
    fn test_norm_cdf_reference_values() {
        assert_relative_eq!(norm_cdf(0.0), 0.5, max_relative = 1e-15);
        assert_relative_eq!(norm_cdf(1.0), 0.8413447460685429, max_relative = 1e-14);
        assert_relative_eq!(norm_cdf(-1.0), 0.15865525393145707, max_relative = 1e-14);
        assert_relative_eq!(norm_cdf(1.959963984540054), 0.975, max_relative = 1e-12);
    }

    #[test]
    fn test_norm_cdf_symmetry_and_tails() {
        for &x in &[0.1, 0.7, 1.3, 2.9, 4.4] {
            assert_abs_diff_eq!(norm_cdf(x) + norm_cdf(-x), 1.0, epsilon = 1e-15);
        }
        // deep tail keeps relative accuracy through erfc
        assert_relative_eq!(norm_cdf(-8.0), 6.220960574271786e-16, max_relative = 1e-10);
    }

    #[test]
    fn test_norm_cdf_monotone() {
        let mut prev = norm_cdf(-6.0);
        let mut x = -6.0;
        while x < 6.0 {
            x += 0.25;
            let next = norm_cdf(x);
            assert!(next > prev);
            prev = next;
        }
    }

    // ------------------------------------------------------------------
    // Rectified moments
    // ------------------------------------------------------------------

    #[test]
    fn test_mean_max_limits() {
        // a → ∞: the threshold dominates, E[max(Z,a)] → a;
        // a → −∞: Z dominates, E → E[Z] = 0
        assert_relative_eq!(mean_max(8.0), 8.0, max_relative = 1e-12);
        assert_abs_diff_eq!(mean_max(-8.0), 0.0, epsilon = 1e-14);
        // a = 0: E[max(Z,0)] = φ(0)
        assert_relative_eq!(mean_max(0.0), 0.3989422804014327, max_relative = 1e-15);
    }

    #[test]
    fn test_mean_max2_limits() {
        // a = 0: E[max(Z,0)²] = 1/2
        assert_relative_eq!(mean_max2(0.0), 0.5, max_relative = 1e-15);
        // a → ∞: → a²; a → −∞: → E[Z²] = 1
        assert_relative_eq!(mean_max2(8.0), 64.0, max_relative = 1e-11);
        assert_relative_eq!(mean_max2(-8.0), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_mean_max_against_numeric_integral() {
        // E[max(Z,a)] by trapezoidal integration of max(z,a)·φ(z)
        for &a in &[-1.5, -0.3, 0.0, 0.6, 2.2] {
            let n = 200_000;
            let (lo, hi) = (-12.0, 12.0);
            let h = (hi - lo) / n as f64;
            let mut sum = 0.0;
            for i in 0..=n {
                let z = lo + i as f64 * h;
                let w = if i == 0 || i == n { 0.5 } else { 1.0 };
                sum += w * z.max(a) * norm_pdf(z);
            }
            assert_relative_eq!(mean_max(a), sum * h, max_relative = 1e-8, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_mean_max2_against_numeric_integral() {
        for &a in &[-1.5, 0.0, 0.6, 2.2] {
            let n = 200_000;
            let (lo, hi) = (-12.0, 12.0);
            let h = (hi - lo) / n as f64;
            let mut sum = 0.0;
            for i in 0..=n {
                let z = lo + i as f64 * h;
                let w = if i == 0 || i == n { 0.5 } else { 1.0 };
                let m = z.max(a);
                sum += w * m * m * norm_pdf(z);
            }
            assert_relative_eq!(mean_max2(a), sum * h, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_rectified_mean_identity() {
        // E[max(0, μ + σZ)] = μ + σ·MeanMax(−μ/σ) must agree with the
        // direct rectified mean
        for &(mu, sigma) in &[(2.0, 1.0), (-1.0, 2.0), (0.5, 0.25)] {
            let a = -mu / sigma;
            assert_relative_eq!(
                mu + sigma * mean_max(a),
                expected_positive_part(mu, sigma),
                max_relative = 1e-13
            );
        }
    }

    #[test]
    fn test_mean_phi_max() {
        assert_relative_eq!(mean_phi_max(0.0), 0.5, max_relative = 1e-15);
        assert_relative_eq!(mean_phi_max(1.0), norm_cdf(-1.0), max_relative = 1e-15);
        assert!(mean_phi_max(6.0) < 1e-8);
    }

    #[test]
    fn test_expected_positive_part_scales() {
        // σ-scaling: E[max(N(μ,σ²),0)] = σ·MeanMax(μ/σ)
        for &(mu, sigma) in &[(0.0, 1.0), (2.0, 0.5), (-1.0, 3.0), (4.0, 2.0)] {
            assert_relative_eq!(
                expected_positive_part(mu, sigma),
                sigma * mean_max(mu / sigma),
                max_relative = 1e-14
            );
        }
        // dominant-mean limit
        assert_relative_eq!(expected_positive_part(50.0, 1.0), 50.0, max_relative = 1e-12);
    }

    proptest! {
        #[test]
        fn prop_mean_max_bounds(a in -6.0..6.0f64) {
            // max(z, a) ≥ both z and a pointwise, so the mean dominates
            // both E[Z] = 0 and a, and exceeds neither by more than E|Z|+|a|
            let m = mean_max(a);
            prop_assert!(m >= a);
            prop_assert!(m >= 0.0);
            prop_assert!(m <= a.abs() + 1.0);
            // second moment dominates the squared mean
            prop_assert!(mean_max2(a) >= m * m);
        }

        #[test]
        fn prop_cdf_in_unit_interval(x in -40.0..40.0f64) {
            let p = norm_cdf(x);
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert!((p + norm_cdf(-x) - 1.0).abs() < 1e-14);
        }
    }
}
