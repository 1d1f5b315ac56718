//! Generalized robust loss (Barron, "A General and Adaptive Robust
//! Loss Function", 2019).
//!
//! One shape parameter `alpha` sweeps the classic M-estimators:
//! L2 at `alpha = 2`, Charbonnier at 1, Cauchy at 0, Geman-McClure
//! toward -2, and Welsch in the limit `alpha -> -inf`.

/// Evaluate the loss for a (non-negative) error value.
///
/// `scale` stretches the error axis and must be positive. The branch
/// cuts follow the reference implementation: `alpha <= -100` is
/// treated as the Welsch limit.
pub fn generalized_loss(error: f64, alpha: f64, scale: f64) -> f64 {
    debug_assert!(scale > 0.0);
    let scaled_sq = (error * error) / (scale * scale);

    if alpha > 2.0 {
        let weight = (alpha - 2.0).abs();
        (weight / alpha) * ((scaled_sq / weight + 1.0).powf(alpha / 2.0) - 1.0)
    } else if alpha > 0.0 {
        0.5 * scaled_sq
    } else if alpha > -100.0 {
        (0.5 * scaled_sq).ln_1p()
    } else {
        1.0 - (-0.5 * scaled_sq).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_error_gives_zero_loss() {
        for alpha in [3.0, 2.0, 1.0, 0.0, -2.0, -500.0] {
            assert_relative_eq!(generalized_loss(0.0, alpha, 1.0), 0.0);
        }
    }

    #[test]
    fn quadratic_branch_is_half_squared_error() {
        assert_relative_eq!(generalized_loss(2.0, 2.0, 1.0), 2.0);
        assert_relative_eq!(generalized_loss(3.0, 1.0, 1.0), 4.5);
        // Scale divides the error.
        assert_relative_eq!(generalized_loss(3.0, 2.0, 3.0), 0.5);
    }

    #[test]
    fn cauchy_branch_is_log1p() {
        let loss = generalized_loss(2.0, 0.0, 1.0);
        assert_relative_eq!(loss, (1.0 + 0.5 * 4.0_f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn welsch_branch_saturates_at_one() {
        let loss = generalized_loss(100.0, -1000.0, 1.0);
        assert!(loss <= 1.0);
        assert!(loss > 0.999);
    }

    #[test]
    fn losses_are_monotonic_in_error() {
        for alpha in [4.0, 2.0, 0.0, -2.0, -500.0] {
            let mut previous = 0.0;
            for step in 1..20 {
                let loss = generalized_loss(step as f64 * 0.5, alpha, 1.0);
                assert!(loss >= previous, "alpha {alpha} not monotonic");
                previous = loss;
            }
        }
    }

    #[test]
    fn robust_branches_grow_slower_than_l2() {
        let error = 10.0;
        let l2 = generalized_loss(error, 2.0, 1.0);
        assert!(generalized_loss(error, 0.0, 1.0) < l2);
        assert!(generalized_loss(error, -500.0, 1.0) < l2);
    }
}
