use chess_adapter::Side;

/// Converts a White-relative centipawn score to the perspective of the
/// mover at the position it was computed for. The reference engine always
/// reports White-relative; this is the single place that reinterprets it.
pub fn mover_relative(white_relative_cp: i32, mover: Side) -> i32 {
    match mover {
        Side::White => white_relative_cp,
        Side::Black => -white_relative_cp,
    }
}

/// Win probability in percent, via the logistic WDL approximation.
pub fn win_probability(mover_relative_cp: i32) -> f64 {
    100.0 / (1.0 + (-0.00368208 * mover_relative_cp as f64).exp())
}

/// Move accuracy in percent from a win-probability-loss value.
pub fn compute_accuracy(win_probability_loss: f64) -> f64 {
    let raw = 103.1668 * (-0.04354 * win_probability_loss).exp() - 3.1669;
    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mover_relative_negates_only_for_black() {
        assert_eq!(mover_relative(20, Side::White), 20);
        assert_eq!(mover_relative(-40, Side::Black), 40);
        assert_eq!(mover_relative(90, Side::Black), -90);
    }

    #[test]
    fn win_probability_is_symmetric_around_even() {
        let wp = win_probability(0);
        assert!((wp - 50.0).abs() < 1e-9);
        assert!(win_probability(500) > 50.0);
        assert!(win_probability(-500) < 50.0);
    }

    #[test]
    fn accuracy_is_perfect_at_zero_loss() {
        let acc = compute_accuracy(0.0);
        assert!((acc - 100.0).abs() < 0.01);
    }

    #[test]
    fn accuracy_clamps_to_zero_for_large_loss() {
        assert_eq!(compute_accuracy(1000.0), 0.0);
    }
}
