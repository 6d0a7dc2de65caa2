/// Activation functions shared by the forward and backward passes.

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Cell-input squashing function g(x) = 4σ(x) − 2, range [-2, 2].
pub fn squash_cell_input(x: f64) -> f64 {
    4.0 * sigmoid(x) - 2.0
}

/// Derivative of `squash_cell_input` expressed in terms of its value:
/// g'(x) = 0.25·(2 − g)·(2 + g).
pub fn squash_cell_input_deriv(g: f64) -> f64 {
    0.25 * (2.0 - g) * (2.0 + g)
}

/// Cell-state squashing function h(s) = 2σ(s) − 1, range [-1, 1].
pub fn squash_cell_state(s: f64) -> f64 {
    2.0 * sigmoid(s) - 1.0
}

/// Derivative of `squash_cell_state` expressed in terms of its value:
/// h'(s) = 0.5·(1 + h)·(1 − h).
pub fn squash_cell_state_deriv(h: f64) -> f64 {
    0.5 * (1.0 + h) * (1.0 - h)
}

/// Derivative of the sigmoid expressed in terms of its value: y·(1 − y).
pub fn sigmoid_deriv(y: f64) -> f64 {
    y * (1.0 - y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-10);
        assert!(sigmoid(1000.0) > 0.99);
        assert!(sigmoid(-1000.0) < 0.01);
    }

    #[test]
    fn test_cell_input_range() {
        assert!((squash_cell_input(0.0)).abs() < 1e-10);
        assert!(squash_cell_input(1000.0) <= 2.0);
        assert!(squash_cell_input(-1000.0) >= -2.0);
    }

    #[test]
    fn test_cell_state_range() {
        assert!((squash_cell_state(0.0)).abs() < 1e-10);
        assert!(squash_cell_state(1000.0) <= 1.0);
        assert!(squash_cell_state(-1000.0) >= -1.0);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let eps = 1e-6;
        for &x in &[-2.0, -0.5, 0.0, 0.7, 1.9] {
            let num = (squash_cell_input(x + eps) - squash_cell_input(x - eps)) / (2.0 * eps);
            let ana = squash_cell_input_deriv(squash_cell_input(x));
            assert!((num - ana).abs() < 1e-6, "g' mismatch at {}", x);

            let num = (squash_cell_state(x + eps) - squash_cell_state(x - eps)) / (2.0 * eps);
            let ana = squash_cell_state_deriv(squash_cell_state(x));
            assert!((num - ana).abs() < 1e-6, "h' mismatch at {}", x);

            let num = (sigmoid(x + eps) - sigmoid(x - eps)) / (2.0 * eps);
            let ana = sigmoid_deriv(sigmoid(x));
            assert!((num - ana).abs() < 1e-6, "sigma' mismatch at {}", x);
        }
    }
}
