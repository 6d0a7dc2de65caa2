use ndarray::{arr1, Array2};
use rtrl_lstm::network::backward::{accumulate_deltas, update_traces};
use rtrl_lstm::network::forward::forward_step;
use rtrl_lstm::sequence::DenseInput;
use rtrl_lstm::{NetworkOptions, TrainState, UnitLayout};

/// Smallest synthetic network: one block, one cell, no gates, no hidden
/// units, no bias. Units: input 0, cell 1, output 2.
fn minimal_options() -> NetworkOptions {
    let mut options = NetworkOptions::new(1, 0, 1, 1, 1);
    options.input_gate = false;
    options.output_gate = false;
    options.forget_gate = false;
    options.bias = false;
    options
}

/// Cross-entropy loss of the single sigmoid output after one forward step.
fn loss_after_one_step(
    options: &NetworkOptions,
    layout: &UnitLayout,
    weights: &Array2<f64>,
    x: f64,
    target: f64,
) -> f64 {
    let mut state = TrainState::new(layout);
    let output = forward_step(options, layout, weights, &mut state, &DenseInput(vec![x]), true)
        .expect("output requested");
    let y = output[0];
    -(target * y.ln() + (1.0 - target) * (1.0 - y).ln())
}

/// The backward pass accumulates `α·(∂(-L)/∂w)` for every weight; with
/// α = 1 the delta must match the negated central finite difference of the
/// cross-entropy loss.
#[test]
fn test_deltas_match_finite_differences() {
    let options = minimal_options();
    let layout = UnitLayout::new(&options).unwrap();
    let n = layout.num_all;
    assert_eq!(n, 3);

    let mut weights = Array2::zeros((n, n));
    let cell = layout.blocks[0].cells.start;
    let out = layout.outputs.start;
    weights[[cell, 0]] = 0.6; // input -> cell
    weights[[cell, cell]] = -0.4; // cell -> cell (recurrent)
    weights[[out, cell]] = 0.8; // cell -> output

    let x = 1.0;
    let target = 1.0;

    // Analytic deltas from one forward/trace/backward step.
    let mut state = TrainState::new(&layout);
    forward_step(&options, &layout, &weights, &mut state, &DenseInput(vec![x]), true);
    update_traces(&layout, &mut state, &DenseInput(vec![x]));
    let mut deltas = Array2::zeros((n, n));
    accumulate_deltas(
        &layout,
        &weights,
        &state,
        &DenseInput(vec![x]),
        &arr1(&[target]),
        &mut deltas,
        1.0,
        0.0,
    );

    let eps = 1e-5;
    for &(i, j) in &[(cell, 0usize), (out, cell)] {
        let mut plus = weights.clone();
        plus[[i, j]] += eps;
        let mut minus = weights.clone();
        minus[[i, j]] -= eps;

        let numeric = -(loss_after_one_step(&options, &layout, &plus, x, target)
            - loss_after_one_step(&options, &layout, &minus, x, target))
            / (2.0 * eps);
        let analytic = deltas[[i, j]];

        let denom = numeric.abs().max(1e-8);
        assert!(
            ((analytic - numeric) / denom).abs() < 1e-4,
            "weight [{}][{}]: analytic {} vs numeric {}",
            i,
            j,
            analytic,
            numeric
        );
    }
}

/// With all gates enabled the first step is still exact: the traces contain
/// exactly one step of history, so the gate-weight deltas must match finite
/// differences too.
#[test]
fn test_gate_deltas_match_on_first_step() {
    let mut options = NetworkOptions::new(1, 0, 1, 1, 1);
    options.bias = false;
    let layout = UnitLayout::new(&options).unwrap();
    let n = layout.num_all;

    let mut weights = Array2::zeros((n, n));
    let block = &layout.blocks[0];
    let cell = block.cells.start;
    let out = layout.outputs.start;
    weights[[cell, 0]] = 0.5;
    weights[[out, cell]] = 0.9;
    weights[[block.input_gate.unwrap(), 0]] = 0.3;
    weights[[block.output_gate.unwrap(), 0]] = -0.2;
    weights[[block.forget_gate.unwrap(), 0]] = 0.1;

    let x = 1.0;
    let target = 0.0;

    let mut state = TrainState::new(&layout);
    forward_step(&options, &layout, &weights, &mut state, &DenseInput(vec![x]), true);
    update_traces(&layout, &mut state, &DenseInput(vec![x]));
    let mut deltas = Array2::zeros((n, n));
    accumulate_deltas(
        &layout,
        &weights,
        &state,
        &DenseInput(vec![x]),
        &arr1(&[target]),
        &mut deltas,
        1.0,
        0.0,
    );

    let eps = 1e-5;
    let checked = [
        (block.input_gate.unwrap(), 0usize),
        (block.output_gate.unwrap(), 0usize),
        (cell, 0usize),
        (out, cell),
    ];
    for &(i, j) in &checked {
        let mut plus = weights.clone();
        plus[[i, j]] += eps;
        let mut minus = weights.clone();
        minus[[i, j]] -= eps;

        let numeric = -(loss_after_one_step(&options, &layout, &plus, x, target)
            - loss_after_one_step(&options, &layout, &minus, x, target))
            / (2.0 * eps);
        let analytic = deltas[[i, j]];

        let denom = numeric.abs().max(1e-8);
        assert!(
            ((analytic - numeric) / denom).abs() < 1e-4,
            "weight [{}][{}]: analytic {} vs numeric {}",
            i,
            j,
            analytic,
            numeric
        );
    }
}
