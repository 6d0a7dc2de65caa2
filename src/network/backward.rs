use ndarray::{Array1, Array2};

use crate::layout::UnitLayout;
use crate::network::state::TrainState;
use crate::sequence::{for_each_source, InputRep};
use crate::utils::{sigmoid_deriv, squash_cell_input_deriv, squash_cell_state_deriv};

/// Advances the eligibility traces by one step, before the backward pass.
///
/// The traces are running sums over the whole sequence so far, the
/// real-time substitute for unrolling the recurrence. They are reset once
/// per sequence and never decayed or clipped. Evaluation order is fixed:
/// the forget-gate trace reads the cell trace of the previous step, so
/// `SI` and `SF` advance before `SC`.
pub fn update_traces<I: InputRep>(layout: &UnitLayout, state: &mut TrainState, input: &I) {
    for (u, block) in layout.blocks.iter().enumerate() {
        if !state.mask[u] {
            continue;
        }

        let y_in = state.y_in[u];
        let y_forget = state.y_forget[u];
        let in_deriv = sigmoid_deriv(y_in);
        let forget_deriv = sigmoid_deriv(y_forget);

        for v in 0..block.num_cells() {
            let g = state.g[u][v];
            let TrainState { si, sf, sc, y, .. } = &mut *state;
            let y: &[f64] = y;
            let (si, sf, sc) = (&mut si[u][v], &mut sf[u][v], &mut sc[u][v]);

            if block.input_gate.is_some() {
                let factor = g * in_deriv;
                for_each_source(input, layout, y, &mut |slot, x| {
                    si[slot] += factor * x;
                });
            }
            if block.forget_gate.is_some() {
                for_each_source(input, layout, y, &mut |slot, x| {
                    sf[slot] += sc[slot] * forget_deriv * x;
                });
            }
            let factor = y_in * squash_cell_input_deriv(g);
            for_each_source(input, layout, y, &mut |slot, x| {
                sc[slot] += factor * x;
            });
        }
    }
}

/// Accumulates one step's weight deltas into `deltas` from the output error
/// `e = target − output` (the cross-entropy net-input gradient in both
/// output modes; missing target entries contribute zero error).
///
/// Every accumulated delta carries the L2 term `−α·λ·W`. Dropped blocks are
/// skipped entirely.
pub fn accumulate_deltas<I: InputRep>(
    layout: &UnitLayout,
    weights: &Array2<f64>,
    state: &TrainState,
    input: &I,
    target: &Array1<f64>,
    deltas: &mut Array2<f64>,
    alpha: f64,
    lambda: f64,
) {
    let num_outputs = layout.outputs.len();
    let mut errors = vec![0.0; num_outputs];
    for (k, out) in layout.outputs.clone().enumerate() {
        let t = target[k];
        if !t.is_nan() {
            errors[k] = t - state.y_new[out];
        }
    }

    // Output weights: hidden and cell activations of the current step.
    for (k, out) in layout.outputs.clone().enumerate() {
        let e = errors[k];
        for slot in layout.recurrent_slots() {
            let unit = layout.source_unit(slot);
            deltas[[out, unit]] +=
                alpha * (e * state.y_new[unit] - lambda * weights[[out, unit]]);
        }
    }

    // Hidden units: sigmoid derivative of the downstream weighted error.
    for i in layout.hidden.clone() {
        let mut downstream = 0.0;
        for (k, out) in layout.outputs.clone().enumerate() {
            downstream += weights[[out, i]] * errors[k];
        }
        let e_h = sigmoid_deriv(state.y_new[i]) * downstream;
        for_each_source(input, layout, &state.y, &mut |slot, x| {
            let unit = layout.source_unit(slot);
            deltas[[i, unit]] += alpha * (e_h * x - lambda * weights[[i, unit]]);
        });
    }

    for (u, block) in layout.blocks.iter().enumerate() {
        if !state.mask[u] {
            continue;
        }

        // Per-cell downstream error and internal-state error, gated by the
        // output gate and the cell-output derivative.
        let num_cells = block.num_cells();
        let mut ec = vec![0.0; num_cells];
        let mut es = vec![0.0; num_cells];
        for (v, cell) in block.cells.clone().enumerate() {
            let mut downstream = 0.0;
            for (k, out) in layout.outputs.clone().enumerate() {
                downstream += weights[[out, cell]] * errors[k];
            }
            ec[v] = downstream;
            es[v] = state.y_out[u] * squash_cell_state_deriv(state.h[u][v]) * downstream;
        }

        if let Some(gate) = block.output_gate {
            let mut sum = 0.0;
            for v in 0..num_cells {
                sum += state.h[u][v] * ec[v];
            }
            let delta_gate = sigmoid_deriv(state.y_out[u]) * sum;
            for_each_source(input, layout, &state.y, &mut |slot, x| {
                let unit = layout.source_unit(slot);
                deltas[[gate, unit]] += alpha * (delta_gate * x - lambda * weights[[gate, unit]]);
            });
        }

        if let Some(gate) = block.input_gate {
            for slot in 0..layout.num_sources() {
                let unit = layout.source_unit(slot);
                let mut sum = 0.0;
                for v in 0..num_cells {
                    sum += es[v] * state.si[u][v][slot];
                }
                deltas[[gate, unit]] += alpha * (sum - lambda * weights[[gate, unit]]);
            }
        }

        if let Some(gate) = block.forget_gate {
            for slot in 0..layout.num_sources() {
                let unit = layout.source_unit(slot);
                let mut sum = 0.0;
                for v in 0..num_cells {
                    sum += es[v] * state.sf[u][v][slot];
                }
                deltas[[gate, unit]] += alpha * (sum - lambda * weights[[gate, unit]]);
            }
        }

        for (v, cell) in block.cells.clone().enumerate() {
            for slot in 0..layout.num_sources() {
                let unit = layout.source_unit(slot);
                deltas[[cell, unit]] +=
                    alpha * (es[v] * state.sc[u][v][slot] - lambda * weights[[cell, unit]]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkOptions;
    use crate::network::forward::forward_step;
    use crate::sequence::DenseInput;
    use ndarray::arr1;

    fn run_step(
        options: &NetworkOptions,
        layout: &UnitLayout,
        weights: &Array2<f64>,
        state: &mut TrainState,
        input: &DenseInput,
        target: &Array1<f64>,
        deltas: &mut Array2<f64>,
        alpha: f64,
    ) {
        forward_step(options, layout, weights, state, input, true);
        update_traces(layout, state, input);
        accumulate_deltas(layout, weights, state, input, target, deltas, alpha, 0.0);
        state.commit_step();
    }

    #[test]
    fn test_missing_target_entries_accumulate_nothing() {
        let options = NetworkOptions::new(1, 1, 1, 1, 2);
        let layout = UnitLayout::new(&options).unwrap();
        let weights = Array2::from_elem((layout.num_all, layout.num_all), 0.2);
        let mut state = TrainState::new(&layout);
        let mut deltas = Array2::zeros((layout.num_all, layout.num_all));

        let target = arr1(&[f64::NAN, f64::NAN]);
        run_step(
            &options,
            &layout,
            &weights,
            &mut state,
            &DenseInput(vec![1.0]),
            &target,
            &mut deltas,
            0.5,
        );
        assert!(deltas.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_traces_accumulate_across_steps() {
        let options = NetworkOptions::new(1, 0, 1, 1, 1);
        let layout = UnitLayout::new(&options).unwrap();
        let weights = Array2::from_elem((layout.num_all, layout.num_all), 0.3);
        let mut state = TrainState::new(&layout);

        let input = DenseInput(vec![1.0]);
        forward_step(&options, &layout, &weights, &mut state, &input, false);
        update_traces(&layout, &mut state, &input);
        state.commit_step();
        let after_one = state.sc[0][0][0];
        assert!(after_one != 0.0);

        forward_step(&options, &layout, &weights, &mut state, &input, false);
        update_traces(&layout, &mut state, &input);
        state.commit_step();
        // Running sum, not a per-step overwrite.
        assert!(state.sc[0][0][0].abs() > after_one.abs());
    }

    #[test]
    fn test_dropped_block_gets_no_deltas_or_traces() {
        let options = NetworkOptions::new(1, 0, 1, 1, 1);
        let layout = UnitLayout::new(&options).unwrap();
        let weights = Array2::from_elem((layout.num_all, layout.num_all), 0.2);
        let mut state = TrainState::new(&layout);
        let mut deltas = Array2::zeros((layout.num_all, layout.num_all));

        state.mask[0] = false;
        run_step(
            &options,
            &layout,
            &weights,
            &mut state,
            &DenseInput(vec![1.0]),
            &arr1(&[1.0]),
            &mut deltas,
            0.5,
        );

        assert!(state.sc[0][0].iter().all(|&t| t == 0.0));
        let cell = layout.blocks[0].cells.start;
        for j in 0..layout.num_all {
            assert_eq!(deltas[[cell, j]], 0.0);
        }
        // Output weights still learn from the (hidden-free) error signal.
        let out = layout.outputs.start;
        let _ = deltas[[out, cell]];
    }

    #[test]
    fn test_weight_decay_shrinks_toward_zero() {
        let options = NetworkOptions::new(1, 1, 1, 1, 1);
        let layout = UnitLayout::new(&options).unwrap();
        let weights = Array2::from_elem((layout.num_all, layout.num_all), 1.0);
        let mut state = TrainState::new(&layout);
        let mut deltas = Array2::zeros((layout.num_all, layout.num_all));

        // Zero error: deltas are pure decay, negative for positive weights.
        forward_step(&options, &layout, &weights, &mut state, &DenseInput(vec![0.0]), true);
        update_traces(&layout, &mut state, &DenseInput(vec![0.0]));
        let out = layout.outputs.start;
        let target = arr1(&[state.y_new[out]]);
        accumulate_deltas(
            &layout,
            &weights,
            &state,
            &DenseInput(vec![0.0]),
            &target,
            &mut deltas,
            0.5,
            0.1,
        );

        let hidden = layout.hidden.start;
        assert!(deltas[[out, hidden]] < 0.0);
    }
}
