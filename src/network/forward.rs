use ndarray::{Array1, Array2};

use crate::config::NetworkOptions;
use crate::layout::UnitLayout;
use crate::network::state::TrainState;
use crate::sequence::InputRep;
use crate::utils::{sigmoid, squash_cell_input, squash_cell_state};

/// Runs one time step: loads the input region, computes hidden units, gate
/// and cell activations for every active block, and (when asked) the output
/// units. New activations land in `state.y_new`; the caller commits them
/// after the traces and deltas have consumed the previous ones.
///
/// Output activations are sigmoid, or exp + sum-normalization across the
/// output region when classification mode is on.
pub fn forward_step<I: InputRep>(
    options: &NetworkOptions,
    layout: &UnitLayout,
    weights: &Array2<f64>,
    state: &mut TrainState,
    input: &I,
    compute_output: bool,
) -> Option<Array1<f64>> {
    // Input region: current step's values, bias pinned to 1.0. Everything
    // else in y_new starts from zero so dropped blocks contribute nothing.
    state.y_new.iter_mut().for_each(|v| *v = 0.0);
    input.for_each_nonzero(&mut |slot, x| state.y_new[slot] = x);
    if let Some(bias) = layout.bias {
        state.y_new[bias] = 1.0;
    }

    // Net input of one unit: current inputs plus the previous step's hidden
    // and cell activations.
    let net_for = |target: usize, state: &TrainState| -> f64 {
        let mut net = input.weighted_sum(weights, target);
        if let Some(bias) = layout.bias {
            net += weights[[target, bias]];
        }
        for slot in layout.recurrent_slots() {
            let unit = layout.source_unit(slot);
            net += weights[[target, unit]] * state.y[unit];
        }
        net
    };

    for i in layout.hidden.clone() {
        let activation = sigmoid(net_for(i, state));
        state.y_new[i] = activation;
    }

    for (u, block) in layout.blocks.iter().enumerate() {
        if !state.mask[u] {
            continue;
        }

        let y_in = block.input_gate.map_or(1.0, |g| sigmoid(net_for(g, state)));
        let y_out = block.output_gate.map_or(1.0, |g| sigmoid(net_for(g, state)));
        let y_forget = block.forget_gate.map_or(1.0, |g| sigmoid(net_for(g, state)));
        state.y_in[u] = y_in;
        state.y_out[u] = y_out;
        state.y_forget[u] = y_forget;

        if let Some(gate) = block.input_gate {
            state.y_new[gate] = state.y_in[u];
        }
        if let Some(gate) = block.output_gate {
            state.y_new[gate] = state.y_out[u];
        }
        if let Some(gate) = block.forget_gate {
            state.y_new[gate] = state.y_forget[u];
        }

        for (v, cell) in block.cells.clone().enumerate() {
            let g = squash_cell_input(net_for(cell, state));
            let s = state.y_forget[u] * state.s[u][v] + state.y_in[u] * g;
            let h = squash_cell_state(s);
            state.g[u][v] = g;
            state.s[u][v] = s;
            state.h[u][v] = h;
            state.y_new[cell] = h * state.y_out[u];
        }
    }

    if !compute_output {
        return None;
    }

    // Output units read the current step's hidden and cell activations.
    let mut nets = Array1::zeros(layout.outputs.len());
    for (k, out) in layout.outputs.clone().enumerate() {
        let mut net = 0.0;
        for slot in layout.recurrent_slots() {
            let unit = layout.source_unit(slot);
            net += weights[[out, unit]] * state.y_new[unit];
        }
        nets[k] = net;
    }

    let outputs = if options.classification {
        softmax(&nets)
    } else {
        nets.mapv(sigmoid)
    };
    for (k, out) in layout.outputs.clone().enumerate() {
        state.y_new[out] = outputs[k];
    }
    Some(outputs)
}

/// Numerically stable softmax over the output region.
fn softmax(nets: &Array1<f64>) -> Array1<f64> {
    let max = nets.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps = nets.mapv(|n| (n - max).exp());
    let sum = exps.sum();
    exps / sum
}
