use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;

use crate::layout::UnitLayout;

/// Per-block dropout: one Bernoulli(0.5) draw per memory block, redrawn once
/// per training sequence. A dropped block is skipped entirely in the forward
/// and backward passes and its cell state is not updated.
///
/// Evaluation never masks; instead every weight touching a gate or cell unit
/// is scaled by 0.5 for the test pass and restored afterwards, which
/// approximates averaging over all dropout masks.
#[derive(Debug, Clone, Copy)]
pub struct DropoutSampler {
    enabled: bool,
}

pub const EVAL_SCALE: f64 = 0.5;
pub const EVAL_RESTORE: f64 = 2.0;

impl DropoutSampler {
    pub fn new(enabled: bool) -> Self {
        DropoutSampler { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Redraws the per-block mask for one training sequence.
    pub fn draw(&self, rng: &mut StdRng, mask: &mut [bool]) {
        if !self.enabled {
            mask.iter_mut().for_each(|m| *m = true);
            return;
        }
        for m in mask.iter_mut() {
            *m = rng.gen_bool(0.5);
        }
    }
}

/// Scales every weight whose target or source is a gate or cell unit.
/// Called with `EVAL_SCALE` before an evaluation pass and `EVAL_RESTORE`
/// after it; both factors are powers of two, so the restore is exact.
pub fn scale_block_weights(weights: &mut Array2<f64>, layout: &UnitLayout, factor: f64) {
    let mut is_block_unit = vec![false; layout.num_all];
    for block in &layout.blocks {
        for gate in [block.input_gate, block.output_gate, block.forget_gate] {
            if let Some(g) = gate {
                is_block_unit[g] = true;
            }
        }
        for cell in block.cells.clone() {
            is_block_unit[cell] = true;
        }
    }

    for ((target, source), w) in weights.indexed_iter_mut() {
        if is_block_unit[target] || is_block_unit[source] {
            *w *= factor;
        }
    }
}
