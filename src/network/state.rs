use crate::layout::UnitLayout;

/// Per-worker scratch state for one network: activation vectors, gate and
/// cell values, eligibility traces, and the dropout mask.
///
/// Constructed once per worker and reused across sequences; `reset_sequence`
/// clears it without reallocating. Only `s` persists recurrently across steps
/// within a sequence; the traces are running sums over the sequence so far.
#[derive(Debug, Clone)]
pub struct TrainState {
    /// Activations after the previous step, one slot per unit.
    pub y: Vec<f64>,
    /// Activations being computed for the current step.
    pub y_new: Vec<f64>,
    /// Per-block gate activations for the current step.
    pub y_in: Vec<f64>,
    pub y_out: Vec<f64>,
    pub y_forget: Vec<f64>,
    /// Per-cell values for the current step, `[block][cell]`.
    pub g: Vec<Vec<f64>>,
    pub h: Vec<Vec<f64>>,
    /// Internal cell states; the only values carried from step to step.
    pub s: Vec<Vec<f64>>,
    /// Eligibility traces, `[block][cell][source slot]`.
    pub si: Vec<Vec<Vec<f64>>>,
    pub sf: Vec<Vec<Vec<f64>>>,
    pub sc: Vec<Vec<Vec<f64>>>,
    /// Dropout mask, one flag per block; `true` keeps the block active.
    pub mask: Vec<bool>,
}

impl TrainState {
    pub fn new(layout: &UnitLayout) -> Self {
        let num_blocks = layout.blocks.len();
        let num_sources = layout.num_sources();
        let per_cell =
            |fill: f64| -> Vec<Vec<f64>> {
                layout
                    .blocks
                    .iter()
                    .map(|b| vec![fill; b.num_cells()])
                    .collect()
            };
        let traces = || -> Vec<Vec<Vec<f64>>> {
            layout
                .blocks
                .iter()
                .map(|b| vec![vec![0.0; num_sources]; b.num_cells()])
                .collect()
        };

        TrainState {
            y: vec![0.0; layout.num_all],
            y_new: vec![0.0; layout.num_all],
            y_in: vec![1.0; num_blocks],
            y_out: vec![1.0; num_blocks],
            y_forget: vec![1.0; num_blocks],
            g: per_cell(0.0),
            h: per_cell(0.0),
            s: per_cell(0.0),
            si: traces(),
            sf: traces(),
            sc: traces(),
            mask: vec![true; num_blocks],
        }
    }

    /// Clears all recurrent state and traces at a sequence boundary. The
    /// dropout mask is reset to fully active; the trainer redraws it.
    pub fn reset_sequence(&mut self) {
        self.y.iter_mut().for_each(|v| *v = 0.0);
        self.y_new.iter_mut().for_each(|v| *v = 0.0);
        self.y_in.iter_mut().for_each(|v| *v = 1.0);
        self.y_out.iter_mut().for_each(|v| *v = 1.0);
        self.y_forget.iter_mut().for_each(|v| *v = 1.0);
        for block in [&mut self.g, &mut self.h, &mut self.s] {
            for cells in block.iter_mut() {
                cells.iter_mut().for_each(|v| *v = 0.0);
            }
        }
        for traces in [&mut self.si, &mut self.sf, &mut self.sc] {
            for block in traces.iter_mut() {
                for cell in block.iter_mut() {
                    cell.iter_mut().for_each(|v| *v = 0.0);
                }
            }
        }
        self.mask.iter_mut().for_each(|m| *m = true);
    }

    /// Makes the freshly computed activations the previous-step activations.
    pub fn commit_step(&mut self) {
        std::mem::swap(&mut self.y, &mut self.y_new);
    }

    /// Returns a description of the first non-finite activation or cell
    /// state, if any. A hit aborts the sequence as diverged.
    pub fn finite_fault(&self) -> Option<String> {
        for (i, &v) in self.y_new.iter().enumerate() {
            if !v.is_finite() {
                return Some(format!("activation of unit {} is {}", i, v));
            }
        }
        for (u, cells) in self.s.iter().enumerate() {
            for (v, &state) in cells.iter().enumerate() {
                if !state.is_finite() {
                    return Some(format!("cell state [{}][{}] is {}", u, v, state));
                }
            }
        }
        None
    }
}
