use std::ops::Range;

use ndarray::Array2;

use crate::config::NetworkOptions;
use crate::error::TrainError;

/// Unit indices belonging to one memory block: the optional gate units
/// followed by the block's cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUnits {
    pub input_gate: Option<usize>,
    pub output_gate: Option<usize>,
    pub forget_gate: Option<usize>,
    pub cells: Range<usize>,
}

impl BlockUnits {
    pub fn num_cells(&self) -> usize {
        self.cells.end - self.cells.start
    }
}

/// Partition of the flat unit index space.
///
/// Region order is fixed: external inputs, the optional bias unit closing the
/// input region, hidden units, then per memory block the enabled gate units
/// followed by that block's cells, and finally the output units. Every other
/// structure in the crate is sized from `num_all`, and the boundaries are
/// computed once per network instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLayout {
    pub num_inputs: usize,
    pub bias: Option<usize>,
    pub hidden: Range<usize>,
    pub blocks: Vec<BlockUnits>,
    pub outputs: Range<usize>,
    pub num_all: usize,
    /// Unit indices feeding hidden/gate/cell weighted sums: the input region
    /// (bias included), the hidden units, and every cell unit. Gate and
    /// output units are not sources.
    sources: Vec<usize>,
    num_input_slots: usize,
}

impl UnitLayout {
    /// Derives the layout from the hyperparameters, failing fast on a
    /// malformed configuration before anything is allocated.
    pub fn new(options: &NetworkOptions) -> Result<UnitLayout, TrainError> {
        options.validate()?;

        let mut next = options.num_inputs;
        let bias = options.bias.then(|| {
            let idx = next;
            next += 1;
            idx
        });

        let hidden = next..next + options.num_hidden;
        next = hidden.end;

        let mut blocks = Vec::with_capacity(options.block_sizes.len());
        for &size in &options.block_sizes {
            let mut take = || {
                let idx = next;
                next += 1;
                idx
            };
            let input_gate = options.input_gate.then(&mut take);
            let output_gate = options.output_gate.then(&mut take);
            let forget_gate = options.forget_gate.then(&mut take);
            let cells = next..next + size;
            next = cells.end;
            blocks.push(BlockUnits {
                input_gate,
                output_gate,
                forget_gate,
                cells,
            });
        }

        let outputs = next..next + options.num_outputs;
        let num_all = outputs.end;

        let num_input_slots = options.num_inputs + bias.is_some() as usize;
        let mut sources: Vec<usize> = (0..num_input_slots).collect();
        sources.extend(hidden.clone());
        for block in &blocks {
            sources.extend(block.cells.clone());
        }

        Ok(UnitLayout {
            num_inputs: options.num_inputs,
            bias,
            hidden,
            blocks,
            outputs,
            num_all,
            sources,
            num_input_slots,
        })
    }

    /// External input units, bias excluded.
    pub fn inputs(&self) -> Range<usize> {
        0..self.num_inputs
    }

    /// Total source slots (`numInpHidCells`), the eligibility-trace width.
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Source slots covering the input region, bias included.
    pub fn input_slots(&self) -> Range<usize> {
        0..self.num_input_slots
    }

    /// Source slots covering the hidden and cell units; also the exact unit
    /// set output units read from.
    pub fn recurrent_slots(&self) -> Range<usize> {
        self.num_input_slots..self.sources.len()
    }

    /// Unit index behind a source slot.
    pub fn source_unit(&self, slot: usize) -> usize {
        self.sources[slot]
    }

    pub fn source_units(&self) -> &[usize] {
        &self.sources
    }

    /// Index check other components run before touching a foreign matrix.
    pub fn check_matrix(&self, weights: &Array2<f64>) -> Result<(), TrainError> {
        if weights.shape() != [self.num_all, self.num_all] {
            return Err(TrainError::Configuration(format!(
                "weight matrix is {:?}, layout requires {}x{}",
                weights.shape(),
                self.num_all,
                self.num_all
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> NetworkOptions {
        NetworkOptions::new(3, 2, 2, 2, 4)
    }

    #[test]
    fn test_region_order_and_total() {
        let layout = UnitLayout::new(&options()).unwrap();

        assert_eq!(layout.inputs(), 0..3);
        assert_eq!(layout.bias, Some(3));
        assert_eq!(layout.hidden, 4..6);
        // Per block: 3 gates + 2 cells.
        assert_eq!(layout.blocks[0].input_gate, Some(6));
        assert_eq!(layout.blocks[0].output_gate, Some(7));
        assert_eq!(layout.blocks[0].forget_gate, Some(8));
        assert_eq!(layout.blocks[0].cells, 9..11);
        assert_eq!(layout.blocks[1].cells, 14..16);
        assert_eq!(layout.outputs, 16..20);
        assert_eq!(layout.num_all, 20);
    }

    #[test]
    fn test_sources_are_inputs_hidden_cells() {
        let layout = UnitLayout::new(&options()).unwrap();

        // 3 inputs + bias + 2 hidden + 4 cells.
        assert_eq!(layout.num_sources(), 10);
        assert_eq!(layout.input_slots(), 0..4);
        let units: Vec<usize> = layout.source_units().to_vec();
        assert_eq!(units, vec![0, 1, 2, 3, 4, 5, 9, 10, 14, 15]);
    }

    #[test]
    fn test_gates_disabled_shrink_blocks() {
        let mut opts = options();
        opts.input_gate = false;
        opts.forget_gate = false;
        opts.bias = false;
        let layout = UnitLayout::new(&opts).unwrap();

        assert_eq!(layout.bias, None);
        assert_eq!(layout.blocks[0].input_gate, None);
        assert_eq!(layout.blocks[0].forget_gate, None);
        assert_eq!(layout.blocks[0].output_gate, Some(5));
        assert_eq!(layout.blocks[0].cells, 6..8);
        assert_eq!(layout.num_all, 3 + 2 + 2 * 3 + 4);
    }

    #[test]
    fn test_ragged_block_sizes() {
        let mut opts = options();
        opts.block_sizes = vec![1, 3];
        let layout = UnitLayout::new(&opts).unwrap();

        assert_eq!(layout.blocks[0].num_cells(), 1);
        assert_eq!(layout.blocks[1].num_cells(), 3);
        assert_eq!(layout.num_sources(), 4 + 2 + 4);
    }

    #[test]
    fn test_malformed_options_fail_before_allocation() {
        let mut opts = options();
        opts.block_sizes.clear();
        assert!(matches!(UnitLayout::new(&opts), Err(TrainError::Configuration(_))));
    }

    #[test]
    fn test_matrix_shape_check() {
        let layout = UnitLayout::new(&options()).unwrap();
        let wrong = Array2::zeros((layout.num_all, layout.num_all - 1));
        assert!(layout.check_matrix(&wrong).is_err());
        let right = Array2::zeros((layout.num_all, layout.num_all));
        assert!(layout.check_matrix(&right).is_ok());
    }
}
