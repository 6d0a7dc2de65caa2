use std::collections::HashMap;

use ndarray::{Array1, Array2};

use crate::layout::UnitLayout;

/// Sentinel marking a missing entry inside an otherwise present target
/// vector. A step whose target is absent or entirely missing contributes no
/// output error but still drives the recurrent state and the traces.
pub const MISSING_TARGET: f64 = f64::NAN;

/// Input-region representation of one time step.
///
/// The kernel is written once, generically over this capability: a weighted
/// sum of the step's input values against one weight row, and a visit of the
/// nonzero input slots. The dense and sparse forms implement it each; both
/// must agree on the same nonzero support up to summation order.
pub trait InputRep {
    /// Σ over the external input units of `weights[target][unit] · value`.
    fn weighted_sum(&self, weights: &Array2<f64>, target: usize) -> f64;

    /// Visit `(input_slot, value)` for every nonzero external input.
    fn for_each_nonzero(&self, f: &mut dyn FnMut(usize, f64));
}

/// Dense per-step input vector, aligned to the fixed feature ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseInput(pub Vec<f64>);

impl InputRep for DenseInput {
    fn weighted_sum(&self, weights: &Array2<f64>, target: usize) -> f64 {
        self.0
            .iter()
            .enumerate()
            .map(|(j, &x)| weights[[target, j]] * x)
            .sum()
    }

    fn for_each_nonzero(&self, f: &mut dyn FnMut(usize, f64)) {
        for (j, &x) in self.0.iter().enumerate() {
            if x != 0.0 {
                f(j, x);
            }
        }
    }
}

/// Sparse `(input index, value)` list over the input region.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseInput(pub Vec<(usize, f64)>);

impl InputRep for SparseInput {
    fn weighted_sum(&self, weights: &Array2<f64>, target: usize) -> f64 {
        self.0
            .iter()
            .map(|&(j, x)| weights[[target, j]] * x)
            .sum()
    }

    fn for_each_nonzero(&self, f: &mut dyn FnMut(usize, f64)) {
        for &(j, x) in &self.0 {
            if x != 0.0 {
                f(j, x);
            }
        }
    }
}

/// One time step: an input and an optional target vector.
#[derive(Debug, Clone)]
pub struct TimeStep<I> {
    pub input: I,
    pub target: Option<Array1<f64>>,
}

impl<I> TimeStep<I> {
    pub fn new(input: I, target: Option<Array1<f64>>) -> Self {
        TimeStep { input, target }
    }

    /// Whether this step carries at least one non-missing target entry.
    pub fn has_target(&self) -> bool {
        self.target
            .as_ref()
            .map_or(false, |t| t.iter().any(|v| !v.is_nan()))
    }
}

/// An ordered list of time steps. Step order within a sequence is strict;
/// recurrent state and traces are reset at sequence boundaries.
#[derive(Debug, Clone)]
pub struct Sequence<I> {
    pub steps: Vec<TimeStep<I>>,
}

impl<I> Sequence<I> {
    pub fn new(steps: Vec<TimeStep<I>>) -> Self {
        Sequence { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Converts domain sequences (time-indexed feature maps) into numeric steps
/// aligned to a fixed feature ordering, and encodes targets.
pub struct SequenceEncoder {
    feature_index: HashMap<String, usize>,
    num_features: usize,
}

impl SequenceEncoder {
    pub fn new(features: &[&str]) -> Self {
        let feature_index = features
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        SequenceEncoder {
            feature_index,
            num_features: features.len(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Dense vector for one step; absent features become 0.0.
    pub fn encode_dense(&self, values: &HashMap<String, f64>) -> DenseInput {
        let mut out = vec![0.0; self.num_features];
        for (name, &value) in values {
            if let Some(&idx) = self.feature_index.get(name) {
                out[idx] = value;
            }
        }
        DenseInput(out)
    }

    /// Sparse list for one step; only features present in the map appear,
    /// ordered by feature index.
    pub fn encode_sparse(&self, values: &HashMap<String, f64>) -> SparseInput {
        let mut pairs: Vec<(usize, f64)> = values
            .iter()
            .filter_map(|(name, &value)| self.feature_index.get(name).map(|&idx| (idx, value)))
            .collect();
        pairs.sort_by_key(|&(idx, _)| idx);
        SparseInput(pairs)
    }

    /// A scalar outcome as a one-element target vector.
    pub fn target_scalar(value: f64) -> Array1<f64> {
        Array1::from_elem(1, value)
    }

    /// A class label as a one-hot vector over `num_classes` outputs.
    pub fn target_one_hot(class: usize, num_classes: usize) -> Array1<f64> {
        let mut t = Array1::zeros(num_classes);
        t[class] = 1.0;
        t
    }

    /// A target vector with every entry missing; the step keeps updating the
    /// recurrent state but produces no output error.
    pub fn target_missing(num_outputs: usize) -> Array1<f64> {
        Array1::from_elem(num_outputs, MISSING_TARGET)
    }
}

/// Visits every source slot of the layout with its value for the current
/// step: the nonzero external inputs, the bias slot (1.0), and the previous
/// activations of every hidden and cell unit. This is the `x_old` the trace
/// recurrences and the gate/hidden deltas consume.
pub fn for_each_source<I: InputRep>(
    input: &I,
    layout: &UnitLayout,
    activations: &[f64],
    f: &mut dyn FnMut(usize, f64),
) {
    input.for_each_nonzero(f);
    if let Some(bias) = layout.bias {
        f(bias, 1.0);
    }
    for slot in layout.recurrent_slots() {
        let y = activations[layout.source_unit(slot)];
        if y != 0.0 {
            f(slot, y);
        }
    }
}
