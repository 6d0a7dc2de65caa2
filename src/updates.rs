use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// When accumulated deltas are folded into the live weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Apply after every time step.
    Online,
    /// Apply after every n-th training sequence.
    MiniBatch(usize),
}

/// Folds pending deltas into the weights: `W += DW; DW *= momentum`.
///
/// The same apply is used by the online, mini-batch, and parallel paths;
/// only the call site differs.
pub fn apply(weights: &mut Array2<f64>, deltas: &mut Array2<f64>, momentum: f64) {
    *weights += &*deltas;
    deltas.mapv_inplace(|d| d * momentum);
}
