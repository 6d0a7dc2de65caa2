use thiserror::Error;

/// Errors surfaced by network construction, training, and the genetic refiner.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Malformed hyperparameters, rejected before any matrix allocation.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A non-finite weight, activation, or cell state appeared mid-sequence.
    /// The offending sequence and step are identified for diagnosis.
    #[error("training diverged at sequence {sequence}, step {step}: {detail}")]
    Diverged {
        sequence: usize,
        step: usize,
        detail: String,
    },

    /// One or more worker threads failed; the remaining pool work was
    /// cancelled and the failures aggregated here.
    #[error("{} worker thread(s) failed: {}", .0.len(), .0.join("; "))]
    Workers(Vec<String>),

    /// Checkpoint or model file I/O failed during training.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] PersistenceError),
}

impl TrainError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        TrainError::Configuration(msg.into())
    }
}

/// Errors from saving or loading weight matrices and models.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A weight file whose shape or contents do not match the layout.
    #[error("malformed weight file: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(error: serde_json::Error) -> Self {
        PersistenceError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(error: bincode::Error) -> Self {
        PersistenceError::Serialization(error.to_string())
    }
}
