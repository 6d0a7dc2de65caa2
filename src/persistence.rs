use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array2, Dimension};
use serde::{Deserialize, Serialize};

use crate::config::NetworkOptions;
use crate::error::PersistenceError;
use crate::layout::UnitLayout;
use crate::network::LSTMNetwork;

/// Writes the weight matrix as plain text: one line per row, space-separated
/// values, no header. The file carries no shape information beyond the row
/// length; loading requires the layout derived from the same hyperparameters.
pub fn save_weights_text<P: AsRef<Path>>(
    weights: &Array2<f64>,
    path: P,
) -> Result<(), PersistenceError> {
    let mut file = BufWriter::new(File::create(path)?);
    for row in weights.rows() {
        let line = row
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(file, "{}", line)?;
    }
    file.flush()?;
    Ok(())
}

/// Reads a plain-text weight matrix and validates it against the layout.
pub fn load_weights_text<P: AsRef<Path>>(
    path: P,
    layout: &UnitLayout,
) -> Result<Array2<f64>, PersistenceError> {
    let file = BufReader::new(File::open(path)?);
    let n = layout.num_all;
    let mut weights = Array2::zeros((n, n));
    let mut rows = 0usize;

    for (i, line) in file.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if rows >= n {
            return Err(PersistenceError::Malformed(format!(
                "more than {} rows in weight file",
                n
            )));
        }
        let mut cols = 0usize;
        for (j, token) in line.split_whitespace().enumerate() {
            if cols >= n {
                return Err(PersistenceError::Malformed(format!(
                    "row {} has more than {} values",
                    i, n
                )));
            }
            let value: f64 = token.parse().map_err(|_| {
                PersistenceError::Malformed(format!(
                    "row {}, column {}: unparsable value '{}'",
                    i, j, token
                ))
            })?;
            weights[[rows, j]] = value;
            cols += 1;
        }
        if cols != n {
            return Err(PersistenceError::Malformed(format!(
                "row {} has {} values, layout requires {}",
                i, cols, n
            )));
        }
        rows += 1;
    }

    if rows != n {
        return Err(PersistenceError::Malformed(format!(
            "weight file has {} rows, layout requires {}",
            rows, n
        )));
    }
    Ok(weights)
}

/// Serializable form of the weight matrix.
#[derive(Serialize, Deserialize)]
struct SerializableMatrix {
    data: Vec<f64>,
    shape: (usize, usize),
}

impl From<&Array2<f64>> for SerializableMatrix {
    fn from(array: &Array2<f64>) -> Self {
        Self {
            data: array.iter().cloned().collect(),
            shape: array.raw_dim().into_pattern(),
        }
    }
}

impl SerializableMatrix {
    fn into_matrix(self) -> Result<Array2<f64>, PersistenceError> {
        Array2::from_shape_vec(self.shape, self.data)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))
    }
}

/// Model metadata for tracking training information.
#[derive(Serialize, Deserialize, Clone)]
pub struct ModelMetadata {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub num_units: usize,
    pub total_epochs: usize,
    pub final_error: Option<f64>,
    pub description: Option<String>,
}

impl ModelMetadata {
    pub fn new(model_name: String, network: &LSTMNetwork) -> Self {
        ModelMetadata {
            model_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            num_units: network.num_units(),
            total_epochs: 0,
            final_error: None,
            description: None,
        }
    }
}

/// Complete saved model: the hyperparameters the layout is derived from,
/// the weight matrix, and metadata.
#[derive(Serialize, Deserialize)]
pub struct SavedModel {
    options: NetworkOptions,
    weights: SerializableMatrix,
    pub metadata: ModelMetadata,
}

impl SavedModel {
    pub fn new(network: &LSTMNetwork, metadata: ModelMetadata) -> Self {
        SavedModel {
            options: network.options.clone(),
            weights: (&network.weights).into(),
            metadata,
        }
    }

    pub fn into_network(self) -> Result<LSTMNetwork, PersistenceError> {
        let weights = self.weights.into_matrix()?;
        LSTMNetwork::from_weights(self.options, weights)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))
    }
}

/// Model persistence operations: JSON (human-readable) or bincode (compact),
/// selected by file extension, binary by default.
pub struct ModelPersistence;

impl ModelPersistence {
    pub fn save_to_json<P: AsRef<Path>>(
        model: &SavedModel,
        path: P,
    ) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(model)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<SavedModel, PersistenceError> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_to_binary<P: AsRef<Path>>(
        model: &SavedModel,
        path: P,
    ) -> Result<(), PersistenceError> {
        let encoded = bincode::serialize(model)?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    pub fn load_from_binary<P: AsRef<Path>>(path: P) -> Result<SavedModel, PersistenceError> {
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        Ok(bincode::deserialize(&contents)?)
    }
}

/// Convenience trait for saving/loading a network with metadata.
pub trait PersistentModel {
    fn save<P: AsRef<Path>>(&self, path: P, metadata: ModelMetadata)
        -> Result<(), PersistenceError>;

    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, ModelMetadata), PersistenceError>
    where
        Self: Sized;
}

impl PersistentModel for LSTMNetwork {
    fn save<P: AsRef<Path>>(
        &self,
        path: P,
        metadata: ModelMetadata,
    ) -> Result<(), PersistenceError> {
        let saved = SavedModel::new(self, metadata);
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => ModelPersistence::save_to_json(&saved, path),
            _ => ModelPersistence::save_to_binary(&saved, path),
        }
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, ModelMetadata), PersistenceError> {
        let saved = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => ModelPersistence::load_from_json(path)?,
            _ => ModelPersistence::load_from_binary(path)?,
        };
        let metadata = saved.metadata.clone();
        Ok((saved.into_network()?, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        let options = NetworkOptions::new(2, 1, 1, 1, 1);
        let network = LSTMNetwork::new(options, 11).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");

        save_weights_text(&network.weights, &path).unwrap();
        let loaded = load_weights_text(&path, &network.layout).unwrap();
        assert_eq!(loaded, network.weights);
    }

    #[test]
    fn test_text_shape_mismatch_rejected() {
        let small = NetworkOptions::new(1, 0, 1, 1, 1);
        let network = LSTMNetwork::new(small, 11).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");
        save_weights_text(&network.weights, &path).unwrap();

        let bigger = UnitLayout::new(&NetworkOptions::new(2, 1, 1, 1, 1)).unwrap();
        let err = load_weights_text(&path, &bigger).unwrap_err();
        assert!(matches!(err, PersistenceError::Malformed(_)));
    }

    #[test]
    fn test_text_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");
        std::fs::write(&path, "0.5 not-a-number\n").unwrap();
        let layout = UnitLayout::new(&NetworkOptions::new(1, 0, 1, 1, 1)).unwrap();
        assert!(matches!(
            load_weights_text(&path, &layout),
            Err(PersistenceError::Malformed(_))
        ));
    }
}
