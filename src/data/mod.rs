pub mod batcher;
pub mod loader;
pub mod preprocessing;

use crate::error::{Error, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use batcher::BatchLoader;
pub use loader::{FileFormat, LoaderConfig, TabularDataset};
pub use preprocessing::{FeatureStats, FittedPreprocessor, MissingValueStrategy, Preprocessor};

/// Length of a TCGA patient barcode (`TCGA-XX-XXXX`)
pub const TCGA_PATIENT_PREFIX: usize = 12;

/// Samples-by-features expression values. Missing entries are NaN until
/// preprocessing imputes them.
#[derive(Debug, Clone, Default)]
pub struct ExpressionMatrix {
    /// Sample identifiers, one per row
    pub sample_ids: Vec<String>,
    /// Row-major values `[n_samples][n_features]`
    pub values: Vec<Vec<f32>>,
}

impl ExpressionMatrix {
    pub fn new(sample_ids: Vec<String>, values: Vec<Vec<f32>>) -> Result<Self> {
        if sample_ids.len() != values.len() {
            return Err(Error::shape("expression rows", sample_ids.len(), values.len()));
        }
        let width = values.first().map(Vec::len).unwrap_or_default();
        if let Some(row) = values.iter().find(|row| row.len() != width) {
            return Err(Error::shape("expression row width", width, row.len()));
        }
        Ok(Self { sample_ids, values })
    }

    pub fn n_samples(&self) -> usize {
        self.values.len()
    }

    pub fn n_features(&self) -> usize {
        self.values.first().map(Vec::len).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0 || self.n_features() == 0
    }

    /// Keep only the given columns, in the given order
    pub fn select_columns(&self, columns: &[usize]) -> Self {
        let values = self
            .values
            .iter()
            .map(|row| columns.iter().map(|&c| row[c]).collect())
            .collect();
        Self {
            sample_ids: self.sample_ids.clone(),
            values,
        }
    }

    /// Pack the given rows into a `[rows.len(), n_features]` tensor
    pub fn rows_to_tensor<B: Backend>(&self, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let width = self.n_features();
        let mut flat = Vec::with_capacity(rows.len() * width);
        for &row in rows {
            flat.extend_from_slice(&self.values[row]);
        }
        Tensor::from_data(TensorData::new(flat, [rows.len(), width]), device)
    }

    /// The whole matrix as one tensor
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let rows: Vec<usize> = (0..self.n_samples()).collect();
        self.rows_to_tensor(&rows, device)
    }
}

/// Per-sample and per-feature annotations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Column names; its length is the model input width
    pub feature_names: Vec<String>,
    /// Ground-truth subtype per sample, `None` when unknown
    pub subtypes: Vec<Option<String>>,
    /// How the values were prepared, for sources that preprocess
    #[serde(default)]
    pub preprocessing: Option<FittedPreprocessor>,
}

impl Metadata {
    /// Number of samples with a known subtype
    pub fn labelled(&self) -> usize {
        self.subtypes.iter().filter(|s| s.is_some()).count()
    }
}

/// Source of an expression matrix and its metadata
pub trait DatasetProvider {
    fn load(&self) -> Result<(ExpressionMatrix, Metadata)>;
}

/// Dataset already held in memory
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    pub matrix: ExpressionMatrix,
    pub metadata: Metadata,
}

impl InMemoryDataset {
    pub fn new(matrix: ExpressionMatrix, metadata: Metadata) -> Result<Self> {
        if metadata.feature_names.len() != matrix.n_features() {
            return Err(Error::shape(
                "feature names",
                matrix.n_features(),
                metadata.feature_names.len(),
            ));
        }
        if metadata.subtypes.len() != matrix.n_samples() {
            return Err(Error::shape(
                "subtype labels",
                matrix.n_samples(),
                metadata.subtypes.len(),
            ));
        }
        Ok(Self { matrix, metadata })
    }
}

impl DatasetProvider for InMemoryDataset {
    fn load(&self) -> Result<(ExpressionMatrix, Metadata)> {
        Ok((self.matrix.clone(), self.metadata.clone()))
    }
}

/// Known cohorts with conventional file locations under `data_dir`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cohort {
    #[default]
    Brca,
    Cptac,
    Custom,
}

impl std::str::FromStr for Cohort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brca" => Ok(Cohort::Brca),
            "cptac" | "cptac-3" => Ok(Cohort::Cptac),
            "custom" => Ok(Cohort::Custom),
            other => Err(format!("unknown cohort `{}` (expected brca, cptac or custom)", other)),
        }
    }
}

impl Cohort {
    fn directory(&self) -> Option<&'static str> {
        match self {
            Cohort::Brca => Some("BRCA"),
            Cohort::Cptac => Some("CPTAC-3"),
            Cohort::Custom => None,
        }
    }

    fn subtypes_file(&self) -> Option<&'static str> {
        match self {
            Cohort::Brca => Some("patient_subtype.tsv"),
            Cohort::Cptac | Cohort::Custom => None,
        }
    }
}

/// Where to find a cohort and how to prepare it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root of the cohort directories
    pub data_dir: PathBuf,
    pub cohort: Cohort,
    /// Overrides the cohort's expression file
    pub expression_path: Option<PathBuf>,
    /// Overrides the cohort's subtype file
    pub subtypes_path: Option<PathBuf>,
    /// Apply `ln(1 + x)` before anything else
    pub log_transform: bool,
    /// Scale every feature to [0, 1]
    pub min_max_scale: bool,
    /// Keep only the most variable features
    pub max_features: Option<usize>,
    pub missing: MissingValueStrategy,
    pub loader: LoaderConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cohort: Cohort::Brca,
            expression_path: None,
            subtypes_path: None,
            log_transform: true,
            min_max_scale: true,
            max_features: None,
            missing: MissingValueStrategy::Mean,
            loader: LoaderConfig::default(),
        }
    }
}

impl DataConfig {
    /// Expression matrix location
    pub fn expression_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.expression_path {
            return Ok(path.clone());
        }
        self.cohort
            .directory()
            .map(|dir| self.data_dir.join(dir).join("expression.tsv.gz"))
            .ok_or_else(|| Error::config("custom cohorts need an expression_path"))
    }

    /// Subtype table location, if the cohort has one
    pub fn subtypes_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.subtypes_path {
            return Some(path.clone());
        }
        match (self.cohort.directory(), self.cohort.subtypes_file()) {
            (Some(dir), Some(file)) => Some(self.data_dir.join(dir).join(file)),
            _ => None,
        }
    }

    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor {
            log_transform: self.log_transform,
            max_features: self.max_features,
            min_max_scale: self.min_max_scale,
            missing: self.missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let err = ExpressionMatrix::new(
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 2.0], vec![3.0]],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rows_to_tensor_keeps_order() {
        let device = Default::default();
        let matrix = ExpressionMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        )
        .unwrap();

        let tensor = matrix.rows_to_tensor::<TestBackend>(&[2, 0], &device);
        assert_eq!(tensor.dims(), [2, 2]);
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn test_in_memory_dataset_checks_metadata() {
        let matrix = ExpressionMatrix::new(vec!["a".into()], vec![vec![1.0, 2.0]]).unwrap();
        let metadata = Metadata {
            feature_names: vec!["G1".into()],
            subtypes: vec![None],
            preprocessing: None,
        };
        assert!(InMemoryDataset::new(matrix, metadata).is_err());
    }

    #[test]
    fn test_cohort_default_paths() {
        let config = DataConfig::default();
        assert_eq!(
            config.expression_file().unwrap(),
            PathBuf::from("data/BRCA/expression.tsv.gz")
        );
        assert_eq!(
            config.subtypes_file(),
            Some(PathBuf::from("data/BRCA/patient_subtype.tsv"))
        );

        let custom = DataConfig {
            cohort: Cohort::Custom,
            ..DataConfig::default()
        };
        assert!(custom.expression_file().is_err());
        assert!(custom.subtypes_file().is_none());
    }
}
