use crate::data::ExpressionMatrix;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

/// Missing value handling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingValueStrategy {
    /// Use mean imputation
    #[default]
    Mean,
    /// Use median imputation
    Median,
    /// Use zero imputation
    Zero,
}

/// Per-gene statistics over the observed (non-NaN) values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub means: Vec<f32>,
    /// Population variance
    pub variances: Vec<f32>,
    pub medians: Vec<f32>,
    pub mins: Vec<f32>,
    pub maxs: Vec<f32>,
    /// Number of observed values
    pub counts: Vec<usize>,
}

impl FeatureStats {
    /// Compute statistics column by column
    pub fn compute(matrix: &ExpressionMatrix) -> Self {
        let n_features = matrix.n_features();
        let mut stats = Self {
            means: vec![0.0; n_features],
            variances: vec![0.0; n_features],
            medians: vec![0.0; n_features],
            mins: vec![0.0; n_features],
            maxs: vec![0.0; n_features],
            counts: vec![0; n_features],
        };

        for i in 0..n_features {
            let mut values: Vec<f32> = matrix
                .values
                .iter()
                .map(|row| row[i])
                .filter(|v| !v.is_nan())
                .collect();
            if values.is_empty() {
                continue;
            }

            let n = values.len() as f32;
            let mean = values.iter().sum::<f32>() / n;
            let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;

            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = values.len() / 2;
            let median = if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            };

            stats.means[i] = mean;
            stats.variances[i] = variance;
            stats.medians[i] = median;
            stats.mins[i] = values[0];
            stats.maxs[i] = values[values.len() - 1];
            stats.counts[i] = values.len();
        }

        stats
    }

    /// Statistics of the given columns, in that order
    pub fn select(&self, columns: &[usize]) -> Self {
        let pick = |values: &[f32]| columns.iter().map(|&i| values[i]).collect::<Vec<f32>>();
        Self {
            means: pick(&self.means),
            variances: pick(&self.variances),
            medians: pick(&self.medians),
            mins: pick(&self.mins),
            maxs: pick(&self.maxs),
            counts: columns.iter().map(|&i| self.counts[i]).collect(),
        }
    }

    pub fn n_features(&self) -> usize {
        self.mins.len()
    }

    /// Replacement value for a missing entry of feature `i`
    pub fn fill_value(&self, i: usize, strategy: MissingValueStrategy) -> f32 {
        match strategy {
            MissingValueStrategy::Mean => self.means[i],
            MissingValueStrategy::Median => self.medians[i],
            MissingValueStrategy::Zero => 0.0,
        }
    }

    /// Indices of the `k` most variable features, in their original order
    pub fn top_variance(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.variances.len()).collect();
        order.sort_by(|&a, &b| {
            self.variances[b]
                .partial_cmp(&self.variances[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        order.truncate(k);
        order.sort_unstable();
        order
    }

    /// Scale a value of feature `i` to [0, 1]. Constant features map to 0.
    pub fn min_max(&self, i: usize, value: f32) -> f32 {
        let range = self.maxs[i] - self.mins[i];
        if range <= f32::EPSILON {
            0.0
        } else {
            ((value - self.mins[i]) / range).clamp(0.0, 1.0)
        }
    }
}

/// Expression preprocessing pipeline: log1p, imputation, variance
/// selection, min-max scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub log_transform: bool,
    pub max_features: Option<usize>,
    pub min_max_scale: bool,
    pub missing: MissingValueStrategy,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            log_transform: true,
            max_features: None,
            min_max_scale: true,
            missing: MissingValueStrategy::Mean,
        }
    }
}

impl Preprocessor {
    /// Fit the pipeline on `matrix` and transform it.
    ///
    /// Returns the transformed matrix, the surviving feature names and the
    /// fitted statistics of those features: imputation values from the
    /// observed entries, scaling bounds from the imputed ones.
    pub fn apply(
        &self,
        mut matrix: ExpressionMatrix,
        feature_names: Vec<String>,
    ) -> Result<(ExpressionMatrix, Vec<String>, FeatureStats)> {
        if feature_names.len() != matrix.n_features() {
            return Err(Error::shape(
                "feature names",
                matrix.n_features(),
                feature_names.len(),
            ));
        }

        if self.log_transform {
            debug!("Applying log1p");
            log1p(&mut matrix);
        }

        let observed = FeatureStats::compute(&matrix);
        let imputed = impute(&mut matrix, &observed, self.missing);
        if imputed > 0 {
            info!("Imputed {} missing values ({:?})", imputed, self.missing);
        }

        let keep: Vec<usize> = match self.max_features {
            Some(0) => return Err(Error::config("max_features must be positive")),
            Some(k) if k < matrix.n_features() => {
                info!("Keeping {} most variable of {} genes", k, matrix.n_features());
                FeatureStats::compute(&matrix).top_variance(k)
            }
            _ => (0..matrix.n_features()).collect(),
        };
        let (mut matrix, feature_names) = if keep.len() < matrix.n_features() {
            let names = keep.iter().map(|&i| feature_names[i].clone()).collect();
            (matrix.select_columns(&keep), names)
        } else {
            (matrix, feature_names)
        };

        let mut stats = FeatureStats::compute(&matrix);
        let observed = observed.select(&keep);
        stats.means = observed.means;
        stats.medians = observed.medians;

        if self.min_max_scale {
            scale(&mut matrix, &stats);
        }

        Ok((matrix, feature_names, stats))
    }

    /// Transform `matrix` with statistics fitted by [`Preprocessor::apply`].
    ///
    /// Columns must already be in the fitted feature order (see
    /// [`align_features`]). Nothing is refitted, so a single sample is
    /// scaled exactly as it would have been inside the training cohort.
    pub fn transform_with(
        &self,
        mut matrix: ExpressionMatrix,
        stats: &FeatureStats,
    ) -> Result<ExpressionMatrix> {
        if matrix.n_features() != stats.n_features() {
            return Err(Error::shape(
                "fitted preprocessing",
                stats.n_features(),
                matrix.n_features(),
            ));
        }

        if self.log_transform {
            log1p(&mut matrix);
        }
        impute(&mut matrix, stats, self.missing);
        if self.min_max_scale {
            scale(&mut matrix, stats);
        }
        Ok(matrix)
    }
}

/// A preprocessor together with the statistics it was fitted with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    pub preprocessor: Preprocessor,
    pub stats: FeatureStats,
}

impl FittedPreprocessor {
    pub fn transform(&self, matrix: ExpressionMatrix) -> Result<ExpressionMatrix> {
        self.preprocessor.transform_with(matrix, &self.stats)
    }
}

fn log1p(matrix: &mut ExpressionMatrix) {
    for value in matrix.values.iter_mut().flatten() {
        if !value.is_nan() {
            *value = value.max(0.0).ln_1p();
        }
    }
}

fn impute(matrix: &mut ExpressionMatrix, stats: &FeatureStats, strategy: MissingValueStrategy) -> usize {
    let mut imputed = 0usize;
    for row in matrix.values.iter_mut() {
        for (i, value) in row.iter_mut().enumerate() {
            if value.is_nan() {
                *value = stats.fill_value(i, strategy);
                imputed += 1;
            }
        }
    }
    imputed
}

fn scale(matrix: &mut ExpressionMatrix, stats: &FeatureStats) {
    for row in matrix.values.iter_mut() {
        for (i, value) in row.iter_mut().enumerate() {
            *value = stats.min_max(i, *value);
        }
    }
}

/// Reorder columns to match `target` gene names.
///
/// Fails with `ShapeMismatch` when any target gene is absent.
pub fn align_features(
    matrix: &ExpressionMatrix,
    feature_names: &[String],
    target: &[String],
) -> Result<ExpressionMatrix> {
    let index: HashMap<&str, usize> = feature_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let columns: Vec<usize> = target
        .iter()
        .filter_map(|name| index.get(name.as_str()).copied())
        .collect();
    if columns.len() != target.len() {
        return Err(Error::shape("aligned genes", target.len(), columns.len()));
    }

    Ok(matrix.select_columns(&columns))
}
