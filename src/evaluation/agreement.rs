//! Agreement between a ground-truth labelling and a clustering.
//!
//! All scores are computed from one contingency table and follow the usual
//! definitions (natural-log entropies, arithmetic NMI normalization).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sorted-unique labels and the dense index of each
#[derive(Debug, Clone)]
pub struct LabelMapping<T: Ord + Clone> {
    labels: Vec<T>,
    index: BTreeMap<T, usize>,
}

impl<T: Ord + Clone> LabelMapping<T> {
    /// Build the mapping and encode `values` through it
    pub fn encode(values: &[T]) -> (Self, Vec<usize>) {
        let mut labels: Vec<T> = values.to_vec();
        labels.sort();
        labels.dedup();
        let index: BTreeMap<T, usize> = labels
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, label)| (label, i))
            .collect();
        let encoded = values.iter().map(|v| index[v]).collect();
        (Self { labels, index }, encoded)
    }

    pub fn labels(&self) -> &[T] {
        &self.labels
    }

    pub fn index_of(&self, label: &T) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Confusion matrix with rows ordered by `true_labels` and columns by
/// `predicted_labels`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_labels: Vec<String>,
    pub predicted_labels: Vec<usize>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn shape(&self) -> [usize; 2] {
        [self.true_labels.len(), self.predicted_labels.len()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn row_sums(&self) -> Vec<usize> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    fn col_sums(&self) -> Vec<usize> {
        (0..self.predicted_labels.len())
            .map(|j| self.counts.iter().map(|row| row[j]).sum())
            .collect()
    }
}

/// Build the confusion matrix of paired labels
pub fn confusion_matrix(truth: &[String], predicted: &[usize]) -> Result<ConfusionMatrix> {
    if truth.len() != predicted.len() {
        return Err(Error::shape("predicted labels", truth.len(), predicted.len()));
    }

    let (true_mapping, true_encoded) = LabelMapping::encode(truth);
    let (pred_mapping, pred_encoded) = LabelMapping::encode(predicted);

    let mut counts = vec![vec![0usize; pred_mapping.len()]; true_mapping.len()];
    for (&t, &p) in true_encoded.iter().zip(&pred_encoded) {
        counts[t][p] += 1;
    }

    Ok(ConfusionMatrix {
        true_labels: true_mapping.labels().to_vec(),
        predicted_labels: pred_mapping.labels().to_vec(),
        counts,
    })
}

/// Agreement scores between subtypes and clusters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgreementScores {
    pub adjusted_rand_index: f64,
    pub normalized_mutual_info: f64,
    pub fowlkes_mallows: f64,
    pub homogeneity: f64,
    pub completeness: f64,
    pub v_measure: f64,
}

fn comb2(n: usize) -> f64 {
    let n = n as f64;
    n * (n - 1.0) / 2.0
}

fn entropy(sums: &[usize], n: usize) -> f64 {
    let n = n as f64;
    sums.iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Adjusted Rand index
pub fn adjusted_rand_index(table: &ConfusionMatrix) -> Result<f64> {
    let n = table.total();
    let sum_comb: f64 = table.counts.iter().flatten().map(|&c| comb2(c)).sum();
    let sum_a: f64 = table.row_sums().into_iter().map(comb2).sum();
    let sum_b: f64 = table.col_sums().into_iter().map(comb2).sum();

    let total_pairs = comb2(n);
    if total_pairs == 0.0 {
        return Err(Error::degenerate(
            "adjusted_rand_index",
            "fewer than two samples",
        ));
    }
    let expected = sum_a * sum_b / total_pairs;
    let max_index = (sum_a + sum_b) / 2.0;
    let denominator = max_index - expected;
    if denominator == 0.0 {
        return Err(Error::degenerate(
            "adjusted_rand_index",
            "expected and maximum index coincide",
        ));
    }

    Ok((sum_comb - expected) / denominator)
}

/// Mutual information in nats, clamped at zero
pub fn mutual_information(table: &ConfusionMatrix) -> f64 {
    let n = table.total() as f64;
    let rows = table.row_sums();
    let cols = table.col_sums();

    let mut mi = 0.0;
    for (i, row) in table.counts.iter().enumerate() {
        for (j, &c) in row.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let c = c as f64;
            mi += c / n * (n * c / (rows[i] as f64 * cols[j] as f64)).ln();
        }
    }
    mi.max(0.0)
}

/// Normalized mutual information with arithmetic-mean normalization
pub fn normalized_mutual_info(table: &ConfusionMatrix) -> f64 {
    let n = table.total();
    let h_true = entropy(&table.row_sums(), n);
    let h_pred = entropy(&table.col_sums(), n);
    if h_true == 0.0 && h_pred == 0.0 {
        return 1.0;
    }
    let normalizer = (h_true + h_pred) / 2.0;
    mutual_information(table) / normalizer
}

/// Fowlkes-Mallows index
pub fn fowlkes_mallows(table: &ConfusionMatrix) -> f64 {
    let n = table.total() as f64;
    let tk: f64 = table.counts.iter().flatten().map(|&c| (c * c) as f64).sum::<f64>() - n;
    let pk: f64 = table.col_sums().iter().map(|&c| (c * c) as f64).sum::<f64>() - n;
    let qk: f64 = table.row_sums().iter().map(|&c| (c * c) as f64).sum::<f64>() - n;

    if tk == 0.0 {
        0.0
    } else {
        (tk / pk).sqrt() * (tk / qk).sqrt()
    }
}

/// Homogeneity, completeness and their harmonic mean
pub fn homogeneity_completeness_v_measure(table: &ConfusionMatrix) -> (f64, f64, f64) {
    let n = table.total();
    let h_true = entropy(&table.row_sums(), n);
    let h_pred = entropy(&table.col_sums(), n);
    let mi = mutual_information(table);

    let homogeneity = if h_true == 0.0 { 1.0 } else { mi / h_true };
    let completeness = if h_pred == 0.0 { 1.0 } else { mi / h_pred };
    let v_measure = if homogeneity + completeness == 0.0 {
        0.0
    } else {
        2.0 * homogeneity * completeness / (homogeneity + completeness)
    };

    (homogeneity, completeness, v_measure)
}

/// Confusion matrix and every agreement score.
///
/// Fails when there is nothing to compare or the ground truth has a single
/// class, since the scores carry no information then.
pub fn score_agreement(
    truth: &[String],
    predicted: &[usize],
) -> Result<(ConfusionMatrix, AgreementScores)> {
    if truth.is_empty() {
        return Err(Error::degenerate(
            "agreement",
            "no sample has a known subtype",
        ));
    }

    let table = confusion_matrix(truth, predicted)?;
    if table.true_labels.len() < 2 {
        return Err(Error::degenerate(
            "agreement",
            format!(
                "ground truth has a single class ({})",
                table.true_labels.join(", ")
            ),
        ));
    }

    let adjusted_rand_index = adjusted_rand_index(&table)?;
    let (homogeneity, completeness, v_measure) = homogeneity_completeness_v_measure(&table);
    let scores = AgreementScores {
        adjusted_rand_index,
        normalized_mutual_info: normalized_mutual_info(&table),
        fowlkes_mallows: fowlkes_mallows(&table),
        homogeneity,
        completeness,
        v_measure,
    };

    Ok((table, scores))
}
