use crate::error::{Error, Result};
use std::collections::BTreeMap;

pub(crate) fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Mean silhouette coefficient over all samples (Euclidean distance).
///
/// Samples alone in their cluster score 0. Requires between 2 and
/// `n_samples - 1` distinct labels.
pub fn silhouette_score(data: &[Vec<f32>], labels: &[usize]) -> Result<f64> {
    if data.len() != labels.len() {
        return Err(Error::shape("silhouette labels", data.len(), labels.len()));
    }

    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in labels {
        *sizes.entry(label).or_default() += 1;
    }
    let n = data.len();
    if sizes.len() < 2 || sizes.len() >= n {
        return Err(Error::degenerate(
            "silhouette",
            format!(
                "{} distinct labels for {} samples (need 2 to n - 1)",
                sizes.len(),
                n
            ),
        ));
    }

    let clusters: Vec<usize> = sizes.keys().copied().collect();
    let position: BTreeMap<usize, usize> =
        clusters.iter().enumerate().map(|(i, &c)| (c, i)).collect();

    let mut total = 0.0;
    for i in 0..n {
        let mut sums = vec![0.0f64; clusters.len()];
        for j in 0..n {
            if i != j {
                sums[position[&labels[j]]] += euclidean(&data[i], &data[j]);
            }
        }

        let own = position[&labels[i]];
        let own_size = sizes[&labels[i]];
        if own_size == 1 {
            continue;
        }
        let a = sums[own] / (own_size - 1) as f64;
        let b = clusters
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != own)
            .map(|(k, c)| sums[k] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denominator = a.max(b);
        if denominator > 0.0 {
            total += (b - a) / denominator;
        }
    }

    Ok(total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_separated_clusters_score_high() {
        let data = vec![
            vec![0.0, 0.0],
            vec![0.0, 0.1],
            vec![10.0, 10.0],
            vec![10.0, 10.1],
        ];
        let score = silhouette_score(&data, &[0, 0, 1, 1]).unwrap();
        assert!(score > 0.95);
    }

    #[test]
    fn test_known_value_on_a_line() {
        // points 0, 1, 4, 5 split as {0,1} and {4,5}
        let data = vec![vec![0.0], vec![1.0], vec![4.0], vec![5.0]];
        let score = silhouette_score(&data, &[0, 0, 1, 1]).unwrap();
        // a = 1 for every point; b = 4.5, 3.5, 3.5, 4.5
        let expected = ((3.5 / 4.5) * 2.0 + (2.5 / 3.5) * 2.0) / 4.0;
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_singletons_score_zero() {
        let data = vec![vec![0.0], vec![1.0], vec![9.0]];
        let score = silhouette_score(&data, &[0, 0, 1]).unwrap();
        // the lone point contributes 0
        let expected = ((9.0 - 1.0) / 9.0 + (8.0 - 1.0) / 8.0) / 3.0;
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_one_cluster_and_all_singletons() {
        let data = vec![vec![0.0], vec![1.0], vec![2.0]];
        assert!(matches!(
            silhouette_score(&data, &[0, 0, 0]),
            Err(Error::DegenerateMetric { .. })
        ));
        assert!(silhouette_score(&data, &[0, 1, 2]).is_err());
    }
}
