//! Clustering of latent codes and agreement with known subtypes.

pub mod agreement;
pub mod kmeans;
pub mod pca;
pub mod silhouette;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub use agreement::{score_agreement, AgreementScores, ConfusionMatrix, LabelMapping};
pub use kmeans::{KMeans, KMeansFit};
pub use pca::Pca;
pub use silhouette::silhouette_score;

/// Components kept for the reporting projection
pub const PCA_COMPONENTS: usize = 2;

/// Everything measured on one set of latent codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub n_samples: usize,
    /// Samples with a known subtype, the ones agreement is scored on
    pub n_labelled: usize,
    pub n_clusters: usize,
    pub silhouette: f64,
    pub inertia: f64,
    /// Cluster per sample, in input order
    pub cluster_labels: Vec<usize>,
    /// 2-D projection per sample, in input order
    pub pca_coordinates: Vec<Vec<f64>>,
    pub pca_explained_variance_ratio: Vec<f64>,
    pub confusion: ConfusionMatrix,
    pub agreement: AgreementScores,
}

impl EvaluationReport {
    pub fn adjusted_rand_index(&self) -> f64 {
        self.agreement.adjusted_rand_index
    }

    /// Write the report as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Reduce, cluster and score latent codes against subtype labels.
///
/// Samples whose subtype is `None` take part in clustering and the
/// silhouette score but not in the agreement scores.
pub fn evaluate(
    latent: &[Vec<f32>],
    subtypes: &[Option<String>],
    kmeans: &KMeans,
) -> Result<EvaluationReport> {
    if latent.is_empty() {
        return Err(Error::EmptyDataset("no latent codes to evaluate".into()));
    }
    if latent.len() != subtypes.len() {
        return Err(Error::shape("subtype labels", latent.len(), subtypes.len()));
    }

    let pca = Pca::fit(latent, PCA_COMPONENTS)?;
    let pca_coordinates = pca.transform(latent);

    let fit = kmeans.fit(latent)?;
    let silhouette = silhouette_score(latent, &fit.labels)?;
    info!(
        "Silhouette score for {} clusters: {:.4}",
        kmeans.n_clusters, silhouette
    );

    let (truth, predicted) = drop_unlabelled(subtypes, &fit.labels);
    let (confusion, agreement) = score_agreement(&truth, &predicted)?;
    info!(
        "ARI {:.4}, NMI {:.4}, FMI {:.4}, V-measure {:.4} on {} labelled samples",
        agreement.adjusted_rand_index,
        agreement.normalized_mutual_info,
        agreement.fowlkes_mallows,
        agreement.v_measure,
        truth.len()
    );

    Ok(EvaluationReport {
        n_samples: latent.len(),
        n_labelled: truth.len(),
        n_clusters: kmeans.n_clusters,
        silhouette,
        inertia: fit.inertia,
        cluster_labels: fit.labels,
        pca_coordinates,
        pca_explained_variance_ratio: pca.explained_variance_ratio,
        confusion,
        agreement,
    })
}

/// Pair every known subtype with its cluster, skipping unknown subtypes
pub fn drop_unlabelled(subtypes: &[Option<String>], clusters: &[usize]) -> (Vec<String>, Vec<usize>) {
    subtypes
        .iter()
        .zip(clusters)
        .filter_map(|(subtype, &cluster)| subtype.clone().map(|s| (s, cluster)))
        .unzip()
}

/// Write one row per sample: id, subtype, cluster, then the latent code
pub fn write_embeddings<P: AsRef<Path>>(
    path: P,
    sample_ids: &[String],
    latent: &[Vec<f32>],
    subtypes: &[Option<String>],
    clusters: Option<&[usize]>,
) -> Result<()> {
    if sample_ids.len() != latent.len() {
        return Err(Error::shape("embedding rows", sample_ids.len(), latent.len()));
    }

    let mut writer = csv::Writer::from_path(path)?;
    let width = latent.first().map(Vec::len).unwrap_or_default();
    let mut header = vec!["sample".to_string(), "subtype".to_string(), "cluster".to_string()];
    header.extend((0..width).map(|i| format!("z{}", i)));
    writer.write_record(&header)?;

    for (i, (id, code)) in sample_ids.iter().zip(latent).enumerate() {
        let mut record = vec![
            id.clone(),
            subtypes.get(i).cloned().flatten().unwrap_or_default(),
            clusters
                .and_then(|c| c.get(i))
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ];
        record.extend(code.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn labelled(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_drop_unlabelled_keeps_pairs_aligned() {
        let subtypes = labelled(&[Some("A"), None, Some("B"), Some("A")]);
        let (truth, predicted) = drop_unlabelled(&subtypes, &[0, 1, 1, 0]);
        assert_eq!(truth, vec!["A", "B", "A"]);
        assert_eq!(predicted, vec![0, 1, 0]);

        let (_, scores) = score_agreement(&truth, &predicted).unwrap();
        assert!((scores.adjusted_rand_index - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_separated_codes() {
        let mut latent = Vec::new();
        let mut subtypes = Vec::new();
        for i in 0..6 {
            let jitter = i as f32 * 0.01;
            latent.push(vec![0.0 + jitter, 0.0, 1.0]);
            subtypes.push(Some("Basal".to_string()));
            latent.push(vec![5.0 + jitter, 5.0, 1.0]);
            subtypes.push(if i == 0 { None } else { Some("LumA".to_string()) });
        }

        let report = evaluate(&latent, &subtypes, &KMeans::new(2).with_n_init(3)).unwrap();
        assert_eq!(report.n_samples, 12);
        assert_eq!(report.n_labelled, 11);
        assert_eq!(report.confusion.shape(), [2, 2]);
        assert_eq!(report.pca_coordinates.len(), 12);
        assert!((report.adjusted_rand_index() - 1.0).abs() < 1e-12);
        assert!(report.silhouette > 0.9);
    }

    #[test]
    fn test_evaluate_single_subtype_is_degenerate() {
        let latent = vec![vec![0.0], vec![0.1], vec![5.0], vec![5.1]];
        let subtypes = labelled(&[Some("A"), Some("A"), None, Some("A")]);
        let err = evaluate(&latent, &subtypes, &KMeans::new(2)).unwrap_err();
        assert!(matches!(err, Error::DegenerateMetric { .. }));
    }

    #[test]
    fn test_write_embeddings_csv() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latent.csv");
        write_embeddings(
            &path,
            &["S1".to_string(), "S2".to_string()],
            &[vec![0.5, 1.0], vec![0.25, 0.0]],
            &labelled(&[Some("Her2"), None]),
            Some(&[1, 0]),
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "sample,subtype,cluster,z0,z1");
        assert_eq!(lines[1], "S1,Her2,1,0.5,1");
        assert_eq!(lines[2], "S2,,0,0.25,0");
    }
}
