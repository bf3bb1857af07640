//! K-Means clustering: Lloyd iterations from k-means++ seeds, best of
//! `n_init` restarts by inertia.

use crate::error::{Error, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// K-Means settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    /// Number of clusters
    pub n_clusters: usize,
    /// Independent restarts
    pub n_init: usize,
    /// Lloyd iterations per restart
    pub max_iter: usize,
    /// Convergence tolerance, relative to the mean feature variance
    pub tol: f64,
    /// Seed of the first restart
    pub seed: u64,
}

/// Result of the best restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
    pub n_iter: usize,
}

fn squared_distance(point: &[f32], centroid: &[f64]) -> f64 {
    point
        .iter()
        .zip(centroid)
        .map(|(&x, &c)| {
            let d = f64::from(x) - c;
            d * d
        })
        .sum()
}

fn nearest(point: &[f32], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(k, c)| (k, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: 2026,
        }
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Cluster the rows of `data`
    pub fn fit(&self, data: &[Vec<f32>]) -> Result<KMeansFit> {
        if self.n_clusters == 0 {
            return Err(Error::config("n_clusters must be positive"));
        }
        if data.len() < self.n_clusters {
            return Err(Error::degenerate(
                "kmeans",
                format!(
                    "{} samples cannot form {} clusters",
                    data.len(),
                    self.n_clusters
                ),
            ));
        }

        let tol = self.tol * mean_variance(data);
        let mut best: Option<KMeansFit> = None;

        for run in 0..self.n_init.max(1) {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(run as u64));
            let fit = self.lloyd(data, self.init_centroids(data, &mut rng), tol);
            tracing::debug!(run, inertia = fit.inertia, n_iter = fit.n_iter, "k-means restart");

            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.ok_or_else(|| Error::degenerate("kmeans", "no restart completed"))
    }

    /// k-means++ seeding: each new centroid is drawn with probability
    /// proportional to its squared distance from the chosen ones
    fn init_centroids(&self, data: &[Vec<f32>], rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        let to_f64 = |row: &[f32]| row.iter().map(|&v| f64::from(v)).collect::<Vec<f64>>();

        let mut centroids = vec![to_f64(&data[rng.gen_range(0..data.len())])];
        let mut min_distances: Vec<f64> = data
            .iter()
            .map(|p| squared_distance(p, &centroids[0]))
            .collect();

        while centroids.len() < self.n_clusters {
            let next = match WeightedIndex::new(&min_distances) {
                Ok(weights) => weights.sample(rng),
                // every point coincides with a centroid
                Err(_) => rng.gen_range(0..data.len()),
            };
            let centroid = to_f64(&data[next]);
            for (d, p) in min_distances.iter_mut().zip(data) {
                *d = d.min(squared_distance(p, &centroid));
            }
            centroids.push(centroid);
        }

        centroids
    }

    fn lloyd(&self, data: &[Vec<f32>], mut centroids: Vec<Vec<f64>>, tol: f64) -> KMeansFit {
        let n_features = data[0].len();
        let mut labels = vec![0usize; data.len()];
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            for (label, point) in labels.iter_mut().zip(data) {
                *label = nearest(point, &centroids).0;
            }

            let mut sums = vec![vec![0.0f64; n_features]; self.n_clusters];
            let mut counts = vec![0usize; self.n_clusters];
            for (&label, point) in labels.iter().zip(data) {
                counts[label] += 1;
                for (s, &v) in sums[label].iter_mut().zip(point) {
                    *s += f64::from(v);
                }
            }

            let mut updated: Vec<Vec<f64>> = Vec::with_capacity(self.n_clusters);
            for k in 0..self.n_clusters {
                if counts[k] > 0 {
                    updated.push(sums[k].iter().map(|s| s / counts[k] as f64).collect());
                } else {
                    // empty cluster: move it onto the worst-fitted point
                    let (far, _) = data
                        .iter()
                        .enumerate()
                        .map(|(i, p)| (i, squared_distance(p, &centroids[labels[i]])))
                        .fold((0, f64::NEG_INFINITY), |a, b| if b.1 > a.1 { b } else { a });
                    updated.push(data[far].iter().map(|&v| f64::from(v)).collect());
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| old.iter().zip(new).map(|(a, b)| (a - b) * (a - b)).sum::<f64>())
                .sum();
            centroids = updated;
            if shift <= tol {
                break;
            }
        }

        let mut inertia = 0.0;
        for (label, point) in labels.iter_mut().zip(data) {
            let (k, d) = nearest(point, &centroids);
            *label = k;
            inertia += d;
        }

        KMeansFit {
            labels,
            centroids,
            inertia,
            n_iter,
        }
    }
}

fn mean_variance(data: &[Vec<f32>]) -> f64 {
    let n = data.len() as f64;
    let n_features = data.first().map(Vec::len).unwrap_or_default();
    if n_features == 0 {
        return 0.0;
    }
    let total: f64 = (0..n_features)
        .map(|j| {
            let mean = data.iter().map(|r| f64::from(r[j])).sum::<f64>() / n;
            data.iter()
                .map(|r| (f64::from(r[j]) - mean).powi(2))
                .sum::<f64>()
                / n
        })
        .sum();
    total / n_features as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f32>> {
        let mut data = Vec::new();
        for (cx, cy) in [(0.0f32, 0.0f32), (10.0, 10.0), (0.0, 10.0)] {
            for i in 0..5 {
                let offset = i as f32 * 0.1;
                data.push(vec![cx + offset, cy - offset]);
            }
        }
        data
    }

    #[test]
    fn test_separates_blobs() {
        let fit = KMeans::new(3).with_seed(1).fit(&blobs()).unwrap();
        assert_eq!(fit.labels.len(), 15);
        for chunk in fit.labels.chunks(5) {
            assert!(chunk.iter().all(|&l| l == chunk[0]));
        }
        let mut firsts = vec![fit.labels[0], fit.labels[5], fit.labels[10]];
        firsts.sort_unstable();
        firsts.dedup();
        assert_eq!(firsts.len(), 3);
        assert!(fit.inertia < 1.0);
    }

    #[test]
    fn test_same_seed_same_labels() {
        let a = KMeans::new(3).with_seed(9).fit(&blobs()).unwrap();
        let b = KMeans::new(3).with_seed(9).fit(&blobs()).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_fewer_samples_than_clusters() {
        let err = KMeans::new(5).fit(&blobs()[..3]).unwrap_err();
        assert!(matches!(err, Error::DegenerateMetric { .. }));
    }

    #[test]
    fn test_duplicate_points_do_not_panic() {
        let data = vec![vec![1.0, 1.0]; 6];
        let fit = KMeans::new(2).fit(&data).unwrap();
        assert_eq!(fit.labels.len(), 6);
        assert_eq!(fit.inertia, 0.0);
    }
}
