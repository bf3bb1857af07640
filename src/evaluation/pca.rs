use crate::error::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 1000;
const POWER_TOLERANCE: f64 = 1e-12;

/// Principal components found by power iteration with deflation on the
/// sample covariance matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    pub mean: Vec<f64>,
    /// Unit-norm components, strongest first
    pub components: Vec<Vec<f64>>,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

impl Pca {
    /// Fit up to `n_components` components (capped by the feature count)
    pub fn fit(data: &[Vec<f32>], n_components: usize) -> Result<Self> {
        let n = data.len();
        if n < 2 {
            return Err(Error::degenerate("pca", "needs at least two samples"));
        }
        let d = data[0].len();
        let n_components = n_components.min(d);

        let mean: Vec<f64> = (0..d)
            .map(|j| data.iter().map(|r| f64::from(r[j])).sum::<f64>() / n as f64)
            .collect();

        let mut covariance = vec![vec![0.0f64; d]; d];
        for row in data {
            let centered: Vec<f64> = row.iter().zip(&mean).map(|(&v, m)| f64::from(v) - m).collect();
            for i in 0..d {
                for j in i..d {
                    covariance[i][j] += centered[i] * centered[j];
                }
            }
        }
        for i in 0..d {
            for j in i..d {
                covariance[i][j] /= (n - 1) as f64;
                covariance[j][i] = covariance[i][j];
            }
        }
        let total_variance: f64 = (0..d).map(|i| covariance[i][i]).sum();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut components = Vec::with_capacity(n_components);
        let mut explained_variance = Vec::with_capacity(n_components);

        for _ in 0..n_components {
            let mut v: Vec<f64> = (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect();
            normalize(&mut v);

            let mut eigenvalue = 0.0;
            for _ in 0..POWER_ITERATIONS {
                let mut next: Vec<f64> = covariance.iter().map(|row| dot(row, &v)).collect();
                eigenvalue = normalize(&mut next);
                if eigenvalue == 0.0 {
                    break;
                }
                let delta: f64 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
                v = next;
                if delta < POWER_TOLERANCE {
                    break;
                }
            }

            // sign convention: largest-magnitude loading is positive
            let pivot = v
                .iter()
                .copied()
                .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                v.iter_mut().for_each(|x| *x = -*x);
            }

            for i in 0..d {
                for j in 0..d {
                    covariance[i][j] -= eigenvalue * v[i] * v[j];
                }
            }
            components.push(v);
            explained_variance.push(eigenvalue);
        }

        let explained_variance_ratio = explained_variance
            .iter()
            .map(|&ev| if total_variance > 0.0 { ev / total_variance } else { 0.0 })
            .collect();

        Ok(Self {
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        })
    }

    /// Project rows onto the components
    pub fn transform(&self, data: &[Vec<f32>]) -> Vec<Vec<f64>> {
        data.iter()
            .map(|row| {
                let centered: Vec<f64> = row
                    .iter()
                    .zip(&self.mean)
                    .map(|(&v, m)| f64::from(v) - m)
                    .collect();
                self.components.iter().map(|c| dot(c, &centered)).collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_dominant_axis() {
        // spread along x, tiny noise along y
        let data: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![i as f32, if i % 2 == 0 { 0.1 } else { -0.1 }])
            .collect();
        let pca = Pca::fit(&data, 2).unwrap();

        assert!((pca.components[0][0].abs() - 1.0).abs() < 1e-6);
        assert!(pca.explained_variance_ratio[0] > 0.99);
        let total: f64 = pca.explained_variance_ratio.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_transform_is_centered() {
        let data = vec![
            vec![1.0, 2.0, 3.0],
            vec![2.0, 1.0, 0.0],
            vec![4.0, 4.0, 1.0],
            vec![0.0, 3.0, 2.0],
        ];
        let pca = Pca::fit(&data, 2).unwrap();
        let projected = pca.transform(&data);
        assert_eq!(projected.len(), 4);
        assert_eq!(projected[0].len(), 2);
        for k in 0..2 {
            let mean: f64 = projected.iter().map(|p| p[k]).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-9);
        }
        assert!(pca.explained_variance[0] >= pca.explained_variance[1]);
    }

    #[test]
    fn test_component_count_capped_by_width() {
        let data = vec![vec![1.0], vec![2.0], vec![4.0]];
        let pca = Pca::fit(&data, 2).unwrap();
        assert_eq!(pca.components.len(), 1);
        assert!(Pca::fit(&data[..1], 2).is_err());
    }
}
