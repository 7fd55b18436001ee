//! K-means clustering over `(energy, valence, danceability)` points.
//!
//! Initial centroids are chosen with k-means++ from a seedable RNG, then Lloyd
//! iterations run until the assignments stop changing or the iteration cap is
//! hit. A cluster that ends up empty keeps its previous centroid.

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// A point in the 3-d clustering space: `[energy, valence, danceability]`.
pub type FeaturePoint = [f64; 3];

/// Mean of the points assigned to a cluster, same layout as [`FeaturePoint`].
pub type Centroid = [f64; 3];

/// Upper bound on the number of clusters, one per mood.
pub const MAX_CLUSTERS: usize = 4;

/// `k = min(4, n)`.
#[must_use]
pub const fn cluster_count(n: usize) -> usize {
    if n < MAX_CLUSTERS {
        n
    } else {
        MAX_CLUSTERS
    }
}

/// Result of partitioning a set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster index for each input point, in input order.
    pub assignments: Vec<usize>,
    /// Exactly `k` rows.
    pub centroids: Vec<Centroid>,
    /// Lloyd iterations actually run.
    pub iterations: usize,
}

impl Clustering {
    #[must_use]
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Check that this describes `n` points in `k` clusters.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::MalformedOutput`] on a length mismatch or an
    /// assignment outside `0..k`.
    pub fn validate(&self, n: usize, k: usize) -> Result<(), ClusterError> {
        if self.assignments.len() != n {
            return Err(ClusterError::MalformedOutput(format!(
                "{} assignments for {n} points",
                self.assignments.len()
            )));
        }
        if self.centroids.len() != k {
            return Err(ClusterError::MalformedOutput(format!(
                "{} centroids for k = {k}",
                self.centroids.len()
            )));
        }
        if let Some((index, cluster)) = self.assignments.iter().enumerate().find(|&(_, &c)| c >= k) {
            return Err(ClusterError::MalformedOutput(format!(
                "point {index} assigned to cluster {cluster}, k = {k}"
            )));
        }
        Ok(())
    }

    /// Number of points in each cluster.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k()];
        for &cluster in &self.assignments {
            sizes[cluster] += 1;
        }
        sizes
    }
}

/// Anything that can partition feature points into `k` groups.
///
/// The pipeline talks to the clusterer only through this trait, so alternate
/// algorithms (or failing stand-ins in tests) can be swapped in.
pub trait Clusterer: Send + Sync {
    /// Partition `points` into `k` clusters.
    ///
    /// # Errors
    ///
    /// Returns an error if `points` is empty, `k` is out of range, or the input
    /// cannot be clustered.
    fn cluster(&self, points: &[FeaturePoint], k: usize) -> Result<Clustering, ClusterError>;
}

/// Tuning for [`KMeans`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Hard cap on Lloyd iterations.
    pub max_iterations: usize,
    /// Seed for centroid initialization. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            seed: None,
        }
    }
}

impl KMeansConfig {
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone, Default)]
pub struct KMeans {
    config: KMeansConfig,
}

impl KMeans {
    #[must_use]
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// k-means++: first centroid uniformly, the rest weighted by squared
    /// distance to the nearest centroid picked so far.
    fn init_centroids(points: &[FeaturePoint], k: usize, rng: &mut impl Rng) -> Vec<Centroid> {
        let mut centroids = Vec::with_capacity(k);
        centroids.push(points[rng.gen_range(0..points.len())]);

        while centroids.len() < k {
            let distances: Vec<f64> = points
                .iter()
                .map(|p| {
                    centroids
                        .iter()
                        .map(|c| squared_distance(p, c))
                        .fold(f64::MAX, f64::min)
                })
                .collect();

            let total: f64 = distances.iter().sum();
            if total <= 0.0 {
                // Every point already sits on a centroid.
                centroids.push(points[rng.gen_range(0..points.len())]);
                continue;
            }

            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut selected = points.len() - 1;
            for (i, d) in distances.iter().enumerate() {
                cumulative += d;
                if cumulative >= threshold && *d > 0.0 {
                    selected = i;
                    break;
                }
            }
            centroids.push(points[selected]);
        }

        centroids
    }
}

impl Clusterer for KMeans {
    fn cluster(&self, points: &[FeaturePoint], k: usize) -> Result<Clustering, ClusterError> {
        if points.is_empty() {
            return Err(ClusterError::EmptyInput);
        }
        if k == 0 || k > points.len() {
            return Err(ClusterError::InvalidK { k, n: points.len() });
        }
        if let Some(index) = points
            .iter()
            .position(|p| p.iter().any(|v| !v.is_finite()))
        {
            return Err(ClusterError::NonFiniteValue { index });
        }

        let mut rng = self.rng();
        let mut centroids = Self::init_centroids(points, k, &mut rng);
        let mut assignments: Vec<usize> = points.iter().map(|p| nearest_centroid(p, &centroids)).collect();
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            centroids = recompute_centroids(points, &assignments, &centroids);

            let next: Vec<usize> = points.iter().map(|p| nearest_centroid(p, &centroids)).collect();
            if next == assignments {
                trace!("k-means converged after {iterations} iterations");
                break;
            }
            assignments = next;
        }

        debug!(
            "Clustered {} points into {k} clusters in {iterations} iterations",
            points.len()
        );

        Ok(Clustering {
            assignments,
            centroids,
            iterations,
        })
    }
}

/// Mean of each cluster's members. Empty clusters keep their old centroid.
fn recompute_centroids(points: &[FeaturePoint], assignments: &[usize], previous: &[Centroid]) -> Vec<Centroid> {
    let mut sums = vec![[0.0_f64; 3]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (sum, value) in sums[cluster].iter_mut().zip(point) {
            *sum += *value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| match count {
            0 => *old,
            n => sum.map(|s| s / n as f64),
        })
        .collect()
}

/// Index of the closest centroid; ties go to the lowest index.
fn nearest_centroid(point: &FeaturePoint, centroids: &[Centroid]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(i, _)| i)
}

#[inline]
fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
