//! K-means clustering implementation for IVF vector indexing.
//!
//! This module provides a pure Rust implementation of K-means clustering
//! over embedding vectors. Centroids are trained under the corpus metric:
//! spherical k-means (normalized means) for cosine, plain means for L2.
//! K-means++ is used for centroid initialization.
//!
//! # Algorithm Details
//! - Initialization: K-means++ with a seeded RNG, so builds are reproducible
//! - Max iterations: caller supplied
//! - Convergence tolerance: 1e-4 mean centroid movement
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs in parallel with rayon

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::vector::metric::{Metric, normalize_vector, normalize_vector_copy, squared_l2};
use crate::vector::types::{ClusterId, VectorError};

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Parameters for a k-means run.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    /// Number of clusters.
    pub k: usize,
    /// Upper bound on Lloyd iterations.
    pub max_iterations: usize,
    /// RNG seed for k-means++ and empty-cluster reseeding.
    pub seed: u64,
    /// Metric the centroids are trained for.
    pub metric: Metric,
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,

    /// Whether the run stopped before hitting the iteration cap.
    pub converged: bool,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are stored before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// Performs K-means clustering on a set of vectors.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `params` - Cluster count, iteration cap, seed and metric
///
/// # Algorithm
/// 1. Initialize centroids using K-means++ method
/// 2. Iterate until convergence or max iterations:
///    - Assign each vector to nearest centroid under the metric
///    - Update centroids as mean of assigned vectors
///    - Check convergence based on centroid movement
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    params: KMeansParams,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    let k = params.k;
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let metric = params.metric;

    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, metric, &mut rng)?;
    let mut assignments = vec![ClusterId::from_index(0); vectors.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations.max(1) {
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids, metric);

        let unchanged = new_assignments == assignments;
        assignments = new_assignments;
        if unchanged && iterations > 1 {
            converged = true;
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, metric, &mut rng);
        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            // Centroids moved; assignments must reflect the final positions
            assignments = assign_all(vectors, &centroids, metric);
            converged = true;
            break;
        }
    }

    if !converged {
        // Still usable, just not fully settled
        tracing::debug!(
            "k-means stopped at the iteration cap ({}) without converging",
            params.max_iterations
        );
        assignments = assign_all(vectors, &centroids, metric);
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
    })
}

/// Assigns every vector to its nearest centroid in parallel.
pub fn assign_all(vectors: &[&[f32]], centroids: &[Vec<f32>], metric: Metric) -> Vec<ClusterId> {
    let centroid_refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();
    vectors
        .par_iter()
        .map(|vector| assign_to_nearest_centroid(vector, &centroid_refs, metric))
        .collect()
}

/// Assigns a vector to the nearest centroid under `metric`.
///
/// # Returns
/// * `ClusterId` of the nearest centroid (first one wins on ties)
pub fn assign_to_nearest_centroid(
    vector: &[f32],
    centroids: &[&[f32]],
    metric: Metric,
) -> ClusterId {
    let mut best_score = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let score = metric.score(vector, centroid);
        if score > best_score {
            best_score = score;
            best_cluster = i;
        }
    }

    ClusterId::from_index(best_cluster)
}

/// Distance used by k-means++ seeding and movement tracking.
fn seeding_distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => (1.0 - metric.score(a, b)).max(0.0),
        Metric::L2 => squared_l2(a, b),
    }
}

fn centroid_from(vector: &[f32], metric: Metric) -> Vec<f32> {
    match metric {
        Metric::Cosine => normalize_vector_copy(vector),
        Metric::L2 => vector.to_vec(),
    }
}

/// Updates centroids as the mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    metric: Metric,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let cluster_idx = cluster_id.index();
        for (sum, &value) in new_centroids[cluster_idx].iter_mut().zip(vector.iter()) {
            *sum += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = centroid_from(vectors[random_idx], metric);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            if metric.normalizes() {
                normalize_vector(centroid);
            }
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
///
/// K-means++ selects initial centroids that are far apart, leading to
/// better convergence properties than random initialization.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    metric: Metric,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(centroid_from(vectors[first_idx], metric));

    // Distance of each vector to its closest chosen centroid so far
    let mut min_distances: Vec<f32> = vectors
        .iter()
        .map(|v| seeding_distance(metric, v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let weights: Vec<f32> = min_distances.iter().map(|d| d * d).collect();
        let total: f32 = weights.iter().sum();

        let next_idx = if total < EPSILON {
            // All points coincide with chosen centroids; fall back to any unused index
            (0..vectors.len())
                .find(|&i| !centroids.iter().any(|c| c.as_slice() == vectors[i]))
                .unwrap_or_else(|| rng.random_range(0..vectors.len()))
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            let mut chosen = vectors.len() - 1;
            for (i, &weight) in weights.iter().enumerate() {
                cumulative += weight;
                if cumulative >= target && weight > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = centroid_from(vectors[next_idx], metric);
        for (distance, vector) in min_distances.iter_mut().zip(vectors.iter()) {
            *distance = distance.min(seeding_distance(metric, vector, &centroid));
        }
        centroids.push(centroid);
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }

    Ok(centroids)
}

/// Calculates the mean movement of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| squared_l2(old_c, new_c).sqrt())
        .sum::<f32>()
        / old.len() as f32
}
