//! Weighted point storage plus synthetic generators and a CSV loader.

use std::path::Path;

use csv::ReaderBuilder;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use ndarray_rand::rand_distr::{Distribution, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use tracing::debug;

use crate::{KMeansError, Result};

/// Dense data representation used across the crate (rows = points, columns = features).
pub type DataMatrix = Array2<f64>;

/// Points to be clustered together with their non-negative weights.
///
/// The clustering core never mutates a `Dataset`; assignments and bounds
/// live in the engine's working state.
#[derive(Debug, Clone)]
pub struct Dataset {
    points: DataMatrix,
    weights: Array1<f64>,
}

impl Dataset {
    /// Wrap a matrix of points, giving every point weight 1.0.
    pub fn new(points: DataMatrix) -> Self {
        let weights = Array1::from_elem(points.nrows(), 1.0);
        Self { points, weights }
    }

    /// Wrap a matrix of points with explicit per-point weights.
    pub fn with_weights(points: DataMatrix, weights: Array1<f64>) -> Result<Self> {
        if weights.len() != points.nrows() {
            return Err(KMeansError::InvalidData(format!(
                "expected {} weights, got {}",
                points.nrows(),
                weights.len()
            )));
        }
        if let Some((idx, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(KMeansError::InvalidData(format!(
                "weight of point {idx} must be finite and non-negative, got {w}"
            )));
        }
        Ok(Self { points, weights })
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// Dimensionality of every point.
    pub fn dim(&self) -> usize {
        self.points.ncols()
    }

    pub fn points(&self) -> &DataMatrix {
        &self.points
    }

    pub fn point(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.points.row(idx)
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn weight(&self, idx: usize) -> f64 {
        self.weights[idx]
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.sum()
    }

    /// Weighted mean of all points, or the plain mean when every weight is zero.
    pub fn weighted_mean(&self) -> Array1<f64> {
        let total = self.total_weight();
        if total > 0.0 {
            let weighted = &self.points * &self.weights.view().insert_axis(Axis(1));
            weighted.sum_axis(Axis(0)) / total
        } else {
            self.points
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(self.dim()))
        }
    }
}

/// Generate random data matrix (n rows, dim columns) using a reproducible RNG.
pub fn generate_points<R: Rng + ?Sized>(n: usize, dim: usize, rng: &mut R) -> DataMatrix {
    Array2::random_using((n, dim), Uniform::new(0.0, 1.0), rng)
}

/// Generate `n_per_cluster` noisy copies of every row of `centers`.
///
/// Rows are emitted cluster by cluster, so the ground-truth label of row `i`
/// is `i / n_per_cluster`.
pub fn generate_clustered_points<R, D>(
    n_per_cluster: usize,
    centers: &DataMatrix,
    noise: &D,
    rng: &mut R,
) -> DataMatrix
where
    R: Rng + ?Sized,
    D: Distribution<f64>,
{
    let dim = centers.ncols();
    let total = n_per_cluster * centers.nrows();
    let mut points = Array2::zeros((total, dim));

    for (cluster_idx, center) in centers.outer_iter().enumerate() {
        for sample_idx in 0..n_per_cluster {
            let row_idx = cluster_idx * n_per_cluster + sample_idx;
            synthesise_sample(&center, points.row_mut(row_idx), noise, rng);
        }
    }

    points
}

fn synthesise_sample<R, D>(
    center: &ArrayView1<f64>,
    mut row: ArrayViewMut1<'_, f64>,
    noise: &D,
    rng: &mut R,
) where
    R: Rng + ?Sized,
    D: Distribution<f64>,
{
    for (value, &c) in row.iter_mut().zip(center.iter()) {
        *value = c + noise.sample(rng);
    }
}

/// Loads numeric CSV files into a [`Dataset`].
pub struct DataLoader;

impl DataLoader {
    /// Load a CSV file with a header row and numeric columns.
    ///
    /// When `weight_column` names a header, that column supplies the point
    /// weights and is excluded from the feature matrix.
    pub fn load_csv<P: AsRef<Path>>(path: P, weight_column: Option<&str>) -> Result<Dataset> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let weight_idx = match weight_column {
            Some(name) => {
                let headers = rdr.headers()?;
                let idx = headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                    KMeansError::InvalidData(format!("weight column '{name}' not found in header"))
                })?;
                Some(idx)
            }
            None => None,
        };

        let mut features: Vec<f64> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut width = None;
        let mut rows = 0usize;
        for record in rdr.records() {
            let record = record?;
            let mut row_width = 0usize;
            let mut weight = 1.0;
            for (col, field) in record.iter().enumerate() {
                let value: f64 = field.trim().parse()?;
                if Some(col) == weight_idx {
                    weight = value;
                } else {
                    features.push(value);
                    row_width += 1;
                }
            }
            match width {
                Some(expected) if expected != row_width => {
                    return Err(KMeansError::InvalidData(format!(
                        "found inconsistent row width: expected {expected}, got {row_width}"
                    )));
                }
                Some(_) => {}
                None => width = Some(row_width),
            }
            weights.push(weight);
            rows += 1;
        }

        let dim = width.unwrap_or(0);
        debug!(rows, dim, weighted = weight_idx.is_some(), "parsed csv input");
        let points = Array2::from_shape_vec((rows, dim), features)
            .map_err(|err| KMeansError::InvalidData(err.to_string()))?;
        Dataset::with_weights(points, Array1::from(weights))
    }
}
