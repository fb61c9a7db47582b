//! Trained centers packaged for prediction and persistence.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::KMeansConfig;
use crate::data::{DataMatrix, Dataset};
use crate::distance::DistanceMetric;
use crate::{KMeansError, Result};

/// Centers produced by a clustering run together with the configuration that produced them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KMeansModel {
    pub config: KMeansConfig,
    pub centers: DataMatrix,
}

impl KMeansModel {
    pub fn new(config: KMeansConfig, centers: DataMatrix) -> Self {
        Self { config, centers }
    }

    pub fn k(&self) -> usize {
        self.centers.nrows()
    }

    /// Index of the nearest center; ties go to the lowest index.
    pub fn predict_point<M>(&self, metric: &M, point: ArrayView1<'_, f64>) -> usize
    where
        M: DistanceMetric + ?Sized,
    {
        debug_assert_eq!(point.len(), self.centers.ncols());
        let mut best = 0usize;
        let mut best_distance = f64::INFINITY;
        for (cid, center) in self.centers.outer_iter().enumerate() {
            let distance = metric.distance(point, center);
            if distance < best_distance {
                best_distance = distance;
                best = cid;
            }
        }
        best
    }

    /// Nearest center for every row of `points`.
    pub fn predict<M>(&self, metric: &M, points: &DataMatrix) -> Vec<usize>
    where
        M: DistanceMetric + ?Sized,
    {
        (0..points.nrows())
            .into_par_iter()
            .map(|i| self.predict_point(metric, points.row(i)))
            .collect()
    }

    /// Weighted sum of squared distances from every point to its nearest center.
    pub fn inertia<M>(&self, metric: &M, data: &Dataset) -> f64
    where
        M: DistanceMetric + ?Sized,
    {
        let per_point: Vec<f64> = (0..data.len())
            .into_par_iter()
            .map(|i| {
                let point = data.point(i);
                let center = self.predict_point(metric, point);
                let d = metric.distance(point, self.centers.row(center));
                data.weight(i) * d * d
            })
            .collect();
        per_point.iter().sum()
    }

    /// Persist the model as JSON.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a model written by [`KMeansModel::save_model`].
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let model: Self = serde_json::from_reader(reader)?;
        if model.centers.nrows() != model.config.k {
            return Err(KMeansError::InvalidData(format!(
                "model declares k = {} but stores {} centers",
                model.config.k,
                model.centers.nrows()
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{Chebyshev, Euclidean};
    use approx::assert_relative_eq;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn model() -> KMeansModel {
        let config = KMeansConfig {
            k: 2,
            ..KMeansConfig::default()
        };
        KMeansModel::new(config, array![[0.0, 0.0], [4.0, 0.0]])
    }

    #[test]
    fn predicts_nearest_center_with_low_index_ties() {
        let model = model();
        let points = array![[0.5, 0.5], [3.0, 1.0], [2.0, 0.0]];
        assert_eq!(model.predict(&Euclidean::default(), &points), vec![0, 1, 0]);
        assert_eq!(model.predict_point(&Chebyshev, points.row(1)), 1);
    }

    #[test]
    fn inertia_is_weighted() {
        let model = model();
        let data = Dataset::with_weights(array![[1.0, 0.0], [4.0, 2.0]], array![2.0, 0.5]).unwrap();
        // 2·1² + 0.5·2²
        assert_relative_eq!(model.inertia(&Euclidean::default(), &data), 4.0);
    }

    #[test]
    fn save_and_load_preserve_the_model() {
        let model = model();
        let file = NamedTempFile::new().unwrap();
        model.save_model(file.path()).unwrap();
        let loaded = KMeansModel::load_model(file.path()).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn load_rejects_inconsistent_center_count() {
        let mut model = model();
        model.config.k = 3;
        let file = NamedTempFile::new().unwrap();
        model.save_model(file.path()).unwrap();
        assert!(matches!(
            KMeansModel::load_model(file.path()),
            Err(KMeansError::InvalidData(_))
        ));
    }
}
