//! Initial center selection.

use std::fmt;
use std::str::FromStr;

use ndarray::Axis;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{DataMatrix, Dataset};
use crate::distance::DistanceMetric;
use crate::{KMeansError, Result};

/// Strategy used to seed initial centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SeedStrategy {
    /// Choose centers uniformly at random from the dataset.
    Random,
    /// Greedy traversal: each new center is the point farthest from all chosen ones.
    FarthestFirst,
    /// K-Means++ initialisation as described by Arthur/Vassilvitskii.
    #[default]
    #[serde(alias = "kmeans++", alias = "k-means++")]
    KMeansPlusPlus,
    /// Deterministic: points at evenly spaced quantiles of distance to the mean.
    MeanQuantiles,
}

impl fmt::Display for SeedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedStrategy::Random => write!(f, "random"),
            SeedStrategy::FarthestFirst => write!(f, "farthest-first"),
            SeedStrategy::KMeansPlusPlus => write!(f, "kmeans++"),
            SeedStrategy::MeanQuantiles => write!(f, "mean-quantiles"),
        }
    }
}

impl FromStr for SeedStrategy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "farthest-first" | "farthest" => Ok(Self::FarthestFirst),
            "kmeans++" | "k-means++" => Ok(Self::KMeansPlusPlus),
            "mean-quantiles" | "quantiles" => Ok(Self::MeanQuantiles),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported init strategy '{other}'"
            ))),
        }
    }
}

/// Picks `k` rows of a dataset to act as initial centers.
#[derive(Debug, Clone, Copy)]
pub struct SeedSelector {
    strategy: SeedStrategy,
    parallel: bool,
}

impl SeedSelector {
    pub fn new(strategy: SeedStrategy) -> Self {
        Self {
            strategy,
            parallel: true,
        }
    }

    /// Run the distance scans on the calling thread instead of rayon.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn strategy(&self) -> SeedStrategy {
        self.strategy
    }

    /// Select `k` initial centers, returned as a `k × dim` matrix.
    pub fn select<M, R>(
        &self,
        data: &Dataset,
        k: usize,
        metric: &M,
        rng: &mut R,
    ) -> Result<DataMatrix>
    where
        M: DistanceMetric + ?Sized,
        R: Rng + ?Sized,
    {
        let indices = self.select_indices(data, k, metric, rng)?;
        Ok(data.points().select(Axis(0), &indices))
    }

    /// Select the dataset rows used as initial centers, in center order.
    pub fn select_indices<M, R>(
        &self,
        data: &Dataset,
        k: usize,
        metric: &M,
        rng: &mut R,
    ) -> Result<Vec<usize>>
    where
        M: DistanceMetric + ?Sized,
        R: Rng + ?Sized,
    {
        let n = data.len();
        if k == 0 {
            return Err(KMeansError::InvalidConfig(
                "seeding requires k >= 1".into(),
            ));
        }
        if k > n {
            return Err(KMeansError::InvalidConfig(format!(
                "seeding requires k <= n (k={k}, n={n})"
            )));
        }

        let indices = match self.strategy {
            SeedStrategy::Random => sample(rng, n, k).into_vec(),
            SeedStrategy::FarthestFirst => self.farthest_first(data, k, metric, rng),
            SeedStrategy::KMeansPlusPlus => self.kmeans_plus_plus(data, k, metric, rng),
            SeedStrategy::MeanQuantiles => mean_quantiles(data, k, metric),
        };
        debug!(strategy = %self.strategy, k, ?indices, "selected initial centers");
        Ok(indices)
    }

    fn farthest_first<M, R>(&self, data: &Dataset, k: usize, metric: &M, rng: &mut R) -> Vec<usize>
    where
        M: DistanceMetric + ?Sized,
        R: Rng + ?Sized,
    {
        let n = data.len();
        let mut chosen = Vec::with_capacity(k);
        let mut taken = vec![false; n];
        let mut min_distances = vec![f64::INFINITY; n];

        let mut next = rng.gen_range(0..n);
        for _ in 0..k {
            chosen.push(next);
            taken[next] = true;
            self.tighten_min_distances(data, metric, next, &mut min_distances);

            // Lowest index wins ties; coincident leftovers fall back to the first unchosen row.
            let mut best: Option<(usize, f64)> = None;
            for (idx, &d) in min_distances.iter().enumerate() {
                if taken[idx] {
                    continue;
                }
                match best {
                    Some((_, best_d)) if d <= best_d => {}
                    _ => best = Some((idx, d)),
                }
            }
            match best {
                Some((idx, _)) => next = idx,
                None => break,
            }
        }
        chosen
    }

    fn kmeans_plus_plus<M, R>(
        &self,
        data: &Dataset,
        k: usize,
        metric: &M,
        rng: &mut R,
    ) -> Vec<usize>
    where
        M: DistanceMetric + ?Sized,
        R: Rng + ?Sized,
    {
        let n = data.len();
        let mut chosen = Vec::with_capacity(k);
        let mut taken = vec![false; n];
        let mut min_distances = vec![f64::INFINITY; n];

        let first = rng.gen_range(0..n);
        chosen.push(first);
        taken[first] = true;
        self.tighten_min_distances(data, metric, first, &mut min_distances);

        for _ in 1..k {
            let weights: Vec<f64> = (0..n)
                .map(|i| {
                    if taken[i] {
                        0.0
                    } else {
                        data.weight(i) * min_distances[i] * min_distances[i]
                    }
                })
                .collect();
            let total: f64 = weights.iter().sum();

            let selected = if total > 0.0 && total.is_finite() {
                let threshold = rng.gen::<f64>() * total;
                let mut cumsum = 0.0;
                let mut selected = None;
                for (i, &w) in weights.iter().enumerate() {
                    cumsum += w;
                    if w > 0.0 && cumsum > threshold {
                        selected = Some(i);
                        break;
                    }
                }
                // Rounding can leave the threshold just past the final partial sum.
                selected.or_else(|| weights.iter().rposition(|&w| w > 0.0))
            } else {
                None
            };

            let Some(next) = selected.or_else(|| taken.iter().position(|t| !t)) else {
                break;
            };
            chosen.push(next);
            taken[next] = true;
            self.tighten_min_distances(data, metric, next, &mut min_distances);
        }
        chosen
    }

    fn tighten_min_distances<M>(
        &self,
        data: &Dataset,
        metric: &M,
        center: usize,
        min_distances: &mut [f64],
    ) where
        M: DistanceMetric + ?Sized,
    {
        let center_row = data.point(center);
        let update = |(idx, slot): (usize, &mut f64)| {
            let d = metric.distance(data.point(idx), center_row);
            if d < *slot {
                *slot = d;
            }
        };
        if self.parallel {
            min_distances.par_iter_mut().enumerate().for_each(update);
        } else {
            min_distances.iter_mut().enumerate().for_each(update);
        }
    }
}

fn mean_quantiles<M>(data: &Dataset, k: usize, metric: &M) -> Vec<usize>
where
    M: DistanceMetric + ?Sized,
{
    let n = data.len();
    let mean = data.weighted_mean();
    let distances: Vec<f64> = (0..n)
        .map(|i| metric.distance(data.point(i), mean.view()))
        .collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(a.cmp(&b)));
    (0..k).map(|i| order[(2 * i + 1) * n / (2 * k)]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Euclidean;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Nine points in three tight groups near 0, 5 and 10.
    fn three_groups() -> Dataset {
        Dataset::new(array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ])
    }

    fn groups_of(indices: &[usize]) -> Vec<usize> {
        let mut groups: Vec<usize> = indices.iter().map(|i| i / 3).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    #[test]
    fn every_strategy_returns_k_distinct_rows() {
        let data = three_groups();
        for strategy in [
            SeedStrategy::Random,
            SeedStrategy::FarthestFirst,
            SeedStrategy::KMeansPlusPlus,
            SeedStrategy::MeanQuantiles,
        ] {
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            let indices = SeedSelector::new(strategy)
                .select_indices(&data, 4, &Euclidean::default(), &mut rng)
                .unwrap();
            let mut dedup = indices.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), 4, "{strategy} produced duplicates: {indices:?}");
            assert!(indices.iter().all(|&i| i < data.len()));
        }
    }

    #[test]
    fn farthest_first_and_plus_plus_spread_across_groups() {
        let data = three_groups();
        for strategy in [SeedStrategy::FarthestFirst, SeedStrategy::KMeansPlusPlus] {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            let indices = SeedSelector::new(strategy)
                .select_indices(&data, 3, &Euclidean::default(), &mut rng)
                .unwrap();
            assert_eq!(groups_of(&indices), vec![0, 1, 2], "{strategy}: {indices:?}");
        }
    }

    #[test]
    fn serial_and_parallel_scans_pick_the_same_rows() {
        let data = three_groups();
        let mut rng_a = ChaCha8Rng::seed_from_u64(5);
        let mut rng_b = ChaCha8Rng::seed_from_u64(5);
        let selector = SeedSelector::new(SeedStrategy::KMeansPlusPlus);
        let a = selector
            .select_indices(&data, 3, &Euclidean::default(), &mut rng_a)
            .unwrap();
        let b = selector
            .with_parallel(false)
            .select_indices(&data, 3, &Euclidean::default(), &mut rng_b)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mean_quantiles_is_deterministic() {
        let data = three_groups();
        let selector = SeedSelector::new(SeedStrategy::MeanQuantiles);
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(999);
        let a = selector
            .select_indices(&data, 3, &Euclidean::default(), &mut rng_a)
            .unwrap();
        let b = selector
            .select_indices(&data, 3, &Euclidean::default(), &mut rng_b)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coincident_points_fall_back_to_unchosen_rows() {
        let data = Dataset::new(array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]);
        for strategy in [SeedStrategy::FarthestFirst, SeedStrategy::KMeansPlusPlus] {
            let mut rng = ChaCha8Rng::seed_from_u64(0);
            let mut indices = SeedSelector::new(strategy)
                .select_indices(&data, 3, &Euclidean::default(), &mut rng)
                .unwrap();
            indices.sort_unstable();
            assert_eq!(indices, vec![0, 1, 2]);
        }
    }

    #[test]
    fn farthest_first_breaks_ties_towards_the_lowest_row() {
        // Unit vectors are pairwise equidistant, so every pick after the first is a tie.
        let data = Dataset::new(ndarray::Array2::eye(5));
        for seed in 0..8 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let indices = SeedSelector::new(SeedStrategy::FarthestFirst)
                .select_indices(&data, 4, &Euclidean::default(), &mut rng)
                .unwrap();
            let expected: Vec<usize> = (0..5).filter(|&i| i != indices[0]).take(3).collect();
            assert_eq!(&indices[1..], expected.as_slice(), "seed {seed}");
        }
    }

    #[test]
    fn rejects_out_of_range_k() {
        let data = three_groups();
        let selector = SeedSelector::new(SeedStrategy::Random);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            selector.select_indices(&data, 0, &Euclidean::default(), &mut rng),
            Err(KMeansError::InvalidConfig(_))
        ));
        assert!(matches!(
            selector.select_indices(&data, 10, &Euclidean::default(), &mut rng),
            Err(KMeansError::InvalidConfig(_))
        ));
    }

    #[test]
    fn select_copies_the_chosen_rows() {
        let data = three_groups();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let centers = SeedSelector::new(SeedStrategy::MeanQuantiles)
            .select(&data, 2, &Euclidean::default(), &mut rng)
            .unwrap();
        assert_eq!(centers.dim(), (2, 2));
        assert!(data
            .points()
            .outer_iter()
            .any(|row| row == centers.row(0)));
    }
}
