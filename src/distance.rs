//! Distance metrics consumed by seeding, assignment and center updates.
//!
//! Pruning relies on the triangle inequality, so every metric used with the
//! Elkan or Hamerly strategies must be a true metric. The Lloyd strategy
//! accepts any dissimilarity.

use ndarray::{ArrayView1, ArrayView2};

/// Per-row values precomputed by a metric to speed up repeated distance calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelerationCache {
    values: Vec<f64>,
}

impl AccelerationCache {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cached value for row `idx`.
    pub fn get(&self, idx: usize) -> f64 {
        self.values[idx]
    }
}

/// Capability set every distance used by the engine must provide.
pub trait DistanceMetric: Send + Sync {
    /// Exact distance between `a` and `b`.
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64;

    /// Precompute per-row values for `rows`, or `None` if the metric has no use for them.
    fn acceleration_cache(&self, _rows: ArrayView2<'_, f64>) -> Option<AccelerationCache> {
        None
    }

    /// Distance between `a` and `b` given their cached values (if any).
    fn cached_distance(
        &self,
        a: ArrayView1<'_, f64>,
        _a_cache: Option<f64>,
        b: ArrayView1<'_, f64>,
        _b_cache: Option<f64>,
    ) -> f64 {
        self.distance(a, b)
    }

    /// Short name used in logs and run summaries.
    fn name(&self) -> &'static str;
}

impl<M: DistanceMetric + ?Sized> DistanceMetric for Box<M> {
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        (**self).distance(a, b)
    }

    fn acceleration_cache(&self, rows: ArrayView2<'_, f64>) -> Option<AccelerationCache> {
        (**self).acceleration_cache(rows)
    }

    fn cached_distance(
        &self,
        a: ArrayView1<'_, f64>,
        a_cache: Option<f64>,
        b: ArrayView1<'_, f64>,
        b_cache: Option<f64>,
    ) -> f64 {
        (**self).cached_distance(a, a_cache, b, b_cache)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Euclidean (L2) distance.
///
/// With [`Euclidean::with_norm_cache`] the metric caches squared norms and
/// evaluates `sqrt(|a|² + |b|² - 2a·b)` with one dot product per call. When
/// the radicand is small next to `|a|² + |b|²` the expansion cancels
/// catastrophically, so those pairs are recomputed exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Euclidean {
    norm_cache: bool,
}

/// Below this fraction of `|a|² + |b|²` the norm expansion is not trusted.
const CANCELLATION_TOLERANCE: f64 = 1e-4;

impl Euclidean {
    pub fn with_norm_cache() -> Self {
        Self { norm_cache: true }
    }

    pub fn uses_norm_cache(&self) -> bool {
        self.norm_cache
    }
}

impl DistanceMetric for Euclidean {
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        squared_euclidean(a, b).sqrt()
    }

    fn acceleration_cache(&self, rows: ArrayView2<'_, f64>) -> Option<AccelerationCache> {
        if !self.norm_cache {
            return None;
        }
        let norms = rows.outer_iter().map(|row| row.dot(&row)).collect();
        Some(AccelerationCache::new(norms))
    }

    fn cached_distance(
        &self,
        a: ArrayView1<'_, f64>,
        a_cache: Option<f64>,
        b: ArrayView1<'_, f64>,
        b_cache: Option<f64>,
    ) -> f64 {
        match (a_cache, b_cache) {
            (Some(na), Some(nb)) => {
                let scale = na + nb;
                let radicand = scale - 2.0 * a.dot(&b);
                if radicand > CANCELLATION_TOLERANCE * scale {
                    radicand.sqrt()
                } else {
                    self.distance(a, b)
                }
            }
            _ => self.distance(a, b),
        }
    }

    fn name(&self) -> &'static str {
        "euclidean"
    }
}

/// Manhattan (L1) distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Manhattan;

impl DistanceMetric for Manhattan {
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
    }

    fn name(&self) -> &'static str {
        "manhattan"
    }
}

/// Chebyshev (L∞) distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chebyshev;

impl DistanceMetric for Chebyshev {
    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    fn name(&self) -> &'static str {
        "chebyshev"
    }
}

pub(crate) fn squared_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Point-to-center distances for one run, with both acceleration caches bound.
///
/// The point cache is built once; the center cache is rebuilt by
/// [`DistanceOracle::refresh_centers`] after every center update.
pub(crate) struct DistanceOracle<'a, M: DistanceMetric + ?Sized> {
    metric: &'a M,
    points: ArrayView2<'a, f64>,
    point_cache: Option<AccelerationCache>,
    center_cache: Option<AccelerationCache>,
}

impl<'a, M: DistanceMetric + ?Sized> DistanceOracle<'a, M> {
    pub(crate) fn new(metric: &'a M, points: ArrayView2<'a, f64>) -> Self {
        let point_cache = metric.acceleration_cache(points);
        Self {
            metric,
            points,
            point_cache,
            center_cache: None,
        }
    }

    pub(crate) fn refresh_centers(&mut self, centers: ArrayView2<'_, f64>) {
        self.center_cache = if self.point_cache.is_some() {
            self.metric.acceleration_cache(centers)
        } else {
            None
        };
    }

    /// Distance from point `idx` to center `c` of `centers`.
    pub(crate) fn point_to_center(
        &self,
        idx: usize,
        centers: ArrayView2<'_, f64>,
        c: usize,
    ) -> f64 {
        self.metric.cached_distance(
            self.points.row(idx),
            self.point_cache.as_ref().map(|cache| cache.get(idx)),
            centers.row(c),
            self.center_cache.as_ref().map(|cache| cache.get(c)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn metrics_agree_on_a_simple_pair() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        assert_relative_eq!(Euclidean::default().distance(a.view(), b.view()), 5.0);
        assert_relative_eq!(Manhattan.distance(a.view(), b.view()), 7.0);
        assert_relative_eq!(Chebyshev.distance(a.view(), b.view()), 4.0);
    }

    #[test]
    fn norm_cache_matches_exact_distance() {
        let rows = array![[1.0, 2.0, 3.0], [-4.0, 0.5, 2.0], [1.0, 2.0, 3.0]];
        let metric = Euclidean::with_norm_cache();
        let cache = metric.acceleration_cache(rows.view()).unwrap();
        assert_eq!(cache.len(), 3);
        assert_relative_eq!(cache.get(0), 14.0);

        let exact = metric.distance(rows.row(0), rows.row(1));
        let cached = metric.cached_distance(
            rows.row(0),
            Some(cache.get(0)),
            rows.row(1),
            Some(cache.get(1)),
        );
        assert_relative_eq!(exact, cached, epsilon = 1e-12);

        // Identical rows never produce a NaN from a slightly negative radicand.
        let same = metric.cached_distance(
            rows.row(0),
            Some(cache.get(0)),
            rows.row(2),
            Some(cache.get(2)),
        );
        assert_eq!(same, 0.0);
    }

    #[test]
    fn norm_cache_is_exact_far_from_the_origin() {
        let rows = array![[1e7 + 0.5, 1e7 + 2.0, 1e7], [1e7 + 3.5, 1e7 - 2.0, 1e7]];
        let metric = Euclidean::with_norm_cache();
        let cache = metric.acceleration_cache(rows.view()).unwrap();
        let cached = metric.cached_distance(
            rows.row(0),
            Some(cache.get(0)),
            rows.row(1),
            Some(cache.get(1)),
        );
        assert_eq!(cached, Euclidean::default().distance(rows.row(0), rows.row(1)));
        assert_relative_eq!(cached, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn plain_metrics_have_no_cache() {
        let rows = array![[1.0], [2.0]];
        assert!(Euclidean::default().acceleration_cache(rows.view()).is_none());
        assert!(Manhattan.acceleration_cache(rows.view()).is_none());
    }

    #[test]
    fn boxed_metric_dispatches() {
        let metric: Box<dyn DistanceMetric> = Box::new(Manhattan);
        let a = array![1.0, 1.0];
        let b = array![2.0, 3.0];
        assert_relative_eq!(metric.distance(a.view(), b.view()), 3.0);
        assert_eq!(metric.name(), "manhattan");
    }

    #[test]
    fn oracle_uses_center_cache_after_refresh() {
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let centers = array![[3.0, 4.0]];
        let metric = Euclidean::with_norm_cache();
        let mut oracle = DistanceOracle::new(&metric, points.view());
        oracle.refresh_centers(centers.view());
        assert_relative_eq!(oracle.point_to_center(0, centers.view(), 0), 5.0, epsilon = 1e-12);
    }
}
