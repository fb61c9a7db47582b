//! The clustering loop.
//!
//! Each iteration runs two partitioned phases separated by rayon joins:
//! the assignment phase splits the per-point state into contiguous chunks,
//! one per worker, and reads the centers without mutating them; the update
//! phase owns the centers exclusively and rebuilds them from the finished
//! assignment. Bound relaxation runs on the point partitions once the
//! movement of every center is known.

use std::ops::Range;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bounds::{
    AssignContext, BoundStatus, BoundTracker, Elkan, Geometry, Hamerly, Lloyd, PhaseStats,
    PointBounds,
};
use crate::config::{Algorithm, KMeansConfig, Parallelism};
use crate::data::{DataMatrix, Dataset};
use crate::distance::{DistanceMetric, DistanceOracle, Euclidean};
use crate::model::KMeansModel;
use crate::seeding::SeedSelector;
use crate::update::CenterUpdateEngine;
use crate::{KMeansError, Result};

/// Why the iterative phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// An assignment phase changed no point.
    Converged,
    /// The iteration cap was hit first; the result is still consistent.
    MaxIterationsReached,
}

/// Distance bookkeeping for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningStats {
    /// Point-to-center distances actually evaluated during assignment phases.
    pub distance_computations: u64,
    /// What an exhaustive scan would have evaluated (`n · k` per phase).
    pub exhaustive_computations: u64,
    /// Point visits skipped without evaluating any distance.
    pub points_pruned: u64,
}

impl PruningStats {
    /// Fraction of exhaustive distance evaluations avoided, in `[0, 1]`.
    pub fn savings(&self) -> f64 {
        if self.exhaustive_computations == 0 {
            return 0.0;
        }
        1.0 - self.distance_computations as f64 / self.exhaustive_computations as f64
    }

    fn absorb(&mut self, phase: &PhaseStats, exhaustive: u64) {
        self.distance_computations += phase.distance_computations;
        self.exhaustive_computations += exhaustive;
        self.points_pruned += phase.pruned;
    }
}

/// Result of a single clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    /// Final center index of every point.
    pub assignments: Vec<usize>,
    /// Final centers as rows (`k` × `dim`).
    pub centers: DataMatrix,
    /// Number of assignment phases performed.
    pub iterations: usize,
    pub termination: Termination,
    /// Weighted sum of squared distances to the assigned centers.
    pub inertia: f64,
    /// Number of points assigned to each center.
    pub cluster_sizes: Vec<usize>,
    /// Total weight assigned to each center.
    pub cluster_weights: Vec<f64>,
    /// Weighted mean distance of each cluster's points to its center (0 when empty).
    pub mean_distances: Vec<f64>,
    pub stats: PruningStats,
}

impl ClusterOutcome {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Combined model + diagnostics returned from [`ClusterEngine::fit`].
#[derive(Debug, Clone)]
pub struct KMeansRun {
    pub model: KMeansModel,
    pub outcome: ClusterOutcome,
}

/// Runs k-means with the configured seeding, assignment strategy and scheduling.
#[derive(Debug, Clone)]
pub struct ClusterEngine<M: DistanceMetric = Euclidean> {
    config: KMeansConfig,
    metric: M,
}

impl<M: DistanceMetric> ClusterEngine<M> {
    pub fn new(config: KMeansConfig, metric: M) -> Self {
        Self { config, metric }
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// Cluster `data`, starting from `seeds` when given or from the configured
    /// seeding strategy otherwise.
    ///
    /// Configuration problems are reported before any iteration starts. The
    /// dataset is only read.
    pub fn cluster(&self, data: &Dataset, seeds: Option<&DataMatrix>) -> Result<ClusterOutcome> {
        self.config.validate(data)?;
        if let Some(seeds) = seeds {
            self.validate_seeds(data, seeds)?;
        }

        match self.config.parallelism {
            Parallelism::Threads(threads) => {
                let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
                debug!(threads, "running on a dedicated thread pool");
                pool.install(|| self.run(data, seeds))
            }
            Parallelism::Serial | Parallelism::Global => self.run(data, seeds),
        }
    }

    /// Cluster `data` from the configured seeding and package the centers as a model.
    pub fn fit(&self, data: &Dataset) -> Result<KMeansRun> {
        let outcome = self.cluster(data, None)?;
        let model = KMeansModel::new(self.config.clone(), outcome.centers.clone());
        Ok(KMeansRun { model, outcome })
    }

    fn validate_seeds(&self, data: &Dataset, seeds: &DataMatrix) -> Result<()> {
        if seeds.nrows() != self.config.k {
            return Err(KMeansError::InvalidConfig(format!(
                "expected {} seed centers, got {}",
                self.config.k,
                seeds.nrows()
            )));
        }
        if seeds.ncols() != data.dim() {
            return Err(KMeansError::InvalidConfig(format!(
                "seed dimensionality {} does not match data dimensionality {}",
                seeds.ncols(),
                data.dim()
            )));
        }
        Ok(())
    }

    fn run(&self, data: &Dataset, seeds: Option<&DataMatrix>) -> Result<ClusterOutcome> {
        let centers = match seeds {
            Some(seeds) => seeds.to_owned(),
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
                SeedSelector::new(self.config.init)
                    .with_parallel(self.config.parallelism.is_parallel())
                    .select(data, self.config.k, &self.metric, &mut rng)?
            }
        };

        info!(
            n = data.len(),
            dim = data.dim(),
            k = self.config.k,
            algorithm = %self.config.algorithm,
            init = %self.config.init,
            metric = self.metric.name(),
            parallelism = %self.config.parallelism,
            seeded_by_caller = seeds.is_some(),
            "starting kmeans clustering"
        );

        let outcome = match self.config.algorithm {
            Algorithm::Lloyd => self.iterate(&Lloyd, data, centers),
            Algorithm::Hamerly => self.iterate(&Hamerly, data, centers),
            Algorithm::Elkan => self.iterate(&Elkan, data, centers),
        };

        info!(
            iterations = outcome.iterations,
            converged = outcome.converged(),
            inertia = outcome.inertia,
            distance_computations = outcome.stats.distance_computations,
            savings = outcome.stats.savings(),
            "kmeans clustering finished"
        );
        Ok(outcome)
    }

    fn iterate<B: BoundTracker>(
        &self,
        tracker: &B,
        data: &Dataset,
        mut centers: DataMatrix,
    ) -> ClusterOutcome {
        let parallel = self.config.parallelism.is_parallel();
        let n = data.len();
        let k = centers.nrows();
        let exhaustive = (n * k) as u64;
        let chunk = partition_len(n, parallel);
        let updater = CenterUpdateEngine::new(parallel);
        let mut oracle = DistanceOracle::new(&self.metric, data.points().view());
        let mut totals = PruningStats::default();

        oracle.refresh_centers(centers.view());
        let mut geometry =
            Geometry::compute(centers.view(), &self.metric, B::NEEDS_PAIRWISE, parallel);
        let (mut states, first) = {
            let ctx = AssignContext {
                oracle: &oracle,
                centers: centers.view(),
                geometry: &geometry,
            };
            initial_states(tracker, &ctx, n, chunk, parallel)
        };
        totals.absorb(&first, exhaustive);
        let mut iterations = 1usize;
        debug!(
            iteration = iterations,
            distance_computations = first.distance_computations,
            "initial assignment complete"
        );

        let termination = loop {
            let assignments: Vec<usize> = states.iter().map(PointBounds::center).collect();
            let movement = updater.update(data, &assignments, &mut centers, &self.metric);
            if !movement.empty_clusters().is_empty() {
                warn!(
                    iteration = iterations,
                    empty = ?movement.empty_clusters(),
                    "clusters without assigned weight kept their previous centers"
                );
            }
            if iterations >= self.config.max_iter {
                break Termination::MaxIterationsReached;
            }

            oracle.refresh_centers(centers.view());
            geometry = Geometry::compute(centers.view(), &self.metric, B::NEEDS_PAIRWISE, parallel);
            for_each_partition(&mut states, chunk, parallel, |_, part| {
                for state in part.iter_mut() {
                    tracker.relax(state, &movement);
                }
                PhaseStats::default()
            });

            iterations += 1;
            let phase = {
                let ctx = AssignContext {
                    oracle: &oracle,
                    centers: centers.view(),
                    geometry: &geometry,
                };
                for_each_partition(&mut states, chunk, parallel, |start, part| {
                    let mut stats = PhaseStats::default();
                    for (offset, state) in part.iter_mut().enumerate() {
                        if tracker.reassign(&ctx, start + offset, state, &mut stats) {
                            stats.changed += 1;
                        }
                    }
                    stats
                })
            };
            totals.absorb(&phase, exhaustive);
            debug!(
                iteration = iterations,
                changed = phase.changed,
                distance_computations = phase.distance_computations,
                pruned = phase.pruned,
                max_shift = movement.max(),
                tight = states
                    .iter()
                    .filter(|s| s.status() == BoundStatus::Tight)
                    .count(),
                "assignment phase complete"
            );

            if phase.changed == 0 {
                break Termination::Converged;
            }
        };

        let assignments: Vec<usize> = states.iter().map(PointBounds::center).collect();
        summarise(
            data,
            &self.metric,
            assignments,
            centers,
            iterations,
            termination,
            totals,
            parallel,
        )
    }
}

/// Cluster `data` into `k` groups with the default Hamerly strategy and k-means++ seeding.
///
/// `seeds` bypasses seeding; `parallel` selects between rayon's global pool
/// and the calling thread.
pub fn cluster<M: DistanceMetric>(
    data: &Dataset,
    k: usize,
    metric: M,
    seeds: Option<&DataMatrix>,
    max_iter: usize,
    parallel: bool,
) -> Result<ClusterOutcome> {
    let config = KMeansConfig {
        k,
        max_iter,
        parallelism: if parallel {
            Parallelism::Global
        } else {
            Parallelism::Serial
        },
        ..KMeansConfig::default()
    };
    ClusterEngine::new(config, metric).cluster(data, seeds)
}

/// Contiguous partition length: one chunk per worker, or a single chunk when serial.
fn partition_len(n: usize, parallel: bool) -> usize {
    if parallel {
        n.div_ceil(rayon::current_num_threads().max(1)).max(1)
    } else {
        n.max(1)
    }
}

fn partition_ranges(n: usize, chunk: usize) -> Vec<Range<usize>> {
    (0..n)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(n))
        .collect()
}

fn initial_states<B, M>(
    tracker: &B,
    ctx: &AssignContext<'_, '_, M>,
    n: usize,
    chunk: usize,
    parallel: bool,
) -> (Vec<B::State>, PhaseStats)
where
    B: BoundTracker,
    M: DistanceMetric + ?Sized,
{
    let build = |range: Range<usize>| {
        let mut stats = PhaseStats::default();
        let states: Vec<B::State> = range
            .map(|idx| tracker.initial(ctx, idx, &mut stats))
            .collect();
        (states, stats)
    };
    let ranges = partition_ranges(n, chunk);
    let parts: Vec<(Vec<B::State>, PhaseStats)> = if parallel {
        ranges.into_par_iter().map(build).collect()
    } else {
        ranges.into_iter().map(build).collect()
    };

    let mut states = Vec::with_capacity(n);
    let mut total = PhaseStats::default();
    for (part, stats) in parts {
        states.extend(part);
        total += stats;
    }
    total.changed = n as u64;
    (states, total)
}

/// Apply `op` to contiguous chunks of `items`; `op` receives the index of the
/// chunk's first element. Returns after every chunk has finished.
fn for_each_partition<T, F>(items: &mut [T], chunk: usize, parallel: bool, op: F) -> PhaseStats
where
    T: Send,
    F: Fn(usize, &mut [T]) -> PhaseStats + Sync + Send,
{
    if parallel {
        items
            .par_chunks_mut(chunk)
            .enumerate()
            .map(|(i, part)| op(i * chunk, part))
            .reduce(PhaseStats::default, PhaseStats::merge)
    } else {
        items
            .chunks_mut(chunk)
            .enumerate()
            .map(|(i, part)| op(i * chunk, part))
            .fold(PhaseStats::default(), PhaseStats::merge)
    }
}

#[allow(clippy::too_many_arguments)]
fn summarise<M: DistanceMetric>(
    data: &Dataset,
    metric: &M,
    assignments: Vec<usize>,
    centers: DataMatrix,
    iterations: usize,
    termination: Termination,
    stats: PruningStats,
    parallel: bool,
) -> ClusterOutcome {
    let k = centers.nrows();
    let distance = |idx: usize| metric.distance(data.point(idx), centers.row(assignments[idx]));
    let distances: Vec<f64> = if parallel {
        (0..data.len()).into_par_iter().map(distance).collect()
    } else {
        (0..data.len()).map(distance).collect()
    };

    let mut cluster_sizes = vec![0usize; k];
    let mut cluster_weights = vec![0.0; k];
    let mut distance_sums = vec![0.0; k];
    let mut inertia = 0.0;
    for (idx, (&c, &d)) in assignments.iter().zip(&distances).enumerate() {
        let w = data.weight(idx);
        cluster_sizes[c] += 1;
        cluster_weights[c] += w;
        distance_sums[c] += w * d;
        inertia += w * d * d;
    }
    let mean_distances = distance_sums
        .iter()
        .zip(&cluster_weights)
        .map(|(&sum, &w)| if w > 0.0 { sum / w } else { 0.0 })
        .collect();

    ClusterOutcome {
        assignments,
        centers,
        iterations,
        termination,
        inertia,
        cluster_sizes,
        cluster_weights,
        mean_distances,
        stats,
    }
}
