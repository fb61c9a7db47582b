//! Per-point bound tracking for the assignment phase.
//!
//! Hamerly keeps, for every point, an upper bound `u` on the distance to its
//! own center and a single lower bound `l` on the distance to every other
//! center. Elkan keeps one lower bound per center. After centers move, `u`
//! grows by the movement of the own center and the lower bounds shrink by the
//! movement of the others; while `u` stays below the relevant lower bound the
//! triangle inequality proves no other center can be closer, and the point is
//! skipped.
//!
//! All pruning tests are strict and every scan breaks ties towards the lowest
//! center index, so each strategy assigns exactly like the exhaustive Lloyd
//! scan.

use std::ops::AddAssign;

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::distance::{DistanceMetric, DistanceOracle};
use crate::update::CenterMovement;

/// Freshness of a point's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundStatus {
    /// Recomputed exactly during the latest assignment phase.
    Tight,
    /// Loosened by center movement since the last exact computation.
    Relaxed,
}

/// Counters accumulated by one task during a partitioned phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PhaseStats {
    pub(crate) changed: u64,
    pub(crate) distance_computations: u64,
    pub(crate) pruned: u64,
}

impl AddAssign for PhaseStats {
    fn add_assign(&mut self, rhs: Self) {
        self.changed += rhs.changed;
        self.distance_computations += rhs.distance_computations;
        self.pruned += rhs.pruned;
    }
}

impl PhaseStats {
    pub(crate) fn merge(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

/// Center-to-center distances for the current iteration.
pub(crate) struct Geometry {
    k: usize,
    /// Half the distance from each center to its nearest other center.
    half_nearest: Vec<f64>,
    /// Row-major `k × k` half distances; empty unless requested.
    half_pairwise: Vec<f64>,
}

impl Geometry {
    pub(crate) fn compute<M>(
        centers: ArrayView2<'_, f64>,
        metric: &M,
        pairwise: bool,
        parallel: bool,
    ) -> Self
    where
        M: DistanceMetric + ?Sized,
    {
        let k = centers.nrows();
        let row = |i: usize| -> Vec<f64> {
            (0..k)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        0.5 * metric.distance(centers.row(i), centers.row(j))
                    }
                })
                .collect()
        };
        let rows: Vec<Vec<f64>> = if parallel {
            (0..k).into_par_iter().map(row).collect()
        } else {
            (0..k).map(row).collect()
        };

        let half_nearest = rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, &d)| d)
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let half_pairwise = if pairwise {
            rows.into_iter().flatten().collect()
        } else {
            Vec::new()
        };

        Self {
            k,
            half_nearest,
            half_pairwise,
        }
    }

    pub(crate) fn half_nearest(&self, c: usize) -> f64 {
        self.half_nearest[c]
    }

    pub(crate) fn half_pair(&self, a: usize, b: usize) -> f64 {
        self.half_pairwise[a * self.k + b]
    }
}

/// Read-only view shared by every task of one assignment phase.
pub(crate) struct AssignContext<'a, 'o, M: DistanceMetric + ?Sized> {
    pub(crate) oracle: &'o DistanceOracle<'a, M>,
    pub(crate) centers: ArrayView2<'o, f64>,
    pub(crate) geometry: &'o Geometry,
}

impl<M: DistanceMetric + ?Sized> AssignContext<'_, '_, M> {
    pub(crate) fn k(&self) -> usize {
        self.centers.nrows()
    }

    fn distance(&self, idx: usize, c: usize, stats: &mut PhaseStats) -> f64 {
        stats.distance_computations += 1;
        self.oracle.point_to_center(idx, self.centers, c)
    }

    /// Exhaustive scan; `all` receives every distance when provided.
    fn scan(&self, idx: usize, stats: &mut PhaseStats, mut all: Option<&mut [f64]>) -> Scan {
        let mut scan = Scan {
            best: 0,
            best_distance: f64::INFINITY,
            runner_up: f64::INFINITY,
        };
        for c in 0..self.k() {
            let d = self.distance(idx, c, stats);
            if let Some(all) = all.as_deref_mut() {
                all[c] = d;
            }
            if d < scan.best_distance {
                scan.runner_up = scan.best_distance;
                scan.best_distance = d;
                scan.best = c;
            } else if d < scan.runner_up {
                scan.runner_up = d;
            }
        }
        scan
    }
}

struct Scan {
    best: usize,
    best_distance: f64,
    runner_up: f64,
}

/// Uniform access to the bound state of one point.
pub(crate) trait PointBounds {
    /// Center the point is currently assigned to.
    fn center(&self) -> usize;
    fn status(&self) -> BoundStatus;
    /// Upper bound on the distance to the assigned center.
    fn upper_bound(&self) -> f64;
    /// Lower bound on the distance to center `c` (`c` is not the assigned center).
    fn lower_bound(&self, c: usize) -> f64;
}

/// Assignment strategy with its own per-point state.
///
/// `initial` and `reassign` only touch the state of point `idx`, which lets
/// the engine hand disjoint slices of the state array to different workers.
pub(crate) trait BoundTracker: Sync {
    type State: PointBounds + Send + Sync;

    /// Whether [`Geometry`] must carry the full pairwise table.
    const NEEDS_PAIRWISE: bool;

    /// Exact assignment of point `idx` against every center.
    fn initial<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        stats: &mut PhaseStats,
    ) -> Self::State;

    /// Re-evaluate point `idx`; returns whether its center changed.
    fn reassign<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        state: &mut Self::State,
        stats: &mut PhaseStats,
    ) -> bool;

    /// Loosen the bounds of one point after the centers moved.
    fn relax(&self, state: &mut Self::State, movement: &CenterMovement);
}

/// Exhaustive baseline: no bounds, every point is rescanned each iteration.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Lloyd;

#[derive(Debug, Clone)]
pub(crate) struct LloydState {
    center: usize,
}

impl PointBounds for LloydState {
    fn center(&self) -> usize {
        self.center
    }

    fn status(&self) -> BoundStatus {
        BoundStatus::Tight
    }

    fn upper_bound(&self) -> f64 {
        f64::INFINITY
    }

    fn lower_bound(&self, _c: usize) -> f64 {
        0.0
    }
}

impl BoundTracker for Lloyd {
    type State = LloydState;
    const NEEDS_PAIRWISE: bool = false;

    fn initial<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        stats: &mut PhaseStats,
    ) -> LloydState {
        LloydState {
            center: ctx.scan(idx, stats, None).best,
        }
    }

    fn reassign<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        state: &mut LloydState,
        stats: &mut PhaseStats,
    ) -> bool {
        let best = ctx.scan(idx, stats, None).best;
        let changed = best != state.center;
        state.center = best;
        changed
    }

    fn relax(&self, _state: &mut LloydState, _movement: &CenterMovement) {}
}

/// Hamerly's single-lower-bound strategy.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Hamerly;

#[derive(Debug, Clone)]
pub(crate) struct HamerlyState {
    center: usize,
    upper: f64,
    lower: f64,
    status: BoundStatus,
}

impl PointBounds for HamerlyState {
    fn center(&self) -> usize {
        self.center
    }

    fn status(&self) -> BoundStatus {
        self.status
    }

    fn upper_bound(&self) -> f64 {
        self.upper
    }

    fn lower_bound(&self, _c: usize) -> f64 {
        self.lower
    }
}

impl BoundTracker for Hamerly {
    type State = HamerlyState;
    const NEEDS_PAIRWISE: bool = false;

    fn initial<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        stats: &mut PhaseStats,
    ) -> HamerlyState {
        let scan = ctx.scan(idx, stats, None);
        HamerlyState {
            center: scan.best,
            upper: scan.best_distance,
            lower: scan.runner_up,
            status: BoundStatus::Tight,
        }
    }

    fn reassign<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        state: &mut HamerlyState,
        stats: &mut PhaseStats,
    ) -> bool {
        let threshold = state.lower.max(ctx.geometry.half_nearest(state.center));
        if state.upper < threshold {
            stats.pruned += 1;
            return false;
        }

        state.upper = ctx.distance(idx, state.center, stats);
        if state.upper < threshold {
            return false;
        }

        let scan = ctx.scan(idx, stats, None);
        let changed = scan.best != state.center;
        *state = HamerlyState {
            center: scan.best,
            upper: scan.best_distance,
            lower: scan.runner_up,
            status: BoundStatus::Tight,
        };
        changed
    }

    fn relax(&self, state: &mut HamerlyState, movement: &CenterMovement) {
        if movement.max() == 0.0 {
            return;
        }
        state.upper += movement.shift(state.center);
        state.lower -= movement.max_excluding(state.center);
        state.status = BoundStatus::Relaxed;
    }
}

/// Elkan's per-center lower bound strategy.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Elkan;

#[derive(Debug, Clone)]
pub(crate) struct ElkanState {
    center: usize,
    upper: f64,
    lower: Vec<f64>,
    status: BoundStatus,
}

impl PointBounds for ElkanState {
    fn center(&self) -> usize {
        self.center
    }

    fn status(&self) -> BoundStatus {
        self.status
    }

    fn upper_bound(&self) -> f64 {
        self.upper
    }

    fn lower_bound(&self, c: usize) -> f64 {
        self.lower[c]
    }
}

impl BoundTracker for Elkan {
    type State = ElkanState;
    const NEEDS_PAIRWISE: bool = true;

    fn initial<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        stats: &mut PhaseStats,
    ) -> ElkanState {
        let mut lower = vec![0.0; ctx.k()];
        let scan = ctx.scan(idx, stats, Some(lower.as_mut_slice()));
        ElkanState {
            center: scan.best,
            upper: scan.best_distance,
            lower,
            status: BoundStatus::Tight,
        }
    }

    fn reassign<M: DistanceMetric + ?Sized>(
        &self,
        ctx: &AssignContext<'_, '_, M>,
        idx: usize,
        state: &mut ElkanState,
        stats: &mut PhaseStats,
    ) -> bool {
        let original = state.center;
        if state.upper < ctx.geometry.half_nearest(original) {
            stats.pruned += 1;
            return false;
        }

        let mut stale = state.status == BoundStatus::Relaxed;
        let mut assigned = original;
        for c in 0..ctx.k() {
            if c == assigned {
                continue;
            }
            let bound = state.lower[c].max(ctx.geometry.half_pair(assigned, c));
            if state.upper < bound {
                continue;
            }
            if stale {
                let d = ctx.distance(idx, assigned, stats);
                state.upper = d;
                state.lower[assigned] = d;
                stale = false;
                if state.upper < bound {
                    continue;
                }
            }
            let d = ctx.distance(idx, c, stats);
            state.lower[c] = d;
            if d < state.upper || (d == state.upper && c < assigned) {
                assigned = c;
                state.upper = d;
            }
        }

        state.center = assigned;
        if !stale {
            state.status = BoundStatus::Tight;
        }
        assigned != original
    }

    fn relax(&self, state: &mut ElkanState, movement: &CenterMovement) {
        if movement.max() == 0.0 {
            return;
        }
        state.upper += movement.shift(state.center);
        for (lower, &shift) in state.lower.iter_mut().zip(movement.shifts()) {
            *lower = (*lower - shift).max(0.0);
        }
        state.status = BoundStatus::Relaxed;
    }
}
