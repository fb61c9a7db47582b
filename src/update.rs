//! Center recomputation and movement tracking.

use ndarray::Array1;
use rayon::prelude::*;

use crate::data::{DataMatrix, Dataset};
use crate::distance::DistanceMetric;

/// How far every center moved during one update pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterMovement {
    shifts: Vec<f64>,
    largest: Option<usize>,
    second_largest: f64,
    empty: Vec<usize>,
}

impl CenterMovement {
    /// Summarise per-center shifts; `empty` lists centers that kept their position
    /// because no weight was assigned to them.
    pub fn new(shifts: Vec<f64>, empty: Vec<usize>) -> Self {
        let mut largest: Option<usize> = None;
        let mut second_largest = 0.0f64;
        for (c, &shift) in shifts.iter().enumerate() {
            match largest {
                Some(top) if shift <= shifts[top] => {
                    second_largest = second_largest.max(shift);
                }
                Some(top) => {
                    second_largest = shifts[top];
                    largest = Some(c);
                }
                None => largest = Some(c),
            }
        }
        Self {
            shifts,
            largest,
            second_largest,
            empty,
        }
    }

    pub fn shift(&self, center: usize) -> f64 {
        self.shifts[center]
    }

    pub fn shifts(&self) -> &[f64] {
        &self.shifts
    }

    /// Largest shift of any center.
    pub fn max(&self) -> f64 {
        self.largest.map_or(0.0, |c| self.shifts[c])
    }

    /// Largest shift among all centers other than `center`.
    pub fn max_excluding(&self, center: usize) -> f64 {
        match self.largest {
            Some(top) if top == center => self.second_largest,
            Some(top) => self.shifts[top],
            None => 0.0,
        }
    }

    /// Centers that received no weight and kept their previous position.
    pub fn empty_clusters(&self) -> &[usize] {
        &self.empty
    }
}

/// Replaces every center with the weighted mean of the points assigned to it.
///
/// Work is partitioned over centers: each center's mean is accumulated by a
/// single task, visiting its members in ascending point order, so serial and
/// parallel runs produce bit-identical centers.
#[derive(Debug, Clone, Copy)]
pub struct CenterUpdateEngine {
    parallel: bool,
}

impl CenterUpdateEngine {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Recompute `centers` from `assignments` and report the movement.
    ///
    /// Centers without assigned weight keep their position and move by zero.
    pub fn update<M>(
        &self,
        data: &Dataset,
        assignments: &[usize],
        centers: &mut DataMatrix,
        metric: &M,
    ) -> CenterMovement
    where
        M: DistanceMetric + ?Sized,
    {
        let k = centers.nrows();
        debug_assert_eq!(assignments.len(), data.len());

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (idx, &c) in assignments.iter().enumerate() {
            members[c].push(idx);
        }

        let previous = &*centers;
        let recompute = |c: usize| -> Option<(Array1<f64>, f64)> {
            let mean = weighted_mean(data, &members[c])?;
            let shift = metric.distance(previous.row(c), mean.view());
            Some((mean, shift))
        };
        let updated: Vec<Option<(Array1<f64>, f64)>> = if self.parallel {
            (0..k).into_par_iter().map(recompute).collect()
        } else {
            (0..k).map(recompute).collect()
        };

        let mut next = previous.clone();
        let mut shifts = vec![0.0; k];
        let mut empty = Vec::new();
        for (c, result) in updated.into_iter().enumerate() {
            match result {
                Some((mean, shift)) => {
                    next.row_mut(c).assign(&mean);
                    shifts[c] = shift;
                }
                None => empty.push(c),
            }
        }
        *centers = next;

        CenterMovement::new(shifts, empty)
    }
}

fn weighted_mean(data: &Dataset, members: &[usize]) -> Option<Array1<f64>> {
    let mut sum = Array1::<f64>::zeros(data.dim());
    let mut total = 0.0;
    for &idx in members {
        let weight = data.weight(idx);
        if weight == 0.0 {
            continue;
        }
        sum.scaled_add(weight, &data.point(idx));
        total += weight;
    }
    if total > 0.0 {
        Some(sum / total)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Euclidean;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn centers_move_to_weighted_means() {
        let data = Dataset::with_weights(
            array![[0.0, 0.0], [2.0, 0.0], [10.0, 10.0], [10.0, 12.0]],
            array![1.0, 3.0, 1.0, 1.0],
        )
        .unwrap();
        let mut centers = array![[0.0, 0.0], [10.0, 10.0]];
        let movement = CenterUpdateEngine::new(false).update(
            &data,
            &[0, 0, 1, 1],
            &mut centers,
            &Euclidean::default(),
        );

        assert_relative_eq!(centers[(0, 0)], 1.5);
        assert_relative_eq!(centers[(0, 1)], 0.0);
        assert_relative_eq!(centers[(1, 1)], 11.0);
        assert_relative_eq!(movement.shift(0), 1.5);
        assert_relative_eq!(movement.shift(1), 1.0);
        assert_relative_eq!(movement.max(), 1.5);
        assert!(movement.empty_clusters().is_empty());
    }

    #[test]
    fn second_update_without_reassignment_is_still() {
        let data = Dataset::new(array![
            [0.3, 1.7],
            [2.9, 0.1],
            [5.5, 5.25],
            [6.1, 4.4],
            [7.0, 7.7]
        ]);
        let assignments = [0, 0, 1, 1, 1];
        let mut centers = array![[0.0, 0.0], [5.0, 5.0]];
        let engine = CenterUpdateEngine::new(true);
        let first = engine.update(&data, &assignments, &mut centers, &Euclidean::default());
        assert!(first.max() > 0.0);

        let snapshot = centers.clone();
        let second = engine.update(&data, &assignments, &mut centers, &Euclidean::default());
        assert_eq!(second.max(), 0.0);
        assert_eq!(centers, snapshot);
    }

    #[test]
    fn empty_cluster_keeps_its_position() {
        let data = Dataset::new(array![[1.0], [2.0], [3.0]]);
        let mut centers = array![[2.0], [100.0]];
        let movement = CenterUpdateEngine::new(false).update(
            &data,
            &[0, 0, 0],
            &mut centers,
            &Euclidean::default(),
        );
        assert_eq!(centers[(1, 0)], 100.0);
        assert_eq!(movement.shift(1), 0.0);
        assert_eq!(movement.empty_clusters(), &[1]);
    }

    #[test]
    fn zero_weight_members_count_as_empty() {
        let data = Dataset::with_weights(array![[1.0], [5.0]], array![1.0, 0.0]).unwrap();
        let mut centers = array![[0.0], [4.0]];
        let movement = CenterUpdateEngine::new(false).update(
            &data,
            &[0, 1],
            &mut centers,
            &Euclidean::default(),
        );
        assert_eq!(centers[(1, 0)], 4.0);
        assert_eq!(movement.empty_clusters(), &[1]);
    }

    #[test]
    fn serial_and_parallel_updates_are_identical() {
        let data = Dataset::new(array![[0.1, 0.2], [0.3, 0.4], [9.0, 8.0], [8.5, 9.5], [0.2, 0.1]]);
        let assignments = [0, 0, 1, 1, 0];
        let mut serial = array![[0.0, 0.0], [9.0, 9.0]];
        let mut parallel = serial.clone();
        let metric = Euclidean::default();
        let a = CenterUpdateEngine::new(false).update(&data, &assignments, &mut serial, &metric);
        let b = CenterUpdateEngine::new(true).update(&data, &assignments, &mut parallel, &metric);
        assert_eq!(serial, parallel);
        assert_eq!(a, b);
    }

    #[test]
    fn movement_tracks_runner_up() {
        let movement = CenterMovement::new(vec![0.5, 3.0, 1.25, 3.0], vec![]);
        assert_eq!(movement.max(), 3.0);
        // Ties for the maximum leave the runner-up equal to it.
        assert_eq!(movement.max_excluding(1), 3.0);
        assert_eq!(movement.max_excluding(0), 3.0);

        let single = CenterMovement::new(vec![0.5, 4.0, 1.0], vec![]);
        assert_eq!(single.max_excluding(1), 1.0);
        assert_eq!(single.max_excluding(2), 4.0);
        assert_eq!(CenterMovement::new(vec![2.0], vec![]).max_excluding(0), 0.0);
    }
}
