//! Progress snapshots and the saved measurement result.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hardware::Reading;
use crate::plan::MeasurementPlan;

/// Grid-shaped array holding one value pair per measurement point.
///
/// Cells are laid out z-major (`[iz][iy][ix]`), the way the result was always stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGrid {
    shape: [usize; 3],
    values: Vec<[f64; 2]>,
}

impl DataGrid {
    /// Zero-filled grid for `shape` = `[nx, ny, nz]`.
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            values: vec![[0.0; 2]; shape[0] * shape[1] * shape[2]],
        }
    }

    /// Number of points per axis, ordered x, y, z.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn offset(&self, ix: usize, iy: usize, iz: usize) -> Option<usize> {
        let [nx, ny, nz] = self.shape;
        (ix < nx && iy < ny && iz < nz).then(|| (iz * ny + iy) * nx + ix)
    }

    /// Value pair at the given indices.
    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> Option<[f64; 2]> {
        self.offset(ix, iy, iz).map(|i| self.values[i])
    }

    /// Store a reading. Returns `false` for indices outside the grid.
    #[must_use]
    pub fn set(&mut self, ix: usize, iy: usize, iz: usize, reading: Reading) -> bool {
        match self.offset(ix, iy, iz) {
            Some(i) => {
                self.values[i] = reading.as_pair();
                true
            }
            None => false,
        }
    }

    /// Raw cells in z-major order.
    pub fn values(&self) -> &[[f64; 2]] {
        &self.values
    }
}

/// Immutable snapshot of a run, replaced wholesale after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementProgress {
    /// Readings acquired so far
    pub data: DataGrid,
    /// Completion, 0 to 100
    pub percent: u8,
    /// Route index of the last completed step
    pub last_index: Option<usize>,
    /// Number of steps in the route
    pub total_steps: usize,
}

impl MeasurementProgress {
    /// Empty progress for a fresh run.
    pub fn new(shape: [usize; 3], total_steps: usize) -> Self {
        Self {
            data: DataGrid::zeros(shape),
            percent: 0,
            last_index: None,
            total_steps,
        }
    }

    /// Number of completed steps.
    pub fn completed(&self) -> usize {
        self.last_index.map_or(0, |i| i + 1)
    }

    /// Route index the next run continues from.
    pub fn next_index(&self) -> usize {
        self.completed()
    }

    /// Whether every step was acquired.
    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total_steps
    }

    /// `round(100 * completed / total)`, 100 for an empty route.
    pub fn percent_of(completed: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        let percent = (100.0 * completed as f64 / total as f64).round();
        percent.clamp(0.0, 100.0) as u8
    }
}

/// A plan with its data, as handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// The executed plan, grid included
    pub plan: MeasurementPlan,
    /// Creation time, microseconds since the Unix epoch
    pub date: i64,
    /// Run the data belongs to
    pub run_id: Option<Uuid>,
    /// Whether every route step was acquired
    pub complete: bool,
    /// Acquired readings
    pub data: DataGrid,
}

impl MeasurementResult {
    /// Build a result stamped with the current time.
    pub fn new(plan: MeasurementPlan, progress: &MeasurementProgress, run_id: Option<Uuid>) -> Self {
        Self {
            plan,
            date: Utc::now().timestamp_micros(),
            run_id,
            complete: progress.is_complete(),
            data: progress.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_grid_is_z_major() {
        let mut grid = DataGrid::zeros([3, 2, 2]);
        assert!(grid.set(2, 1, 1, Reading::new(7.0, 1.0)));
        assert_eq!(grid.values()[(1 * 2 + 1) * 3 + 2], [7.0, 1.0]);
        assert_eq!(grid.get(2, 1, 1), Some([7.0, 1.0]));
        assert!(!grid.set(3, 0, 0, Reading::default()));
        assert_eq!(grid.get(0, 2, 0), None);
    }

    #[test]
    fn percent_rounds() {
        assert_eq!(MeasurementProgress::percent_of(0, 3), 0);
        assert_eq!(MeasurementProgress::percent_of(1, 3), 33);
        assert_eq!(MeasurementProgress::percent_of(2, 3), 67);
        assert_eq!(MeasurementProgress::percent_of(3, 3), 100);
        assert_eq!(MeasurementProgress::percent_of(1, 200), 1);
        assert_eq!(MeasurementProgress::percent_of(1, 201), 0);
    }

    #[test]
    fn completion_tracks_last_index() {
        let mut progress = MeasurementProgress::new([2, 1, 1], 2);
        assert_eq!(progress.completed(), 0);
        assert!(!progress.is_complete());
        progress.last_index = Some(1);
        assert_eq!(progress.next_index(), 2);
        assert!(progress.is_complete());
    }
}
