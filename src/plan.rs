//! Measurement plan and its materialized grid.
//!
//! A [`MeasurementPlan`] is declarative: a box in the global frame, a spacing per axis
//! and an orientation flag. The grid of coordinates is expanded once, when the engine
//! configures the plan, and travels with the plan into the saved result.

use crate::error::{AppResult, TankError};
use crate::geometry::{Axis, Tank, Vec3};
use serde::{Deserialize, Serialize};

/// Largest grid a plan may expand to unless the stage configuration says otherwise.
pub const DEFAULT_MAX_GRID_POINTS: usize = 1_000_000;

/// `round((max - min) / spacing) + 1`, or `None` when that is not a usable count.
fn axis_point_count(min: f64, max: f64, spacing: f64) -> Option<usize> {
    let steps = ((max - min) / spacing + 0.5).floor();
    if !(steps.is_finite() && steps >= 0.0 && steps < usize::MAX as f64) {
        return None;
    }
    (steps as usize).checked_add(1)
}

/// Ordered coordinates per axis, each spanning min..=max in spacing-sized steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Coordinates along x
    pub x: Vec<f64>,
    /// Coordinates along y
    pub y: Vec<f64>,
    /// Coordinates along z
    pub z: Vec<f64>,
}

impl Grid {
    /// Expand the grid for the given corners and spacing.
    ///
    /// Each axis gets `round((max - min) / spacing) + 1` points; the half-step term
    /// keeps floating error from dropping the last fencepost.
    pub fn expand(min: &Vec3, max: &Vec3, spacing: &Vec3) -> Self {
        let axis = |i: usize| -> Vec<f64> {
            let count = axis_point_count(min[i], max[i], spacing[i]).unwrap_or(0);
            (0..count).map(|k| min[i] + k as f64 * spacing[i]).collect()
        };
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
        }
    }

    /// Coordinates along one axis.
    pub fn axis(&self, axis: Axis) -> &[f64] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Number of points per axis, ordered x, y, z.
    pub fn shape(&self) -> [usize; 3] {
        [self.x.len(), self.y.len(), self.z.len()]
    }

    /// Total number of grid points, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.x
            .len()
            .saturating_mul(self.y.len())
            .saturating_mul(self.z.len())
    }

    /// Whether the grid has no points at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Global coordinates of the point at the given indices.
    pub fn point(&self, ix: usize, iy: usize, iz: usize) -> Vec3 {
        [self.x[ix], self.y[iy], self.z[iz]]
    }
}

/// A plan of measurement to execute in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPlan {
    /// Name of the measurement
    pub name: String,
    /// Tank the measurement is made in
    pub tank: Tank,
    /// Probe long axis along the tank z axis (vertical) or y axis (horizontal)
    pub is_vertical: bool,
    /// Lowest corner of the scanned box in the global frame
    pub min_position: Vec3,
    /// Highest corner of the scanned box in the global frame
    pub max_position: Vec3,
    /// Distance between neighbouring grid points, per axis
    pub grid_spacing: Vec3,
    #[serde(default)]
    grid: Option<Grid>,
}

impl MeasurementPlan {
    /// Create a plan; the grid is not expanded until [`materialize_grid`](Self::materialize_grid).
    pub fn new(
        name: impl Into<String>,
        tank: Tank,
        is_vertical: bool,
        min_position: Vec3,
        max_position: Vec3,
        grid_spacing: Vec3,
    ) -> AppResult<Self> {
        let plan = Self {
            name: name.into(),
            tank,
            is_vertical,
            min_position,
            max_position,
            grid_spacing,
            grid: None,
        };
        plan.check_spacing()?;
        Ok(plan)
    }

    fn check_spacing(&self) -> AppResult<()> {
        for axis in Axis::ALL {
            let spacing = self.grid_spacing[axis.index()];
            if !(spacing.is_finite() && spacing > 0.0) {
                return Err(TankError::InvalidPlan(format!(
                    "grid spacing on axis {} must be positive, got {}",
                    axis, spacing
                )));
            }
        }
        Ok(())
    }

    /// Expand and store the grid, capped at [`DEFAULT_MAX_GRID_POINTS`].
    pub fn materialize_grid(&mut self) -> AppResult<&Grid> {
        self.materialize_grid_limited(DEFAULT_MAX_GRID_POINTS)
    }

    /// Expand and store the grid. Idempotent for an unchanged plan.
    ///
    /// The point count is checked against `max_points` before anything is allocated.
    pub fn materialize_grid_limited(&mut self, max_points: usize) -> AppResult<&Grid> {
        self.check_spacing()?;
        for axis in Axis::ALL {
            let i = axis.index();
            let (min, max) = (self.min_position[i], self.max_position[i]);
            if !(min.is_finite() && max.is_finite()) {
                return Err(TankError::InvalidPlan(format!(
                    "scan bounds on axis {axis} must be finite, got {min}..{max}"
                )));
            }
            if min > max {
                return Err(TankError::InvertedBounds { axis });
            }
        }

        let mut total: usize = 1;
        for axis in Axis::ALL {
            let i = axis.index();
            total = axis_point_count(
                self.min_position[i],
                self.max_position[i],
                self.grid_spacing[i],
            )
            .and_then(|count| total.checked_mul(count))
            .filter(|&points| points <= max_points)
            .ok_or_else(|| {
                TankError::InvalidPlan(format!(
                    "grid for plan '{}' exceeds the limit of {max_points} points",
                    self.name
                ))
            })?;
        }

        let grid = Grid::expand(&self.min_position, &self.max_position, &self.grid_spacing);
        Ok(self.grid.insert(grid))
    }

    /// The expanded grid, if the plan has been configured.
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    /// Spacing along one axis; the distance a motor travels per route step.
    pub fn spacing(&self, axis: Axis) -> f64 {
        self.grid_spacing[axis.index()]
    }

    /// Grid corner a route for this plan enters the volume at.
    ///
    /// Vertical plans start at (min x, min y, max z), horizontal ones at
    /// (min x, max y, min z). `None` until the grid is materialized.
    pub fn local_start(&self) -> Option<Vec3> {
        let grid = self.grid.as_ref()?;
        let (y, z) = if self.is_vertical {
            (grid.y.first().copied()?, grid.z.last().copied()?)
        } else {
            (grid.y.last().copied()?, grid.z.first().copied()?)
        };
        Some([grid.x.first().copied()?, y, z])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank() -> Tank {
        Tank::new("t", [0.2, 0.1, 0.2], [0.0; 3]).unwrap()
    }

    #[test]
    fn grid_is_fencepost_inclusive() {
        let mut plan =
            MeasurementPlan::new("p", tank(), true, [0.0; 3], [0.19, 0.09, 0.19], [0.01; 3])
                .unwrap();
        let grid = plan.materialize_grid().unwrap();
        assert_eq!(grid.shape(), [20, 10, 20]);
        assert_eq!(grid.len(), 4000);
        assert!((grid.x[19] - 0.19).abs() < 1e-12);
    }

    #[test]
    fn half_step_epsilon_keeps_last_point() {
        // 0.3 / 0.1 evaluates to 2.9999999999999996 in floating point
        let grid = Grid::expand(&[0.0; 3], &[0.3, 0.0, 0.0], &[0.1, 1.0, 1.0]);
        assert_eq!(grid.shape(), [4, 1, 1]);
    }

    #[test]
    fn degenerate_axis_has_one_point() {
        let grid = Grid::expand(&[0.05; 3], &[0.05; 3], &[0.01; 3]);
        assert_eq!(grid.shape(), [1, 1, 1]);
        assert_eq!(grid.point(0, 0, 0), [0.05; 3]);
    }

    #[test]
    fn rejects_non_positive_spacing() {
        let result = MeasurementPlan::new("p", tank(), true, [0.0; 3], [0.1; 3], [0.01, 0.0, 0.01]);
        assert!(matches!(result, Err(TankError::InvalidPlan(_))));
    }

    #[test]
    fn materialize_rejects_inverted_bounds() {
        let mut plan =
            MeasurementPlan::new("p", tank(), true, [0.1, 0.0, 0.0], [0.0, 0.1, 0.1], [0.01; 3])
                .unwrap();
        assert!(matches!(
            plan.materialize_grid(),
            Err(TankError::InvertedBounds { axis: Axis::X })
        ));
        assert!(plan.grid().is_none());
    }

    #[test]
    fn oversized_grid_is_rejected_before_expansion() {
        // 3e6 points per axis: the product overflows usize on every platform
        let mut plan =
            MeasurementPlan::new("fine", tank(), true, [0.1; 3], [0.4; 3], [1e-7; 3]).unwrap();
        assert!(matches!(
            plan.materialize_grid(),
            Err(TankError::InvalidPlan(_))
        ));
        assert!(plan.grid().is_none());
    }

    #[test]
    fn grid_limit_is_inclusive() {
        let mut plan =
            MeasurementPlan::new("p", tank(), true, [0.0; 3], [0.19, 0.09, 0.19], [0.01; 3])
                .unwrap();
        assert!(plan.materialize_grid_limited(3999).is_err());
        assert_eq!(plan.materialize_grid_limited(4000).unwrap().len(), 4000);
    }

    #[test]
    fn non_finite_bounds_are_rejected() {
        let mut plan =
            MeasurementPlan::new("p", tank(), true, [0.0, f64::NAN, 0.0], [0.1; 3], [0.01; 3])
                .unwrap();
        assert!(matches!(
            plan.materialize_grid(),
            Err(TankError::InvalidPlan(_))
        ));

        plan.min_position = [0.0; 3];
        plan.max_position[2] = f64::INFINITY;
        assert!(matches!(
            plan.materialize_grid(),
            Err(TankError::InvalidPlan(_))
        ));
    }

    #[test]
    fn local_start_depends_on_orientation() {
        let mut vertical =
            MeasurementPlan::new("v", tank(), true, [0.01, 0.02, 0.03], [0.05, 0.06, 0.07], [0.01; 3])
                .unwrap();
        assert!(vertical.local_start().is_none());
        vertical.materialize_grid().unwrap();
        let start = vertical.local_start().unwrap();
        assert!((start[1] - 0.02).abs() < 1e-12);
        assert!((start[2] - 0.07).abs() < 1e-12);

        let mut horizontal = vertical.clone();
        horizontal.is_vertical = false;
        horizontal.materialize_grid().unwrap();
        let start = horizontal.local_start().unwrap();
        assert!((start[1] - 0.06).abs() < 1e-12);
        assert!((start[2] - 0.03).abs() < 1e-12);
    }
}
