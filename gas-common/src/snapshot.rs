use serde::{Deserialize, Serialize};

/// One recorded animation frame: the full particle state at a point in
/// simulated time, plus the chamber occupancy metric tracked by the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Simulated time (seconds) at which the frame was recorded.
    pub time: f64,
    /// Raw [x, y] positions of all particles.
    pub positions: Vec<(f64, f64)>,
    /// Raw [vx, vy] velocities of all particles.
    pub velocities: Vec<(f64, f64)>,
    /// Number of particles strictly left of the partition.
    pub first_chamber_count: u32,
}
