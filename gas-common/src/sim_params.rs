use serde::{Deserialize, Serialize};

/// Runtime parameters derived from the configuration, used on every simulation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Box geometry
    pub width: f64,
    pub height: f64,
    /// x-coordinate of the partition separating the two chambers.
    pub split_x: f64,
    /// Lower edge of the gap in the partition.
    pub hole_y_min: f64,
    /// Upper edge of the gap in the partition.
    pub hole_y_max: f64,

    // Lennard-Jones interaction
    /// Depth of the potential well.
    pub epsilon: f64,
    /// Equilibrium pair distance (zero-force separation).
    pub rm: f64,
    /// Exponent of the repulsive term (L).
    pub repulsive_exponent: f64,
    /// Exponent of the attractive term (J).
    pub attractive_exponent: f64,
    /// Precomputed L * epsilon / rm.
    pub force_coefficient: f64,
    /// Maximum separation at which pair forces are evaluated.
    pub cutoff: f64,
    /// Radius stamped onto wall proxy particles.
    pub particle_radius: f64,

    // Time
    pub dt: f64,

    /// Substitute the previous velocity when an integration step produces an
    /// exactly-zero velocity on both axes (numerical stall, not genuine rest).
    pub stall_guard: bool,
}

impl SimParams {
    /// Chamber membership: strictly left of the partition is the first chamber.
    #[inline(always)]
    pub fn in_first_chamber(&self, x: f64) -> bool {
        x < self.split_x
    }

    /// True when `y` lies strictly inside the partition gap.
    #[inline(always)]
    pub fn within_hole(&self, y: f64) -> bool {
        y > self.hole_y_min && y < self.hole_y_max
    }
}
