use crate::sim_params::SimParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Configuration for the box geometry
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeometryConfig {
    pub width: f64,
    pub height: f64,
    /// x-coordinate of the partition that splits the box into two chambers.
    pub partition_x: f64,
    /// y-coordinate of the lower edge of the gap in the partition.
    pub hole_y: f64,
    /// Vertical extent of the gap.
    pub hole_height: f64,
}

// Lennard-Jones interaction constants
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InteractionConfig {
    pub epsilon: f64,
    pub rm: f64,
    /// Repulsive-term exponent (L). Must exceed the attractive exponent.
    pub repulsive_exponent: f64,
    /// Attractive-term exponent (J).
    pub attractive_exponent: f64,
    pub cutoff: f64,
}

// Initial particle population
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParticlesConfig {
    pub count: u32,
    pub mass: f64,
    pub radius: f64,
    /// Magnitude of every particle's initial velocity; directions are random.
    pub initial_speed: f64,
    pub placement_seed: u64,
}

/// Stopping bound for a run: a fixed simulated-time limit, or one of the two
/// sentinel modes driving the balance-time protocol.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum TimeLimit {
    Mode(LimitMode),
    Fixed(f64),
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Run until the chambers balance; the bound is the discovered balance
    /// time on later runs of the same engine.
    Discover,
    /// Run to twice the discovered balance time (unbounded until discovered).
    Extend,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub dt: f64,
    pub limit: TimeLimit,
    #[serde(default = "default_stall_guard")]
    pub stall_guard: bool,
}

fn default_stall_guard() -> bool {
    true
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    /// Record animation frames during the run.
    pub animation: bool,
    /// Simulated seconds between recorded frames.
    #[serde(default = "default_frame_interval")]
    pub frame_interval: f64,
    /// Frame dump format: "xyz", "json", or "bincode".
    pub format: Option<String>,
    #[serde(default)]
    pub save_positions: bool,
}

fn default_frame_interval() -> f64 {
    0.1 // 10 fps of simulated time
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GasConfig {
    pub geometry: GeometryConfig,
    pub interaction: InteractionConfig,
    pub particles: ParticlesConfig,
    pub timing: TimingConfig,
    pub output: OutputConfig,
}

impl GasConfig {
    /// Loads the configuration from a TOML file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: GasConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let g = &self.geometry;
        if g.width <= 0.0 || g.height <= 0.0 {
            anyhow::bail!("Box dimensions must be positive.");
        }
        if g.partition_x <= 0.0 || g.partition_x >= g.width {
            anyhow::bail!("partition_x must lie strictly inside the box.");
        }
        if g.hole_height <= 0.0 || g.hole_y < 0.0 || g.hole_y + g.hole_height > g.height {
            anyhow::bail!("The hole must lie within the box height.");
        }
        let i = &self.interaction;
        if i.epsilon <= 0.0 || i.rm <= 0.0 || i.cutoff <= 0.0 {
            anyhow::bail!("epsilon, rm and cutoff must be positive.");
        }
        if i.repulsive_exponent <= i.attractive_exponent {
            anyhow::bail!("repulsive_exponent must exceed attractive_exponent.");
        }
        let p = &self.particles;
        if p.count == 0 {
            anyhow::bail!("particles.count must be greater than 0.");
        }
        if p.mass <= 0.0 || p.radius <= 0.0 {
            anyhow::bail!("Particle mass and radius must be positive.");
        }
        if self.timing.dt <= 0.0 {
            anyhow::bail!("timing.dt must be positive.");
        }
        if let TimeLimit::Fixed(t) = self.timing.limit {
            if t <= 0.0 {
                anyhow::bail!("A fixed time limit must be positive.");
            }
        }
        if self.output.frame_interval <= 0.0 {
            anyhow::bail!("output.frame_interval must be positive.");
        }
        Ok(())
    }

    /// Converts the configuration into the flat parameter set used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let g = &self.geometry;
        let i = &self.interaction;

        SimParams {
            width: g.width,
            height: g.height,
            split_x: g.partition_x,
            hole_y_min: g.hole_y,
            hole_y_max: g.hole_y + g.hole_height,

            epsilon: i.epsilon,
            rm: i.rm,
            repulsive_exponent: i.repulsive_exponent,
            attractive_exponent: i.attractive_exponent,
            force_coefficient: i.repulsive_exponent * i.epsilon / i.rm,
            cutoff: i.cutoff,
            particle_radius: self.particles.radius,

            dt: self.timing.dt,
            stall_guard: self.timing.stall_guard,
        }
    }
}
