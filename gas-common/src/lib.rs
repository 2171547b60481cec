pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{GasConfig, GeometryConfig, InteractionConfig, LimitMode, OutputConfig, ParticlesConfig, TimeLimit, TimingConfig};
pub use sim_params::SimParams;
pub use snapshot::Frame;
pub use vecmath::{angle_between, Vec2};
