pub mod grid;
pub mod simulation;

// Re-export key types for the binary and integration tests
pub use grid::{Grid, Particle};
pub use simulation::{pair_force, wall_proxies, GasSimulation, MIN_SEPARATION};
