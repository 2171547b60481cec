use anyhow::Result;
use gas_common::{GasConfig, Vec2};
use rand::distr::Uniform;
use rand::prelude::*;
use rand::seq::SliceRandom;

/// A single gas particle. Copied freely: the shadow list and wall proxies
/// are plain value snapshots of these records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub pos: Vec2,
    pub vel: Vec2,
    pub mass: f64,
    pub radius: f64,
}

impl Particle {
    pub fn new(pos: Vec2, vel: Vec2, mass: f64, radius: f64) -> Self {
        Self { pos, vel, mass, radius }
    }

    /// A stationary virtual particle anchored to a wall or partition edge,
    /// used only as the far end of a repulsive pair.
    pub fn wall_anchor(pos: Vec2, radius: f64) -> Self {
        Self { pos, vel: Vec2::zero(), mass: 1.0, radius }
    }
}

/// Ordered, mutable particle container. The engine identifies particles by
/// their stable index in this list; the count is fixed for the whole run.
#[derive(Debug)]
pub struct Grid {
    particles: Vec<Particle>,
}

impl Grid {
    /// Wraps an existing particle list.
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        Self { particles }
    }

    /// Places the configured number of particles in the first chamber using
    /// jittered grid-bin sampling, with fixed-speed random-direction
    /// velocities. Deterministic for a given placement seed.
    pub fn populate(config: &GasConfig) -> Result<Self> {
        let params = config.get_sim_params();
        let count = config.particles.count as usize;
        let radius = config.particles.radius;
        let mass = config.particles.mass;
        let speed = config.particles.initial_speed;

        let x_min = radius;
        let x_max = params.split_x - radius;
        let y_min = radius;
        let y_max = params.height - radius;
        if x_max <= x_min || y_max <= y_min {
            anyhow::bail!("First chamber is too small to place particles of radius {}.", radius);
        }

        let mut rng = StdRng::seed_from_u64(config.particles.placement_seed);

        // Jittered sampling: one candidate per shuffled grid bin keeps the
        // initial population spread out without an overlap-rejection loop.
        let width = x_max - x_min;
        let height = y_max - y_min;
        let cols = ((count as f64 * width / height).sqrt().floor() as usize).max(1);
        let rows = ((count + cols - 1) / cols).max(1);
        let mut bins: Vec<(usize, usize)> = (0..cols)
            .flat_map(|ix| (0..rows).map(move |iy| (ix, iy)))
            .collect();
        bins.shuffle(&mut rng);
        bins.truncate(count);

        let angle_dist = Uniform::new(0.0f64, 2.0 * std::f64::consts::PI)?;
        let cell_w = width / cols as f64;
        let cell_h = height / rows as f64;
        let mut particles = Vec::with_capacity(count);
        for (ix, iy) in bins {
            let x0 = x_min + ix as f64 * cell_w;
            let y0 = y_min + iy as f64 * cell_h;
            let dist_x = Uniform::new(x0, x0 + cell_w)?;
            let dist_y = Uniform::new(y0, y0 + cell_h)?;
            let pos = Vec2::new(rng.sample(dist_x), rng.sample(dist_y));
            let theta = rng.sample(angle_dist);
            let vel = Vec2::new(theta.cos(), theta.sin()) * speed;
            particles.push(Particle::new(pos, vel, mass, radius));
        }

        Ok(Self { particles })
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Overwrites the position and velocity of the particle at `idx` in place.
    pub fn set_state(&mut self, idx: usize, pos: Vec2, vel: Vec2) {
        let particle = &mut self.particles[idx];
        particle.pos = pos;
        particle.vel = vel;
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}
