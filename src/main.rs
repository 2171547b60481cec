use anyhow::Result;
use gas_common::config::{GasConfig, TimeLimit};
use gas_common::Frame;
use gas_engine::{Grid, GasSimulation};
use log::{error, info, warn};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting two-chamber gas simulation...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = GasConfig::load(&config_path)?;

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Particles & Engine ---
    let grid = Grid::populate(&config)?;
    info!("Placed {} particles in the first chamber.", grid.len());
    let sentinel_mode = matches!(config.timing.limit, TimeLimit::Mode(_));
    let mut sim = GasSimulation::new(config, grid)?;

    // --- Phase 1: run until the chambers balance (or a fixed bound) ---
    let start_time = Instant::now();
    let first_result = sim.run()?;

    if sim.balance_time() > 0.0 {
        info!(
            "Balance time: {:.4} s simulated ({:.2} s wall clock)",
            sim.balance_time(),
            start_time.elapsed().as_secs_f64()
        );
    } else {
        info!("Run ended at {:.4} s simulated without the chambers balancing.", first_result);
    }

    // --- Phase 2: under a sentinel limit, re-run the same engine against
    // the bound derived from the discovered balance time ---
    if sentinel_mode && sim.balance_time() > 0.0 {
        info!("Starting extended phase...");
        let end = sim.run()?;
        info!(
            "Extended phase ended at {:.4} s simulated ({:.2} s wall clock total)",
            end,
            start_time.elapsed().as_secs_f64()
        );
    }

    // --- Save Recorded Frames ---
    if sim.config.output.animation {
        let format = sim.config.output.format.as_deref().unwrap_or("xyz");
        let base = sim.config.output.base_filename.clone();
        let frames = sim.frames();
        info!("Saving {} recorded frames...", frames.len());

        match format {
            "xyz" => {
                let filename = format!("{base}_frames.xyz");
                match write_xyz(&filename, frames) {
                    Ok(()) => info!("Frames saved to {filename}"),
                    Err(e) => error!("Error writing frames to '{filename}': {e}"),
                }
            }
            "json" => {
                let filename = format!("{base}_frames.json");
                match File::create(&filename) {
                    Ok(mut file) => match serde_json::to_string(frames) {
                        Ok(json_string) => {
                            if let Err(e) = file.write_all(json_string.as_bytes()) {
                                error!("Error writing frame JSON to '{filename}': {e}");
                            } else {
                                info!("Frames saved to {filename}");
                            }
                        }
                        Err(e) => error!("Error serializing frames to JSON: {e}"),
                    },
                    Err(e) => error!("Error creating frame file '{filename}': {e}"),
                }
            }
            "bincode" => {
                let filename = format!("{base}_frames.bin");
                match File::create(&filename) {
                    Ok(file) => match bincode::serialize_into(file, frames) {
                        Ok(()) => info!("Frames saved to {filename} (binary format)"),
                        Err(e) => error!("Error serializing frames to bincode: {e}"),
                    },
                    Err(e) => error!("Error creating frame file '{filename}': {e}"),
                }
            }
            other => {
                warn!("Unknown frame format '{other}'; falling back to xyz.");
                let filename = format!("{base}_frames.xyz");
                match write_xyz(&filename, frames) {
                    Ok(()) => info!("Frames saved to {filename}"),
                    Err(e) => error!("Error writing frames to '{filename}': {e}"),
                }
            }
        }
    } else {
        info!("Skipping frame output as per config (animation is off).");
    }

    // --- Save Final Positions ---
    if sim.config.output.save_positions {
        let filename = format!("{}_final_positions.csv", sim.config.output.base_filename);
        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                writer.write_record(["x", "y", "vx", "vy"])?;
                for p in sim.particles() {
                    writer.write_record([
                        format!("{:.6}", p.pos.x),
                        format!("{:.6}", p.pos.y),
                        format!("{:.6}", p.vel.x),
                        format!("{:.6}", p.vel.y),
                    ])?;
                }
                writer.flush()?;
                info!("Final positions saved to {filename}");
            }
            Err(e) => error!("Error saving CSV file '{filename}': {e}"),
        }
    }

    info!("Simulation complete.");
    Ok(())
}

/// Plain-text frame dump readable by common particle visualizers: a count
/// line, a timestamp comment, then one `x y vx vy` row per particle.
fn write_xyz(path: &str, frames: &[Frame]) -> Result<()> {
    let mut file = File::create(path)?;
    for frame in frames {
        writeln!(file, "{}", frame.positions.len())?;
        writeln!(file, "t={:.4}", frame.time)?;
        for ((x, y), (vx, vy)) in frame.positions.iter().zip(&frame.velocities) {
            writeln!(file, "{x:.6} {y:.6} {vx:.6} {vy:.6}")?;
        }
    }
    Ok(())
}
