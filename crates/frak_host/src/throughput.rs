use anyhow::{Result, ensure};
use rayon::prelude::*;
use std::time::Instant;

use crate::generator::{Design, Kernel, View};
use crate::render;
use crate::stats::PhaseTimer;

/// Renders the same Mandelbrot canvas with the worker pool and with rayon,
/// and reports pixels per second for each.
pub fn run_benchmark(width: u32, height: u32, max_iteration: u32, workers: usize) -> Result<()> {
    let view = View::centered((-0.5, 0.0), 3.0, width, height);
    let kernel = Kernel::new(Design::Mandelbrot, width, height, view, max_iteration);
    let pixels = kernel.pixel_count();
    println!("Rendering {width}x{height} Mandelbrot, {max_iteration} iterations max...");

    println!("Starting Benchmark (Parallel - WorkerPool)...");
    let start_pool = Instant::now();
    let pooled = render::compute(kernel, workers, None, true, &mut PhaseTimer::start())?;
    let pool_seconds = start_pool.elapsed().as_secs_f64();

    println!("Starting Benchmark (Parallel - Rayon)...");
    let start_rayon = Instant::now();
    let reference: Vec<u8> = (0..pixels)
        .into_par_iter()
        .map_init(rand::thread_rng, |rng, i| kernel.pixel(i, rng))
        .collect();
    let rayon_seconds = start_rayon.elapsed().as_secs_f64();

    ensure!(pooled == reference, "worker pool and rayon rendered different images");

    println!("Results");
    println!("Pixels: {}", pixels);
    println!("WorkerPool Time: {:.4} s", pool_seconds);
    println!("WorkerPool Throughput: {:.2} pixels/s", pixels as f64 / pool_seconds);
    println!("Rayon Time: {:.4} s", rayon_seconds);
    println!("Rayon Throughput: {:.2} pixels/s", pixels as f64 / rayon_seconds);

    Ok(())
}
