mod generator;
mod palette;
mod render;
mod stats;
mod throughput;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "frak", version, about = "Generate noise and Mandelbrot images as TIFF files")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn,frak=info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an image into a TIFF file.
    Render(render::RenderArgs),
    /// Time the worker pool against rayon on an in-memory Mandelbrot.
    Bench {
        #[arg(long, default_value_t = 2048, value_parser = clap::value_parser!(u32).range(1..))]
        width: u32,
        #[arg(long, default_value_t = 2048, value_parser = clap::value_parser!(u32).range(1..))]
        height: u32,
        #[arg(long, default_value_t = 255, value_parser = clap::value_parser!(u32).range(1..))]
        max_iteration: u32,
        #[arg(long, default_value_t = 0, value_parser = render::worker_count_parser())]
        workers: usize,
    },
}

fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Commands::Render(args) => {
            render::run(args)?;
        }
        Commands::Bench {
            width,
            height,
            max_iteration,
            workers,
        } => {
            throughput::run_benchmark(width, height, max_iteration, workers)?;
        }
    }
    Ok(())
}
