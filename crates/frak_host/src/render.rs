//! The `render` command: compute an image with the worker pool and write it
//! as a TIFF file.

use anyhow::{Context, Result, anyhow, bail, ensure};
use clap::Args;
use clap::builder::RangedU64ValueParser;
use frak_core::WorkerPool;
use frak_io::TiffSpec;
use frak_io::parser;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

use crate::generator::{Design, Kernel, View};
use crate::palette::{self, ColorStop, PaletteKind};
use crate::stats::PhaseTimer;

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Output file.
    pub name: PathBuf,

    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Resolution stored in the file, in pixels per inch.
    #[arg(long, default_value_t = 72, value_parser = clap::value_parser!(u32).range(1..))]
    pub ppi: u32,

    #[arg(long, value_enum, default_value_t = PaletteKind::Gray)]
    pub palette: PaletteKind,

    /// Gradient stop for the custom palette, as I:R,G,B. Repeat for each stop.
    #[arg(long = "color", value_name = "I:R,G,B")]
    pub colors: Vec<ColorStop>,

    /// Exponent of the custom palette gradient.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub curve: u32,

    #[arg(long, value_enum, default_value_t = Design::Mandelbrot)]
    pub design: Design,

    /// Centre of the Mandelbrot view, as X,Y.
    #[arg(long, default_value = "-0.5,0", value_parser = parse_point, allow_hyphen_values = true)]
    pub center: (f64, f64),

    /// Width of the Mandelbrot view in the complex plane.
    #[arg(long, default_value_t = 3.0, value_parser = parse_positive_f64)]
    pub fwidth: f64,

    #[arg(long, default_value_t = 255, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iteration: u32,

    /// Worker threads; 0 picks one from the CPU count.
    #[arg(long, default_value_t = 0, value_parser = worker_count_parser())]
    pub workers: usize,

    /// Pixels each worker claims per batch; sized from the image if unset.
    #[arg(long)]
    pub worker_cache_size: Option<usize>,

    /// Only replace the colour map of an existing file.
    #[arg(long)]
    pub palette_only: bool,

    /// Write the file without computing pixels.
    #[arg(long)]
    pub no_compute: bool,

    /// Print phase timings.
    #[arg(long)]
    pub stats: bool,
}

/// Upper bound accepted for `--workers`.
pub(crate) const MAX_WORKERS: u64 = 4096;

pub(crate) fn worker_count_parser() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(0..=MAX_WORKERS)
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid coordinate '{v}'"))
    };
    Ok((coord(x)?, coord(y)?))
}

fn parse_positive_f64(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(format!("expected a positive number, got '{s}'")),
    }
}

/// Shared state the workers write into.
///
/// Each pixel index is queued exactly once, so every canvas cell has a single
/// writer and relaxed stores are enough; joining the workers publishes them.
pub(crate) struct RenderCtx {
    kernel: Kernel,
    canvas: Vec<AtomicU8>,
}

impl RenderCtx {
    pub(crate) fn new(kernel: Kernel) -> Self {
        Self {
            canvas: (0..kernel.pixel_count()).map(|_| AtomicU8::new(0)).collect(),
            kernel,
        }
    }

    pub(crate) fn into_pixels(self) -> Vec<u8> {
        self.canvas.into_iter().map(AtomicU8::into_inner).collect()
    }
}

/// Worker callback: computes every pixel index in `batch`.
pub(crate) fn render_batch(batch: &[usize], ctx: &RenderCtx) {
    let mut rng = rand::thread_rng();
    for &index in batch {
        ctx.canvas[index].store(ctx.kernel.pixel(index, &mut rng), Ordering::Relaxed);
    }
}

/// Computes the canvas for `kernel` on a fresh pool.
///
/// With `run_workers` unset the pixel indices are still queued but no worker
/// runs, leaving a black canvas.
pub(crate) fn compute(
    kernel: Kernel,
    workers: usize,
    cache_size: Option<usize>,
    run_workers: bool,
    timer: &mut PhaseTimer,
) -> Result<Vec<u8>> {
    let total = kernel.pixel_count();
    let ctx = Arc::new(RenderCtx::new(kernel));
    timer.mark("alloc");

    let mut pool = WorkerPool::new("frak", workers, total, render_batch)?;
    if let Some(size) = cache_size {
        pool.set_cache_size(size);
    }

    let queued = pool.push_indices(total);
    ensure!(queued == total, "queued {queued} of {total} pixels");
    timer.mark("qini");

    if run_workers {
        pool.start(Arc::clone(&ctx))?;
        debug!(workers = pool.active_workers(), cache_size = ?pool.cache_size(), "rendering");
        pool.wait()?;
    }
    timer.mark("comp");
    drop(pool);

    let ctx = Arc::try_unwrap(ctx)
        .map_err(|_| anyhow!("render context still shared after workers joined"))?;
    Ok(ctx.into_pixels())
}

pub fn run(args: RenderArgs) -> Result<()> {
    let mut timer = PhaseTimer::start();
    let kind =
        palette::image_kind(args.palette, &args.colors, args.curve, &mut rand::thread_rng())?;
    let spec = TiffSpec::new(kind, args.width, args.height, args.ppi)?;
    timer.mark("init");

    if args.palette_only {
        if !args.palette.has_color_map() {
            bail!("--palette-only requires --palette color or --palette custom");
        }
        patch_palette(&args.name, &spec)?;
        timer.mark("meta");
        info!(path = %args.name.display(), "updated colour map");
        if args.stats {
            timer.print_report();
        }
        return Ok(());
    }

    let view = View::centered(args.center, args.fwidth, args.width, args.height);
    let kernel = Kernel::new(args.design, args.width, args.height, view, args.max_iteration);
    let meta = spec.encode_metadata();
    timer.mark("meta");

    let pixels = compute(
        kernel,
        args.workers,
        args.worker_cache_size,
        !args.no_compute,
        &mut timer,
    )?;
    let data = spec.encode_pixels(&pixels)?;

    write_output(&args.name, &meta, &data)?;
    timer.mark("write");

    info!(
        path = %args.name.display(),
        width = args.width,
        height = args.height,
        bytes = spec.file_size(),
        "wrote image"
    );
    if args.stats {
        timer.print_report();
    }
    Ok(())
}

/// Replaces the colour map of the file at `path` with the one in `spec`.
fn patch_palette(path: &Path, spec: &TiffSpec) -> Result<()> {
    let palette = spec
        .palette()
        .context("image kind has no colour map")?;
    let mut file = fs::read(path).with_context(|| format!("unable to read {}", path.display()))?;
    parser::update_color_map(&mut file, palette)
        .with_context(|| format!("unable to update colour map of {}", path.display()))?;
    fs::write(path, &file).with_context(|| format!("unable to write {}", path.display()))?;
    Ok(())
}

/// Writes metadata then pixel data to a new file at `path`.
///
/// A file created here is removed again if any write fails.
fn write_output(path: &Path, meta: &[u8], data: &[u8]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("unable to create {}", path.display()))?;

    let written = (|| -> std::io::Result<()> {
        let mut out = BufWriter::new(file);
        out.write_all(meta)?;
        out.write_all(data)?;
        out.flush()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e).with_context(|| format!("unable to write {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use frak_common::tiff::{BYTE_ORDER_LE, MAGIC};

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        render: RenderArgs,
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("frak-{}-{name}.tiff", std::process::id()))
    }

    fn args(extra: &[&str]) -> RenderArgs {
        let mut argv = vec!["frak"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap().render
    }

    #[test]
    fn parses_points_and_widths() {
        assert_eq!(parse_point("-0.5,0"), Ok((-0.5, 0.0)));
        assert_eq!(parse_point(" 1 , -2.25 "), Ok((1.0, -2.25)));
        assert!(parse_point("1").is_err());
        assert!(parse_point("1,nan").is_err());
        assert!(parse_positive_f64("0").is_err());
        assert!(parse_positive_f64("-1").is_err());
        assert_eq!(parse_positive_f64("2.5"), Ok(2.5));
    }

    #[test]
    fn defaults_and_validation() {
        let parsed = args(&["out.tiff"]);
        assert_eq!((parsed.width, parsed.height, parsed.ppi), (1024, 1024, 72));
        assert_eq!(parsed.palette, PaletteKind::Gray);
        assert_eq!(parsed.design, Design::Mandelbrot);
        assert_eq!(parsed.center, (-0.5, 0.0));
        assert!(parsed.worker_cache_size.is_none());

        let custom = args(&[
            "out.tiff",
            "--palette",
            "custom",
            "--color",
            "0:0,0,0",
            "--color",
            "256:255,255,255",
            "--center",
            "-1.5,0.25",
        ]);
        assert_eq!(custom.colors.len(), 2);
        assert_eq!(custom.center, (-1.5, 0.25));

        let mut argv = vec!["frak", "out.tiff", "--width", "0"];
        assert!(Cli::try_parse_from(argv.clone()).is_err());
        argv[3] = "-4";
        assert!(Cli::try_parse_from(argv).is_err());
        assert!(Cli::try_parse_from(["frak", "out.tiff", "--color", "300:0,0,0"]).is_err());

        let workers = |n: &str| Cli::try_parse_from(["frak", "out.tiff", "--workers", n]);
        assert_eq!(workers("4096").unwrap().render.workers, 4096);
        assert!(workers("4097").is_err());
        assert!(workers("18446744073709551615").is_err());
    }

    #[test]
    fn compute_fills_every_pixel() {
        let view = View::centered((0.0, 0.0), 4.0, 33, 17);
        let kernel = Kernel::new(Design::Mandelbrot, 33, 17, view, 40);
        let mut timer = PhaseTimer::start();

        let pixels = compute(kernel, 3, Some(5), true, &mut timer).unwrap();

        let mut rng = rand::thread_rng();
        let expected: Vec<u8> = (0..33 * 17).map(|i| kernel.pixel(i, &mut rng)).collect();
        assert_eq!(pixels, expected);
        let names: Vec<_> = timer.phases().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["alloc", "qini", "comp"]);
    }

    #[test]
    fn no_compute_leaves_canvas_black() {
        let view = View::centered((0.0, 0.0), 4.0, 8, 8);
        let kernel = Kernel::new(Design::Mandelbrot, 8, 8, view, 40);
        let pixels = compute(kernel, 2, None, false, &mut PhaseTimer::start()).unwrap();
        assert_eq!(pixels, vec![0; 64]);
    }

    #[test]
    fn renders_gray_file() {
        let path = temp_path("gray");
        let path_arg = path.to_str().unwrap();
        run(args(&[path_arg, "--width", "16", "--height", "8", "--workers", "2"])).unwrap();

        let file = fs::read(&path).unwrap();
        let spec = TiffSpec::new(frak_io::ImageKind::Gray, 16, 8, 72).unwrap();
        assert_eq!(file.len(), spec.file_size() as usize);
        assert_eq!(u16::from_le_bytes([file[0], file[1]]), BYTE_ORDER_LE);
        assert_eq!(u16::from_le_bytes([file[2], file[3]]), MAGIC);
        assert_eq!(&file[..spec.data_offset() as usize], &spec.encode_metadata()[..]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn renders_bilevel_noise() {
        let path = temp_path("bw");
        run(args(&[
            path.to_str().unwrap(),
            "--width",
            "10",
            "--height",
            "3",
            "--palette",
            "bw",
            "--design",
            "noise",
        ]))
        .unwrap();

        let spec = TiffSpec::new(frak_io::ImageKind::Bilevel, 10, 3, 72).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), spec.file_size() as usize);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn palette_only_rewrites_color_map() {
        let path = temp_path("patch");
        let base = [path.to_str().unwrap(), "--width", "8", "--height", "8"];
        let custom = ["--palette", "custom", "--color", "0:0,0,0", "--color", "256:255,0,0"];

        run(args(&[&base[..], &custom[..]].concat())).unwrap();
        let before = fs::read(&path).unwrap();

        let recolor = ["--palette", "custom", "--color", "0:0,255,0", "--color", "256:0,0,255"];
        run(args(&[&base[..], &recolor[..], &["--palette-only"][..]].concat())).unwrap();
        let after = fs::read(&path).unwrap();

        let entries = parser::read_first_ifd(&after).unwrap();
        let map = parser::find_entry(&entries, frak_common::tiff::Tag::ColorMap).unwrap();
        let start = map.value_or_offset as usize;
        let end = start + frak_io::tiff::COLOR_MAP_LEN;
        assert_eq!(before.len(), after.len());
        assert_ne!(before[start..end], after[start..end]);
        assert_eq!(before[..start], after[..start]);
        assert_eq!(before[end..], after[end..]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn palette_only_needs_a_color_map() {
        let path = temp_path("patch-gray");
        assert!(run(args(&[path.to_str().unwrap(), "--palette-only"])).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn failed_write_removes_nothing_it_did_not_create() {
        let dir = temp_path("missing-dir");
        let path = dir.join("out.tiff");
        assert!(write_output(&path, b"meta", b"data").is_err());
        assert!(!path.exists());
    }
}
