//! Per-pixel kernels for the image generator.
//!
//! Every kernel is a pure function of the pixel position (plus a random
//! source for noise), so pixels can be computed in any order on any thread.
//! The output is one byte per pixel; the TIFF encoder decides how that byte
//! is stored (gray level, palette index or thresholded bit).

use clap::ValueEnum;
use num::Complex;
use rand::Rng;

/// What to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Design {
    /// Uniformly random bytes.
    Noise,
    /// Escape-time rendering of the Mandelbrot set.
    Mandelbrot,
}

/// The rectangle of the complex plane mapped onto the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl View {
    /// Builds a view centred on `center` that is `fwidth` units wide.
    ///
    /// The height follows the image's aspect ratio so pixels stay square.
    ///
    /// # Arguments
    ///
    /// * `center` - Real and imaginary coordinate of the image centre
    /// * `fwidth` - Width of the view in the complex plane
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    pub fn centered(center: (f64, f64), fwidth: f64, width: u32, height: u32) -> Self {
        let fheight = fwidth * height as f64 / width as f64;
        Self {
            left: center.0 - fwidth / 2.0,
            top: center.1 - fheight / 2.0,
            width: fwidth,
            height: fheight,
        }
    }

    /// Maps a pixel to the point at its top-left corner.
    pub fn point(&self, column: u32, row: u32, width: u32, height: u32) -> Complex<f64> {
        Complex::new(
            self.width * column as f64 / width as f64 + self.left,
            self.height * row as f64 / height as f64 + self.top,
        )
    }
}

/// Counts iterations of `z = z² + c`, starting from `z = c`, until `|z| > 2`
/// or `limit` iterations have run.
pub fn escape_time(c: Complex<f64>, limit: u32) -> u32 {
    let mut z = c;
    let mut iterations = 0;
    while z.norm_sqr() <= 4.0 && iterations != limit {
        z = z * z + c;
        iterations += 1;
    }
    iterations
}

/// Scales the escape time of `c` onto `0..=255`.
///
/// Points that never escape map to 255.
pub fn mandelbrot_pixel(c: Complex<f64>, max_iteration: u32) -> u8 {
    let max = max_iteration.max(1);
    (255 * escape_time(c, max) as u64 / max as u64) as u8
}

/// A configured kernel for one image.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    design: Design,
    width: u32,
    height: u32,
    view: View,
    max_iteration: u32,
}

impl Kernel {
    pub fn new(design: Design, width: u32, height: u32, view: View, max_iteration: u32) -> Self {
        Self {
            design,
            width,
            height,
            view,
            max_iteration,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Computes the byte for the pixel at row-major offset `index`.
    #[inline]
    pub fn pixel<R: Rng>(&self, index: usize, rng: &mut R) -> u8 {
        match self.design {
            Design::Noise => rng.gen_range(0..=u8::MAX),
            Design::Mandelbrot => {
                let row = (index / self.width as usize) as u32;
                let column = (index % self.width as usize) as u32;
                let c = self.view.point(column, row, self.width, self.height);
                mandelbrot_pixel(c, self.max_iteration)
            }
        }
    }
}
