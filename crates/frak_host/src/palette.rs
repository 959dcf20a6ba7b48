//! Colour palettes for 8-bit images.
//!
//! A palette image stores one index per pixel and a 256-entry colour map.
//! Maps are either random or a gradient through user-chosen colour stops.

use anyhow::{Result, bail, ensure};
use clap::ValueEnum;
use frak_common::color::{PaletteColor, Rgb8};
use frak_common::tiff::COLOR_MAP_ENTRIES;
use frak_io::{ImageKind, Palette};
use rand::Rng;
use std::str::FromStr;

/// Highest index a colour stop may name; it closes the last segment.
pub const MAX_STOP_INDEX: u16 = COLOR_MAP_ENTRIES as u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaletteKind {
    /// 1-bit black and white.
    Bw,
    /// 8-bit grayscale.
    Gray,
    /// 8-bit indexed with a random colour map.
    Color,
    /// 8-bit indexed with a gradient through `--color` stops.
    Custom,
}

impl PaletteKind {
    pub fn has_color_map(self) -> bool {
        matches!(self, Self::Color | Self::Custom)
    }
}

/// A gradient stop: colour map index and the colour at that index.
///
/// Parsed from `I:R,G,B`, for example `128:255,0,64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorStop {
    pub index: u16,
    pub color: Rgb8,
}

impl FromStr for ColorStop {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, rgb) = s
            .split_once(':')
            .ok_or_else(|| format!("expected I:R,G,B, got '{s}'"))?;
        let index: u16 = index
            .trim()
            .parse()
            .map_err(|_| format!("invalid colour index '{index}'"))?;
        if index > MAX_STOP_INDEX {
            return Err(format!("colour index {index} is above {MAX_STOP_INDEX}"));
        }

        let channels = rgb
            .split(',')
            .map(|c| c.trim().parse::<u8>().map_err(|_| format!("invalid channel '{c}' in '{s}'")))
            .collect::<Result<Vec<_>, _>>()?;
        let [red, green, blue] = channels[..] else {
            return Err(format!("expected three channels in '{s}'"));
        };

        Ok(Self {
            index,
            color: Rgb8::new(red, green, blue),
        })
    }
}

/// Fills every entry of the map with an independent random colour.
pub fn random_palette<R: Rng>(rng: &mut R) -> Palette {
    let mut palette = Palette::default();
    for color in palette.colors.iter_mut() {
        *color = PaletteColor::new(
            rng.gen_range(0..=u16::MAX),
            rng.gen_range(0..=u16::MAX),
            rng.gen_range(0..=u16::MAX),
        );
    }
    palette
}

/// Builds a colour map that blends between consecutive stops.
///
/// Within a segment of `len` entries starting at stop `from`, entry `x` gets
/// `from + (to - from) * x^curve / len^curve` per channel. A `curve` of 1 is
/// a linear blend; larger values hold the starting colour longer. Entries
/// outside the stops stay black, and a last stop below 256 sets its own entry.
pub fn gradient_palette(stops: &[ColorStop], curve: u32) -> Result<Palette> {
    ensure!(stops.len() >= 2, "a custom palette needs at least two colours");
    ensure!(curve >= 1, "curve must be at least 1");
    for pair in stops.windows(2) {
        ensure!(
            pair[0].index < pair[1].index,
            "colour indices must increase, got {} then {}",
            pair[0].index,
            pair[1].index
        );
    }

    let mut palette = Palette::default();
    for pair in stops.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let segment = &mut palette.colors[from.index as usize..to.index as usize];
        blend(segment, from.color.into(), to.color.into(), curve);
    }

    if let Some(last) = stops.last().filter(|s| (s.index as usize) < COLOR_MAP_ENTRIES) {
        palette.colors[last.index as usize] = last.color.into();
    }
    Ok(palette)
}

fn blend(segment: &mut [PaletteColor], from: PaletteColor, to: PaletteColor, curve: u32) {
    let scale = (segment.len() as f64).powi(curve as i32);
    let channel = |a: u16, b: u16, weight: f64| (a as f64 + (b as f64 - a as f64) * weight) as u16;

    for (x, color) in segment.iter_mut().enumerate() {
        let weight = (x as f64).powi(curve as i32) / scale;
        *color = PaletteColor::new(
            channel(from.red, to.red, weight),
            channel(from.green, to.green, weight),
            channel(from.blue, to.blue, weight),
        );
    }
}

/// Resolves the command-line palette options into an image kind.
pub fn image_kind<R: Rng>(
    kind: PaletteKind,
    stops: &[ColorStop],
    curve: u32,
    rng: &mut R,
) -> Result<ImageKind> {
    if !stops.is_empty() && kind != PaletteKind::Custom {
        bail!("--color requires --palette custom");
    }

    Ok(match kind {
        PaletteKind::Bw => ImageKind::Bilevel,
        PaletteKind::Gray => ImageKind::Gray,
        PaletteKind::Color => ImageKind::Palette(Box::new(random_palette(rng))),
        PaletteKind::Custom => ImageKind::Palette(Box::new(gradient_palette(stops, curve)?)),
    })
}
