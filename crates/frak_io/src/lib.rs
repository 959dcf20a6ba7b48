//! TIFF encoding and decoding for the frak image generator.
//!
//! Provides layout computation and metadata encoding for the uncompressed,
//! single-strip TIFF files that frak writes, and a small IFD reader used to
//! patch the colour map of an existing file in place.

use thiserror::Error;

/// Encoder for frak's baseline TIFF layout.
///
/// Computes where every part of the file lives (IFD, resolution rationals,
/// colour map, pixel data), encodes the metadata block that precedes the
/// pixels, and packs 1-bit images into rows of whole bytes.
pub mod tiff;

/// Parser for TIFF headers and image file directories.
///
/// Reads the first IFD of a little-endian TIFF with nom combinators. Used to
/// locate and rewrite the colour map of a previously generated file without
/// touching its pixel data.
pub mod parser;

pub use tiff::{ImageKind, Palette, TiffSpec};

/// Errors produced while encoding or patching TIFF files.
#[derive(Debug, Error)]
pub enum TiffError {
    /// Width or height is zero.
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    /// The file would not be addressable with 32-bit offsets.
    #[error("image of {size} bytes exceeds the 4 GiB TIFF limit")]
    TooLarge { size: u64 },

    /// The pixel buffer does not match the image dimensions.
    #[error("expected {expected} pixels, got {actual}")]
    PixelCount { expected: usize, actual: usize },

    /// The input ended before the named structure was complete.
    #[error("truncated tiff file while reading {0}")]
    Truncated(&'static str),

    #[error("invalid tiff header, only little endian supported")]
    UnsupportedHeader,

    #[error("invalid tiff file, empty IFD")]
    EmptyIfd,

    #[error("failed to find tiff colormap to update")]
    MissingColorMap,

    #[error("malformed colormap, field type {field_type} is not SHORT")]
    MalformedColorMap { field_type: u16 },

    #[error("unable to update colormap with {count} values, expected 768")]
    ColorMapSize { count: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
