use std::io::Write;

use bitvec::prelude::*;
use frak_common::color::PaletteColor;
use frak_common::tiff::{
    BYTE_ORDER_LE, COLOR_MAP_ENTRIES, COMPRESSION_NONE, FIRST_IFD_OFFSET, FieldType, HEADER_LEN,
    IFD_ENTRY_LEN, MAGIC, PHOTOMETRIC_BLACK_IS_ZERO, PHOTOMETRIC_PALETTE, RESOLUTION_UNIT_INCH, Tag,
};

use crate::TiffError;

/// Bytes taken by the colour map: three channels of 256 u16 values.
pub const COLOR_MAP_LEN: usize = 3 * COLOR_MAP_ENTRIES * 2;

/// Bytes taken by the X and Y resolution rationals.
const RESOLUTION_LEN: u32 = 2 * 2 * 4;

/// IFD entries present in every image.
const BASE_ENTRY_COUNT: u16 = 10;

/// A 256-entry colour map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub colors: [PaletteColor; COLOR_MAP_ENTRIES],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: [PaletteColor::default(); COLOR_MAP_ENTRIES],
        }
    }
}

/// Pixel format of the generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageKind {
    /// One bit per pixel, rows padded to a whole byte.
    Bilevel,
    /// One byte per pixel, 0 is black.
    Gray,
    /// One byte per pixel indexing into a colour map.
    Palette(Box<Palette>),
}

/// Everything needed to lay out a TIFF file.
///
/// All offsets are computed up front, so the metadata can be encoded before
/// a single pixel exists.
#[derive(Debug, Clone)]
pub struct TiffSpec {
    kind: ImageKind,
    width: u32,
    height: u32,
    ppi: u32,
}

impl TiffSpec {
    /// Validates the dimensions and that the whole file fits 32-bit offsets.
    pub fn new(kind: ImageKind, width: u32, height: u32, ppi: u32) -> Result<Self, TiffError> {
        if width == 0 || height == 0 {
            return Err(TiffError::ZeroDimension { width, height });
        }

        let spec = Self {
            kind,
            width,
            height,
            ppi,
        };
        let size = spec.data_offset() as u64 + spec.row_bytes() * height as u64;
        if size > u32::MAX as u64 {
            return Err(TiffError::TooLarge { size });
        }
        Ok(spec)
    }

    pub fn kind(&self) -> &ImageKind {
        &self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn palette(&self) -> Option<&Palette> {
        match &self.kind {
            ImageKind::Palette(palette) => Some(palette),
            _ => None,
        }
    }

    /// Number of pixels, i.e. the number of work items needed to render.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn row_bytes(&self) -> u64 {
        match self.kind {
            ImageKind::Bilevel => (self.width as u64).div_ceil(8),
            _ => self.width as u64,
        }
    }

    fn entry_count(&self) -> u16 {
        match self.kind {
            ImageKind::Bilevel => BASE_ENTRY_COUNT,
            ImageKind::Gray => BASE_ENTRY_COUNT + 1,
            ImageKind::Palette(_) => BASE_ENTRY_COUNT + 2,
        }
    }

    fn resolution_offset(&self) -> u32 {
        HEADER_LEN + 2 + IFD_ENTRY_LEN * self.entry_count() as u32 + 4
    }

    fn color_map_offset(&self) -> u32 {
        self.resolution_offset() + RESOLUTION_LEN
    }

    /// Offset of the first pixel byte, which is also the metadata length.
    pub fn data_offset(&self) -> u32 {
        match self.kind {
            ImageKind::Palette(_) => self.color_map_offset() + COLOR_MAP_LEN as u32,
            _ => self.color_map_offset(),
        }
    }

    /// Length of the encoded pixel data.
    pub fn data_len(&self) -> u32 {
        // Checked against u32::MAX in `new`.
        (self.row_bytes() * self.height as u64) as u32
    }

    pub fn file_size(&self) -> u32 {
        self.data_offset() + self.data_len()
    }

    /// Encodes the header, IFD, resolution and colour map.
    ///
    /// The result is exactly [`data_offset`](Self::data_offset) bytes long;
    /// the pixel data goes directly after it.
    pub fn encode_metadata(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data_offset() as usize);

        buf.extend_from_slice(&BYTE_ORDER_LE.to_le_bytes());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&FIRST_IFD_OFFSET.to_le_bytes());

        buf.extend_from_slice(&self.entry_count().to_le_bytes());
        write_entry(&mut buf, Tag::ImageWidth, FieldType::Long, 1, self.width);
        write_entry(&mut buf, Tag::ImageLength, FieldType::Long, 1, self.height);
        if self.kind != ImageKind::Bilevel {
            write_entry(&mut buf, Tag::BitsPerSample, FieldType::Short, 1, 8);
        }
        write_entry(&mut buf, Tag::Compression, FieldType::Short, 1, COMPRESSION_NONE);
        let photometric = match self.kind {
            ImageKind::Palette(_) => PHOTOMETRIC_PALETTE,
            _ => PHOTOMETRIC_BLACK_IS_ZERO,
        };
        write_entry(
            &mut buf,
            Tag::PhotometricInterpretation,
            FieldType::Short,
            1,
            photometric,
        );
        write_entry(&mut buf, Tag::StripOffsets, FieldType::Long, 1, self.data_offset());
        write_entry(&mut buf, Tag::RowsPerStrip, FieldType::Long, 1, self.height);
        write_entry(&mut buf, Tag::StripByteCounts, FieldType::Long, 1, self.data_len());
        let resolution = self.resolution_offset();
        write_entry(&mut buf, Tag::XResolution, FieldType::Rational, 1, resolution);
        write_entry(&mut buf, Tag::YResolution, FieldType::Rational, 1, resolution + 8);
        write_entry(
            &mut buf,
            Tag::ResolutionUnit,
            FieldType::Short,
            1,
            RESOLUTION_UNIT_INCH,
        );
        if self.palette().is_some() {
            write_entry(
                &mut buf,
                Tag::ColorMap,
                FieldType::Short,
                3 * COLOR_MAP_ENTRIES as u32,
                self.color_map_offset(),
            );
        }
        // No further IFDs.
        buf.extend_from_slice(&0u32.to_le_bytes());

        for _ in 0..2 {
            buf.extend_from_slice(&self.ppi.to_le_bytes());
            buf.extend_from_slice(&1u32.to_le_bytes());
        }

        if let Some(palette) = self.palette() {
            let start = buf.len();
            buf.resize(start + COLOR_MAP_LEN, 0);
            write_color_map(&mut buf[start..], palette);
        }

        debug_assert_eq!(buf.len(), self.data_offset() as usize);
        buf
    }

    /// Converts one-byte-per-pixel samples into the on-disk pixel data.
    ///
    /// Gray and palette images are stored as is. Bilevel images are
    /// thresholded and packed, see [`pack_bilevel`].
    pub fn encode_pixels<'a>(
        &self,
        pixels: &'a [u8],
    ) -> Result<std::borrow::Cow<'a, [u8]>, TiffError> {
        if pixels.len() != self.pixel_count() {
            return Err(TiffError::PixelCount {
                expected: self.pixel_count(),
                actual: pixels.len(),
            });
        }
        Ok(match self.kind {
            ImageKind::Bilevel => pack_bilevel(pixels, self.width as usize).into(),
            _ => pixels.into(),
        })
    }

    /// Writes the complete file: metadata followed by pixel data.
    pub fn write_image<W: Write>(&self, out: &mut W, pixels: &[u8]) -> Result<(), TiffError> {
        let data = self.encode_pixels(pixels)?;
        out.write_all(&self.encode_metadata())?;
        out.write_all(&data)?;
        Ok(())
    }
}

fn write_entry(buf: &mut Vec<u8>, tag: Tag, field_type: FieldType, count: u32, value: u32) {
    buf.extend_from_slice(&(tag as u16).to_le_bytes());
    buf.extend_from_slice(&(field_type as u16).to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    // SHORT values are left-justified in the 4-byte field, which in little
    // endian is the same as writing them as a u32.
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Writes `palette` in TIFF colour-map order: all reds, all greens, all blues.
///
/// `dst` must be at least [`COLOR_MAP_LEN`] bytes long.
pub fn write_color_map(dst: &mut [u8], palette: &Palette) {
    let (reds, rest) = dst.split_at_mut(COLOR_MAP_ENTRIES * 2);
    let (greens, blues) = rest.split_at_mut(COLOR_MAP_ENTRIES * 2);

    for (i, color) in palette.colors.iter().enumerate() {
        let at = i * 2;
        reds[at..at + 2].copy_from_slice(&color.red.to_le_bytes());
        greens[at..at + 2].copy_from_slice(&color.green.to_le_bytes());
        blues[at..at + 2].copy_from_slice(&color.blue.to_le_bytes());
    }
}

/// Packs 8-bit samples into 1-bit rows, most significant bit first.
///
/// A sample of 128 or more becomes a white (1) bit. Each row starts on a
/// fresh byte, so rows whose width is not a multiple of eight end in zero
/// padding.
pub fn pack_bilevel(pixels: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return Vec::new();
    }
    let row_bits = width.div_ceil(8) * 8;
    let rows = pixels.len() / width;
    let mut bits: BitVec<u8, Msb0> = BitVec::repeat(false, row_bits * rows);

    for (y, row) in pixels.chunks_exact(width).enumerate() {
        let base = y * row_bits;
        for (x, &sample) in row.iter().enumerate() {
            bits.set(base + x, sample >= 128);
        }
    }

    bits.into_vec()
}
