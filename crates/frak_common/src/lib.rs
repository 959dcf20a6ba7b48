//! Common definitions shared across the frak image generator.
//!
//! This crate holds the TIFF tag and field-type numbers used by the encoder,
//! and the plain colour types exchanged between palette construction and the
//! colour-map writer.

#![no_std]

/// TIFF 6.0 constants for the baseline subset written by frak.
///
/// Only little-endian files with a single strip of uncompressed data are
/// produced, so just the tags needed for bilevel, grayscale and palette
/// images are listed here.
pub mod tiff {
    /// Byte-order marker for little-endian files ("II").
    pub const BYTE_ORDER_LE: u16 = 0x4949;

    /// Magic number following the byte-order marker.
    pub const MAGIC: u16 = 42;

    /// Offset of the first IFD. It directly follows the 8-byte header.
    pub const FIRST_IFD_OFFSET: u32 = 8;

    /// Size of the file header in bytes.
    pub const HEADER_LEN: u32 = 8;

    /// Size of a single IFD entry in bytes.
    pub const IFD_ENTRY_LEN: u32 = 12;

    /// Number of entries in a colour map (per channel).
    pub const COLOR_MAP_ENTRIES: usize = 256;

    /// Image file directory tags.
    ///
    /// The discriminants are the on-disk tag numbers. Entries must be written
    /// in ascending tag order, which is the declaration order below.
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Tag {
        ImageWidth = 0x0100,
        ImageLength = 0x0101,
        BitsPerSample = 0x0102,
        Compression = 0x0103,
        PhotometricInterpretation = 0x0106,
        StripOffsets = 0x0111,
        RowsPerStrip = 0x0116,
        StripByteCounts = 0x0117,
        XResolution = 0x011A,
        YResolution = 0x011B,
        ResolutionUnit = 0x0128,
        ColorMap = 0x0140,
    }

    /// Field types an IFD entry can carry.
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FieldType {
        Byte = 1,
        Ascii = 2,
        Short = 3,
        Long = 4,
        Rational = 5,
    }

    /// No compression.
    pub const COMPRESSION_NONE: u32 = 1;

    /// PhotometricInterpretation value for "0 is black".
    pub const PHOTOMETRIC_BLACK_IS_ZERO: u32 = 1;

    /// PhotometricInterpretation value for palette-indexed images.
    pub const PHOTOMETRIC_PALETTE: u32 = 3;

    /// ResolutionUnit value for pixels per inch.
    pub const RESOLUTION_UNIT_INCH: u32 = 2;
}

/// Colour types shared between palette builders and the TIFF writer.
pub mod color {
    /// An 8-bit-per-channel colour as given on the command line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Rgb8 {
        pub red: u8,
        pub green: u8,
        pub blue: u8,
    }

    impl Rgb8 {
        pub const fn new(red: u8, green: u8, blue: u8) -> Self {
            Self { red, green, blue }
        }
    }

    /// A colour-map entry with 16 bits per channel, as stored in a TIFF.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PaletteColor {
        pub red: u16,
        pub green: u16,
        pub blue: u16,
    }

    impl PaletteColor {
        pub const fn new(red: u16, green: u16, blue: u16) -> Self {
            Self { red, green, blue }
        }
    }

    impl From<Rgb8> for PaletteColor {
        /// Scales each 8-bit channel onto the full 16-bit range.
        fn from(c: Rgb8) -> Self {
            let widen = |v: u8| (65535 * v as u32 / 255) as u16;
            Self {
                red: widen(c.red),
                green: widen(c.green),
                blue: widen(c.blue),
            }
        }
    }
}
