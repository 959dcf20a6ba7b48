//! Reader for the header and first IFD of little-endian TIFF files.
//!
//! Only what is needed to patch a colour map is decoded: the header, the
//! entry table of the first directory, and the raw value/offset of each
//! entry. Multi-IFD files are accepted but only the first IFD is read.

use frak_common::tiff::{BYTE_ORDER_LE, COLOR_MAP_ENTRIES, FieldType, MAGIC, Tag};
use nom::IResult;
use nom::combinator::map;
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32};
use nom::sequence::tuple;

use crate::TiffError;
use crate::tiff::{COLOR_MAP_LEN, Palette, write_color_map};

/// A raw IFD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub value_or_offset: u32,
}

struct Header {
    byte_order: u16,
    magic: u16,
    ifd_offset: u32,
}

fn header(input: &[u8]) -> IResult<&[u8], Header> {
    map(
        tuple((le_u16, le_u16, le_u32)),
        |(byte_order, magic, ifd_offset)| Header {
            byte_order,
            magic,
            ifd_offset,
        },
    )(input)
}

fn entry(input: &[u8]) -> IResult<&[u8], IfdEntry> {
    map(
        tuple((le_u16, le_u16, le_u32, le_u32)),
        |(tag, field_type, count, value_or_offset)| IfdEntry {
            tag,
            field_type,
            count,
            value_or_offset,
        },
    )(input)
}

fn ifd(input: &[u8]) -> IResult<&[u8], Vec<IfdEntry>> {
    let (input, len) = le_u16(input)?;
    count(entry, len as usize)(input)
}

/// Parses the header and returns the entries of the first IFD.
pub fn read_first_ifd(file: &[u8]) -> Result<Vec<IfdEntry>, TiffError> {
    let (_, header) = header(file).map_err(|_| TiffError::Truncated("header"))?;
    if header.byte_order != BYTE_ORDER_LE || header.magic != MAGIC {
        return Err(TiffError::UnsupportedHeader);
    }

    let directory = file
        .get(header.ifd_offset as usize..)
        .ok_or(TiffError::Truncated("IFD"))?;
    let (_, entries) = ifd(directory).map_err(|_| TiffError::Truncated("IFD"))?;
    Ok(entries)
}

pub fn find_entry(entries: &[IfdEntry], tag: Tag) -> Option<&IfdEntry> {
    entries.iter().find(|e| e.tag == tag as u16)
}

/// Overwrites the colour map of an encoded TIFF with `palette`.
///
/// Nothing else in `file` is modified. The existing map must be a SHORT
/// entry of exactly 3 × 256 values.
pub fn update_color_map(file: &mut [u8], palette: &Palette) -> Result<(), TiffError> {
    let entries = read_first_ifd(file)?;
    if entries.is_empty() {
        return Err(TiffError::EmptyIfd);
    }

    let map = find_entry(&entries, Tag::ColorMap).ok_or(TiffError::MissingColorMap)?;
    if map.field_type != FieldType::Short as u16 {
        return Err(TiffError::MalformedColorMap {
            field_type: map.field_type,
        });
    }
    if map.count as usize != 3 * COLOR_MAP_ENTRIES {
        return Err(TiffError::ColorMapSize { count: map.count });
    }

    let start = map.value_or_offset as usize;
    let region = file
        .get_mut(start..start + COLOR_MAP_LEN)
        .ok_or(TiffError::Truncated("colour map"))?;
    write_color_map(region, palette);
    Ok(())
}
