//! cell parses the four btree cell shapes.
//!
//! Cell formats from https://www.sqlite.org/fileformat.html#b_tree_pages
//!
//! Table B-Tree Leaf Cell (page type 0x0d):
//! A varint which is the total number of bytes of payload, including any overflow
//! A varint which is the integer key, a.k.a. "rowid"
//! The initial portion of the payload that does not spill to overflow pages.
//! A 4-byte big-endian page number for the first overflow page - omitted if all payload fits.
//!
//! Table B-Tree Interior Cell (page type 0x05):
//! A 4-byte big-endian page number which is the left child pointer.
//! A varint which is the integer key.
//!
//! Index B-Tree Leaf Cell (page type 0x0a):
//! A varint which is the total number of bytes of key payload, including any overflow
//! The initial portion of the payload that does not spill to overflow pages.
//! A 4-byte big-endian page number for the first overflow page - omitted if all payload fits.
//!
//! Index B-Tree Interior Cell (page type 0x02):
//! A 4-byte big-endian page number which is the left child pointer.
//! A varint which is the total number of bytes of key payload, including any overflow
//! The initial portion of the payload that does not spill to overflow pages.
//! A 4-byte big-endian page number for the first overflow page - omitted if all payload fits.

use crate::pager::PageNum;
use crate::varint::read_varint;
use byteorder::{BigEndian, ByteOrder};
use std::ops::Range;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Cell at offset {0} runs past the end of the page.")]
    OutOfBounds(usize),
    #[error("Cell varint is truncated: {0}")]
    Varint(#[from] crate::varint::Error),
    #[error("Cell declares a negative payload size.")]
    NegativePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableLeafCell {
    pub rowid: i64,
    /// Total payload size including any overflow.
    pub payload_size: u64,
    /// The locally stored payload bytes, as a range within the page.
    pub local: Range<usize>,
    /// First page of the overflow chain, present only when the payload spills.
    pub overflow: Option<PageNum>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInteriorCell {
    pub left_child: PageNum,
    pub rowid: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexLeafCell {
    pub payload_size: u64,
    pub local: Range<usize>,
    pub overflow: Option<PageNum>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInteriorCell {
    pub left_child: PageNum,
    pub payload_size: u64,
    pub local: Range<usize>,
    pub overflow: Option<PageNum>,
}

// The local/overflow split, with U the usable page size (pagesize minus
// reserved space).  Table and index btrees use different thresholds; the
// two formulas are not interchangeable.

pub fn max_local_table(usable: u32) -> u64 {
    usable as u64 - 35
}

pub fn max_local_index(usable: u32) -> u64 {
    (usable as u64 - 12) * 64 / 255 - 23
}

pub fn min_local(usable: u32) -> u64 {
    (usable as u64 - 12) * 32 / 255 - 23
}

/// How many of `payload_size` bytes are stored locally in the cell.  When
/// the result is smaller than `payload_size`, the rest lives on an overflow
/// chain whose head page number follows the local bytes.
pub fn local_payload_size(payload_size: u64, usable: u32, index: bool) -> u64 {
    let max_local = if index {
        max_local_index(usable)
    } else {
        max_local_table(usable)
    };
    if payload_size <= max_local {
        return payload_size;
    }
    let min_local = min_local(usable);
    let surplus = min_local + (payload_size - min_local) % (usable as u64 - 4);
    if surplus <= max_local {
        surplus
    } else {
        min_local
    }
}

pub fn parse_table_leaf(
    page: &[u8],
    offset: usize,
    usable: u32,
) -> Result<TableLeafCell, Error> {
    if offset >= page.len() {
        return Err(Error::OutOfBounds(offset));
    }
    let (payload_size, n1) = read_varint(&page[offset..])?;
    if payload_size < 0 {
        return Err(Error::NegativePayload);
    }
    let payload_size = payload_size as u64;
    let (rowid, n2) = read_varint(&page[offset + n1..])?;
    let start = offset + n1 + n2;
    let (local, overflow) = split_payload(page, start, payload_size, usable, false)?;
    Ok(TableLeafCell {
        rowid,
        payload_size,
        local,
        overflow,
    })
}

pub fn parse_table_interior(page: &[u8], offset: usize) -> Result<TableInteriorCell, Error> {
    if offset + 4 > page.len() {
        return Err(Error::OutOfBounds(offset));
    }
    let left_child = BigEndian::read_u32(&page[offset..offset + 4]);
    let (rowid, _) = read_varint(&page[offset + 4..])?;
    Ok(TableInteriorCell { left_child, rowid })
}

pub fn parse_index_leaf(page: &[u8], offset: usize, usable: u32) -> Result<IndexLeafCell, Error> {
    if offset >= page.len() {
        return Err(Error::OutOfBounds(offset));
    }
    let (payload_size, n) = read_varint(&page[offset..])?;
    if payload_size < 0 {
        return Err(Error::NegativePayload);
    }
    let payload_size = payload_size as u64;
    let (local, overflow) = split_payload(page, offset + n, payload_size, usable, true)?;
    Ok(IndexLeafCell {
        payload_size,
        local,
        overflow,
    })
}

pub fn parse_index_interior(
    page: &[u8],
    offset: usize,
    usable: u32,
) -> Result<IndexInteriorCell, Error> {
    if offset + 4 > page.len() {
        return Err(Error::OutOfBounds(offset));
    }
    let left_child = BigEndian::read_u32(&page[offset..offset + 4]);
    let (payload_size, n) = read_varint(&page[offset + 4..])?;
    if payload_size < 0 {
        return Err(Error::NegativePayload);
    }
    let payload_size = payload_size as u64;
    let (local, overflow) = split_payload(page, offset + 4 + n, payload_size, usable, true)?;
    Ok(IndexInteriorCell {
        left_child,
        payload_size,
        local,
        overflow,
    })
}

/// Applies the local/overflow split at `start` and bounds-checks the result
/// against the page, returning the local byte range and the overflow head
/// page number when one is present.
fn split_payload(
    page: &[u8],
    start: usize,
    payload_size: u64,
    usable: u32,
    index: bool,
) -> Result<(Range<usize>, Option<PageNum>), Error> {
    let local = local_payload_size(payload_size, usable, index);
    if local == payload_size {
        if payload_size > page.len().saturating_sub(start) as u64 {
            return Err(Error::OutOfBounds(start));
        }
        Ok((start..start + payload_size as usize, None))
    } else {
        let local = local as usize;
        if start + local + 4 > page.len() {
            return Err(Error::OutOfBounds(start));
        }
        let head = BigEndian::read_u32(&page[start + local..start + local + 4]);
        Ok((start..start + local, Some(head)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_thresholds_at_4k() {
        // U = 4096: the canonical page size.
        assert_eq!(max_local_table(4096), 4061);
        assert_eq!(max_local_index(4096), 1002);
        assert_eq!(min_local(4096), 489);
    }

    #[test]
    fn test_local_size_at_and_past_the_threshold() {
        // At the threshold everything is local; one byte past it spills, and
        // since the surplus formula would still exceed max_local, the local
        // part collapses to min_local.
        assert_eq!(local_payload_size(4061, 4096, false), 4061);
        assert_eq!(local_payload_size(4062, 4096, false), 489);
        // A payload that wraps far past the modulus keeps a mid-size local part.
        assert_eq!(local_payload_size(4600, 4096, false), 489 + (4600 - 489) % 4092);
    }

    #[test]
    fn test_local_size_falls_back_to_min_local() {
        // Pick a payload whose surplus formula exceeds max_local for the
        // index case, forcing the min_local fallback: U=512, max=102, min=39.
        assert_eq!(max_local_index(512), 102);
        assert_eq!(min_local(512), 39);
        // surplus = 39 + (700 - 39) % 508 = 39 + 153 = 192 > 102 -> 39? No:
        // 192 > 102 so local = min_local = 39.
        assert_eq!(local_payload_size(700, 512, true), 39);
    }

    #[test]
    fn test_parse_table_leaf_without_overflow() {
        // payload 2, rowid 5, record {literal 1}.
        let mut page = vec![0_u8; 512];
        page[100..104].copy_from_slice(&[0x02, 0x05, 0x02, 0x09]);
        let c = parse_table_leaf(&page, 100, 512).unwrap();
        assert_eq!(c.rowid, 5);
        assert_eq!(c.payload_size, 2);
        assert_eq!(c.local, 102..104);
        assert_eq!(c.overflow, None);
    }

    #[test]
    fn test_parse_table_leaf_with_overflow() {
        // U=512: payload 600 spills; local = 39 + (600-39) % 508 = 92.
        assert_eq!(local_payload_size(600, 512, false), 92);
        let mut page = vec![0_u8; 512];
        let mut cell = vec![0x84, 0x58, 0x01]; // payload 600, rowid 1
        cell.extend(std::iter::repeat(0xaa).take(92));
        cell.extend(7_u32.to_be_bytes()); // overflow head
        page[256..256 + cell.len()].copy_from_slice(&cell);
        let c = parse_table_leaf(&page, 256, 512).unwrap();
        assert_eq!(c.payload_size, 600);
        assert_eq!(c.local.len(), 92);
        assert_eq!(c.overflow, Some(7));
    }

    #[test]
    fn test_parse_table_interior() {
        let mut page = vec![0_u8; 512];
        page[12..17].copy_from_slice(&[0x00, 0x00, 0x00, 0x06, 0x2a]);
        let c = parse_table_interior(&page, 12).unwrap();
        assert_eq!(c.left_child, 6);
        assert_eq!(c.rowid, 42);
    }

    #[test]
    fn test_parse_index_interior_with_payload() {
        let mut page = vec![0_u8; 512];
        // left child 3, payload 2 bytes.
        page[20..27].copy_from_slice(&[0x00, 0x00, 0x00, 0x03, 0x02, 0x03, 0x15]);
        let c = parse_index_interior(&page, 20, 512).unwrap();
        assert_eq!(c.left_child, 3);
        assert_eq!(c.payload_size, 2);
        assert_eq!(c.local, 25..27);
        assert_eq!(c.overflow, None);
    }

    #[test]
    fn test_cell_running_off_the_page_is_an_error() {
        // Payload of 100 declared 4 bytes before the end of the page.
        let mut page = vec![0_u8; 512];
        page[508] = 100;
        page[509] = 1;
        assert!(matches!(
            parse_table_leaf(&page, 508, 512),
            Err(Error::OutOfBounds(_))
        ));
        // Truncated varint at the very last byte.
        page[511] = 0x80;
        assert!(matches!(
            parse_table_interior(&page, 510),
            Err(Error::OutOfBounds(_)) | Err(Error::Varint(_))
        ));
    }
}
