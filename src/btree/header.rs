//! header reads the header of a btree page.
//! A b-tree page is divided into regions in the following order
//! 1. The 100-byte database file header (found on page 1 only)
//! 2. The 8 or 12 byte b-tree page header
//! 3. The cell pointer array
//! 4. Unallocated space
//! 5. The cell content area
//! 6. The reserved region.

use super::PageType;
use crate::pager::PageNum;
use byteorder::{BigEndian, ByteOrder};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Page is too short to hold a btree page header.")]
    TooShort,
    #[error("Invalid btree page type: {0:#04x}.")]
    InvalidPageType(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub first_freeblock: u16,
    pub num_cells: u16,
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    pub rightmost_pointer: Option<PageNum>,
}

/// Parses the btree page header found at `offset` within `page` (100 on
/// page 1, 0 elsewhere).  Every read is checked against the page boundary;
/// the page comes from a possibly corrupt file.
pub fn parse(page: &[u8], offset: usize) -> Result<PageHeader, Error> {
    if offset + 8 > page.len() {
        return Err(Error::TooShort);
    }
    // Offset	Size	Description
    // 0	1	The one-byte flag at offset 0 indicating the b-tree page type.
    let page_type =
        PageType::from_byte(page[offset]).ok_or(Error::InvalidPageType(page[offset]))?;
    // 1	2	Start of the first freeblock on the page, or zero if none.
    let first_freeblock = BigEndian::read_u16(&page[offset + 1..offset + 3]);
    // 3	2	The number of cells on the page.
    let num_cells = BigEndian::read_u16(&page[offset + 3..offset + 5]);
    // 5	2	Start of the cell content area. Zero is interpreted as 65536.
    let cell_content_start = match BigEndian::read_u16(&page[offset + 5..offset + 7]) {
        0 => 65536,
        x => x as u32,
    };
    // 7	1	The number of fragmented free bytes within the cell content area.
    let fragmented_free_bytes = page[offset + 7];
    // 8	4	The right-most pointer. Interior b-tree pages only.
    let rightmost_pointer = if page_type.is_interior() {
        if offset + 12 > page.len() {
            return Err(Error::TooShort);
        }
        Some(BigEndian::read_u32(&page[offset + 8..offset + 12]))
    } else {
        None
    };

    Ok(PageHeader {
        page_type,
        first_freeblock,
        num_cells,
        cell_content_start,
        fragmented_free_bytes,
        rightmost_pointer,
    })
}

/// The cell pointer array, with the safety clamps applied.
#[derive(Debug, Default)]
pub struct CellPointers {
    /// Offsets (within the whole page) of cells whose pointers were in range.
    pub offsets: Vec<usize>,
    /// Cell pointers discarded because they pointed outside the valid cell
    /// area `[offset + header, pagesize)`.
    pub skipped: u32,
    /// True when the declared cell count was clamped to pagesize / 2.
    pub clamped: bool,
}

/// Reads the cell pointer array that immediately follows the page header.
///
/// The declared cell count is clamped to `pagesize / 2` (a page cannot hold
/// more 2-byte pointers than that), and individual offsets outside the cell
/// area are dropped with a diagnostic rather than trusted.
pub fn cell_pointers(page: &[u8], offset: usize, header: &PageHeader) -> CellPointers {
    let mut out = CellPointers::default();
    let array_start = offset + header.page_type.header_size();
    let cell_area_start = array_start; // cells can begin right after the pointer array
    let max_cells = page.len() / 2;
    let mut num_cells = header.num_cells as usize;
    if num_cells > max_cells {
        log::warn!(
            "cell count {} exceeds what a {} byte page can hold; clamping to {}",
            num_cells,
            page.len(),
            max_cells
        );
        num_cells = max_cells;
        out.clamped = true;
    }
    for i in 0..num_cells {
        let p = array_start + 2 * i;
        if p + 2 > page.len() {
            out.skipped += header.num_cells as u32 - i as u32;
            log::warn!("cell pointer array runs off the end of the page");
            break;
        }
        let cell_offset = BigEndian::read_u16(&page[p..p + 2]) as usize;
        if cell_offset < cell_area_start || cell_offset >= page.len() {
            log::warn!(
                "cell pointer {} points at {:#x}, outside the cell area; skipping",
                i,
                cell_offset
            );
            out.skipped += 1;
            continue;
        }
        out.offsets.push(cell_offset);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn leaf_page_with_cells(pointers: &[u16]) -> Vec<u8> {
        let mut page = vec![0_u8; 512];
        page[0] = 0x0d;
        page[3..5].copy_from_slice(&(pointers.len() as u16).to_be_bytes());
        page[5..7].copy_from_slice(&0x1f0_u16.to_be_bytes());
        for (i, p) in pointers.iter().enumerate() {
            page[8 + 2 * i..10 + 2 * i].copy_from_slice(&p.to_be_bytes());
        }
        page
    }

    #[test]
    fn test_parse_leaf_header() {
        let page = leaf_page_with_cells(&[0x1f0, 0x1e0]);
        let h = parse(&page, 0).unwrap();
        assert_eq!(h.page_type, PageType::TableLeaf);
        assert_eq!(h.num_cells, 2);
        assert_eq!(h.cell_content_start, 0x1f0);
        assert_eq!(h.rightmost_pointer, None);
    }

    #[test]
    fn test_parse_interior_header_has_rightmost() {
        let mut page = vec![0_u8; 512];
        page[0] = 0x05;
        page[8..12].copy_from_slice(&9_u32.to_be_bytes());
        let h = parse(&page, 0).unwrap();
        assert_eq!(h.page_type, PageType::TableInterior);
        assert_eq!(h.rightmost_pointer, Some(9));
    }

    #[test]
    fn test_invalid_type_byte_rejected() {
        let mut page = vec![0_u8; 512];
        page[0] = 0x03;
        assert_eq!(parse(&page, 0), Err(Error::InvalidPageType(0x03)));
    }

    #[test]
    fn test_cell_content_start_zero_means_65536() {
        let mut page = vec![0_u8; 512];
        page[0] = 0x0d;
        let h = parse(&page, 0).unwrap();
        assert_eq!(h.cell_content_start, 65536);
    }

    #[test]
    fn test_out_of_area_cell_pointers_are_skipped() {
        // Second pointer lands inside the page header; third beyond the page.
        let page = leaf_page_with_cells(&[0x1f0, 0x0004, 0x0300]);
        let h = parse(&page, 0).unwrap();
        let cps = cell_pointers(&page, 0, &h);
        assert_eq!(cps.offsets, vec![0x1f0]);
        assert_eq!(cps.skipped, 2);
        assert!(!cps.clamped);
    }

    #[test]
    fn test_absurd_cell_count_is_clamped() {
        let mut page = leaf_page_with_cells(&[]);
        page[3..5].copy_from_slice(&u16::MAX.to_be_bytes());
        let h = parse(&page, 0).unwrap();
        let cps = cell_pointers(&page, 0, &h);
        assert!(cps.clamped);
        // All pointers in the zeroed array point at offset 0, inside the header.
        assert!(cps.offsets.is_empty());
    }
}
