//! Builds small database images in memory for the integration tests.
//!
//! No binary fixtures: every scenario constructs its pages byte by byte,
//! writes them to a temp file, and opens that with the pager.  Page size is
//! 512 to keep the images small.

use std::io::Write;

use pagecheck::Pager;

pub const PAGESIZE: usize = 512;

const MAGIC: &[u8; 16] = b"SQLite format 3\0";

pub struct ImageBuilder {
    pages: Vec<Vec<u8>>,
}

impl ImageBuilder {
    pub fn new(npages: usize) -> ImageBuilder {
        let mut b = ImageBuilder {
            pages: vec![vec![0_u8; PAGESIZE]; npages],
        };
        b.pages[0][0..16].copy_from_slice(MAGIC);
        b.pages[0][16..18].copy_from_slice(&(PAGESIZE as u16).to_be_bytes());
        b.pages[0][28..32].copy_from_slice(&(npages as u32).to_be_bytes());
        b
    }

    pub fn set_freelist(&mut self, head: u32, count: u32) {
        self.pages[0][32..36].copy_from_slice(&head.to_be_bytes());
        self.pages[0][36..40].copy_from_slice(&count.to_be_bytes());
    }

    #[allow(dead_code)]
    pub fn set_autovacuum(&mut self, largest_root: u32) {
        self.pages[0][52..56].copy_from_slice(&largest_root.to_be_bytes());
    }

    /// Raw access to a page, 1-based like the file format.
    pub fn page_mut(&mut self, pgno: u32) -> &mut [u8] {
        &mut self.pages[pgno as usize - 1]
    }

    fn btree_page(&mut self, pgno: u32, type_byte: u8, cells: &[Vec<u8>], rightmost: Option<u32>) {
        let off = if pgno == 1 { 100 } else { 0 };
        let hsize = if rightmost.is_some() { 12 } else { 8 };
        let page = self.page_mut(pgno);
        page[off] = type_byte;
        page[off + 3..off + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
        if let Some(rm) = rightmost {
            page[off + 8..off + 12].copy_from_slice(&rm.to_be_bytes());
        }
        // Cells grow from the high end of the page toward the low end.
        let mut pos = PAGESIZE;
        for (i, cell) in cells.iter().enumerate() {
            pos -= cell.len();
            page[pos..pos + cell.len()].copy_from_slice(cell);
            let ptr = off + hsize + 2 * i;
            page[ptr..ptr + 2].copy_from_slice(&(pos as u16).to_be_bytes());
        }
        page[off + 5..off + 7].copy_from_slice(&(pos as u16).to_be_bytes());
    }

    /// A table leaf page whose rows are `{literal 1}` records, one per rowid.
    /// Rowids must be below 128 so every varint is a single byte.
    pub fn leaf_table(&mut self, pgno: u32, rowids: &[i64]) {
        let cells: Vec<Vec<u8>> = rowids
            .iter()
            .map(|r| vec![0x02, *r as u8, 0x02, 0x09])
            .collect();
        self.btree_page(pgno, 0x0d, &cells, None);
    }

    /// A table leaf page from raw cell bytes, for overflow and schema rows.
    pub fn leaf_table_cells(&mut self, pgno: u32, cells: &[Vec<u8>]) {
        self.btree_page(pgno, 0x0d, cells, None);
    }

    /// A table interior page with `(left_child, key)` cells.  Keys must be
    /// below 128.
    pub fn interior_table(&mut self, pgno: u32, cells: &[(u32, i64)], rightmost: u32) {
        let cells: Vec<Vec<u8>> = cells
            .iter()
            .map(|(child, key)| {
                let mut v = child.to_be_bytes().to_vec();
                v.push(*key as u8);
                v
            })
            .collect();
        self.btree_page(pgno, 0x05, &cells, Some(rightmost));
    }

    pub fn freelist_trunk(&mut self, pgno: u32, next: u32, leaves: &[u32]) {
        let page = self.page_mut(pgno);
        page[0..4].copy_from_slice(&next.to_be_bytes());
        page[4..8].copy_from_slice(&(leaves.len() as u32).to_be_bytes());
        for (i, leaf) in leaves.iter().enumerate() {
            page[8 + 4 * i..12 + 4 * i].copy_from_slice(&leaf.to_be_bytes());
        }
    }

    /// Writes the image to a temp file and opens it.  The temp file must
    /// outlive the pager, so both are returned.
    pub fn build(&self) -> (tempfile::NamedTempFile, Pager) {
        let mut f = tempfile::NamedTempFile::new().expect("should have created temp file");
        for page in &self.pages {
            f.write_all(page).expect("should have written page");
        }
        f.flush().expect("should have flushed");
        let pager = Pager::open(f.path().to_str().expect("temp path should be utf-8"))
            .expect("should have opened the built image");
        (f, pager)
    }
}

/// A schema-table record `(type, name, tbl_name, rootpage, sql NULL)` with
/// single-byte varints throughout.
pub fn schema_record(typ: &str, name: &str, rootpage: u32) -> Vec<u8> {
    let mut v = vec![
        6,
        (13 + 2 * typ.len()) as u8,
        (13 + 2 * name.len()) as u8,
        (13 + 2 * name.len()) as u8,
        1,
        0,
    ];
    v.extend_from_slice(typ.as_bytes());
    v.extend_from_slice(name.as_bytes());
    v.extend_from_slice(name.as_bytes());
    v.push(rootpage as u8);
    v
}

/// A table-leaf cell wrapping `record` under `rowid`.  Payload must stay
/// below the local threshold and 128 bytes so varints are single bytes.
pub fn leaf_cell(rowid: i64, record: &[u8]) -> Vec<u8> {
    let mut v = vec![record.len() as u8, rowid as u8];
    v.extend_from_slice(record);
    v
}
