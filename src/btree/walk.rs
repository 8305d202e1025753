//! walk classifies every page reachable from a btree root.
//!
//! The descent is recursive with one page buffer per frame, so a parent's
//! page survives its children's reads.  The classification array doubles as
//! the visited set: re-entering a page already claimed by the btree walk is
//! a no-op (cycles and DAG merges), while hitting a page owned by another
//! role records a conflict and stops at that boundary.
//!
//! Per page: Unseen -> Visiting -> Classified, or Visiting -> Rejected when
//! the type byte is not a btree type; rejected pages stay unclassified for
//! the orphan scan to look at.

use byteorder::{BigEndian, ByteOrder};

use super::{btree_start_offset, cell, header, PageType};
use crate::pagemap::{PageMap, PageRole};
use crate::pager::{PageNum, Pager};
use crate::ptrmap;

/// Depth cap for the descent.  A healthy btree is a handful of levels deep;
/// anything past this is a corrupt pointer graph, not a tree.
pub const MAX_DEPTH: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WalkStats {
    /// Pages at ptrmap positions with valid ptrmap content seen while
    /// auto-vacuum is off.
    pub ghost_ptrmaps: u32,
    /// Cells skipped for bad pointers or unparseable content.
    pub skipped_cells: u32,
    /// Subtrees cut off by the depth cap.
    pub depth_overruns: u32,
    /// Child or overflow pointers outside 1..=max_page.
    pub range_violations: u32,
}

pub struct BtreeWalker<'a> {
    pager: &'a mut Pager,
    map: &'a mut PageMap,
    pub stats: WalkStats,
}

fn role_for(page_type: PageType) -> PageRole {
    match page_type {
        PageType::IndexInterior => PageRole::BtreeInteriorIndex,
        PageType::TableInterior => PageRole::BtreeInteriorTable,
        PageType::IndexLeaf => PageRole::BtreeLeafIndex,
        PageType::TableLeaf => PageRole::BtreeLeafTable,
    }
}

impl<'a> BtreeWalker<'a> {
    pub fn new(pager: &'a mut Pager, map: &'a mut PageMap) -> BtreeWalker<'a> {
        BtreeWalker {
            pager,
            map,
            stats: WalkStats::default(),
        }
    }

    /// Classifies everything reachable from the root at `pgno`.  Read
    /// failures abort this walk; everything already classified stays.
    pub fn walk(&mut self, pgno: PageNum, parent: PageNum) -> Result<(), Error> {
        self.walk_at(pgno, parent, 0)
    }

    fn walk_at(&mut self, pgno: PageNum, parent: PageNum, depth: usize) -> Result<(), Error> {
        if pgno < 1 || pgno > self.pager.max_page() {
            log::warn!("btree pointer to page {} is outside the file", pgno);
            self.stats.range_violations += 1;
            return Ok(());
        }
        match self.map.role(pgno) {
            PageRole::Unknown => {}
            r if r.is_btree() || r == PageRole::Overflow => return Ok(()),
            r => return self.record_foreign_claim(pgno, r),
        }
        if depth > MAX_DEPTH {
            log::warn!("btree descent below page {} exceeds depth {}", parent, MAX_DEPTH);
            self.stats.depth_overruns += 1;
            return Ok(());
        }

        let page = self.pager.read_page(pgno)?;

        // A page parked at a ptrmap position while auto-vacuum is off may be
        // a leftover from an earlier auto-vacuum life.  Note it, keep going.
        if self.pager.header().autovacuum == 0
            && ptrmap::is_ptrmap_page(self.pager.usable_size(), pgno)
            && ptrmap::looks_like_ptrmap(&page, self.pager.usable_size(), self.pager.max_page())
        {
            log::warn!("page {} looks like a ghost pointer map; walking it anyway", pgno);
            self.stats.ghost_ptrmaps += 1;
        }

        let offset = btree_start_offset(pgno);
        let hdr = match header::parse(&page, offset) {
            Ok(h) => h,
            // Not a btree page; leave it unclassified for the orphan scan.
            Err(_) => return Ok(()),
        };
        self.map.classify(pgno, role_for(hdr.page_type), parent);

        let usable = self.pager.usable_size();
        let cps = header::cell_pointers(&page, offset, &hdr);
        self.stats.skipped_cells += cps.skipped;

        for cp in cps.offsets {
            match hdr.page_type {
                PageType::TableInterior => match cell::parse_table_interior(&page, cp) {
                    Ok(c) => self.walk_at(c.left_child, pgno, depth + 1)?,
                    Err(e) => self.skip_cell(pgno, cp, &e),
                },
                PageType::IndexInterior => match cell::parse_index_interior(&page, cp, usable) {
                    Ok(c) => {
                        self.walk_at(c.left_child, pgno, depth + 1)?;
                        if let Some(head) = c.overflow {
                            self.walk_overflow(head, pgno)?;
                        }
                    }
                    Err(e) => self.skip_cell(pgno, cp, &e),
                },
                PageType::TableLeaf => match cell::parse_table_leaf(&page, cp, usable) {
                    Ok(c) => {
                        if let Some(head) = c.overflow {
                            self.walk_overflow(head, pgno)?;
                        }
                    }
                    Err(e) => self.skip_cell(pgno, cp, &e),
                },
                PageType::IndexLeaf => match cell::parse_index_leaf(&page, cp, usable) {
                    Ok(c) => {
                        if let Some(head) = c.overflow {
                            self.walk_overflow(head, pgno)?;
                        }
                    }
                    Err(e) => self.skip_cell(pgno, cp, &e),
                },
            }
        }

        if let Some(rightmost) = hdr.rightmost_pointer {
            self.walk_at(rightmost, pgno, depth + 1)?;
        }
        Ok(())
    }

    /// Follows an overflow chain, classifying each page, until the next
    /// pointer is 0, invalid, or a page already seen.
    fn walk_overflow(&mut self, head: PageNum, parent: PageNum) -> Result<(), Error> {
        let mut prev = parent;
        let mut next = head;
        while next != 0 {
            if next > self.pager.max_page() {
                log::warn!("overflow pointer to page {} is outside the file", next);
                self.stats.range_violations += 1;
                break;
            }
            match self.map.role(next) {
                PageRole::Unknown => {}
                r if r == PageRole::Overflow || r.is_btree() => {
                    log::warn!("overflow chain re-enters page {}; stopping the chain", next);
                    break;
                }
                r => {
                    self.map.record_conflict(next, r, PageRole::Overflow);
                    break;
                }
            }
            let page = self.pager.read_page(next)?;
            self.map.classify(next, PageRole::Overflow, prev);
            prev = next;
            next = BigEndian::read_u32(&page[0..4]);
        }
        Ok(())
    }

    /// A page reached by this walk but already claimed by a non-btree role:
    /// read its shape to name what the walk would have called it, record the
    /// clash, and do not descend through it.
    fn record_foreign_claim(&mut self, pgno: PageNum, existing: PageRole) -> Result<(), Error> {
        let page = self.pager.read_page(pgno)?;
        let offset = btree_start_offset(pgno);
        if let Some(t) = page.get(offset).copied().and_then(PageType::from_byte) {
            self.map.record_conflict(pgno, existing, role_for(t));
        } else {
            // The walk reached it through a live pointer even though its
            // content is not a recognizable btree page.
            self.map.record_conflict(pgno, existing, PageRole::Overflow);
        }
        Ok(())
    }

    fn skip_cell(&mut self, pgno: PageNum, cp: usize, e: &cell::Error) {
        log::warn!("page {}: skipping cell at {:#x}: {}", pgno, cp, e);
        self.stats.skipped_cells += 1;
    }
}
