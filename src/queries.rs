//! queries are the externally useful questions built on the walkers:
//! freelist integrity, whole-file accounting, freelist/btree conflicts,
//! page ownership, and locating one row's raw record by rowid.
//!
//! Each report keeps its identifying fields public so callers can assert on
//! them; `Display` renders the stable textual shape.

use std::collections::HashSet;

use itertools::Itertools;

use crate::btree::walk::{BtreeWalker, MAX_DEPTH};
use crate::btree::{btree_start_offset, cell, header, PageType};
use crate::freelist::{self, FreelistWalk};
use crate::pagemap::{PageMap, PageRole};
use crate::pager::{PageNum, Pager};
use crate::record::{self, ParsedRecord};
use crate::schema::RootEntry;
use crate::serial_type;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
    #[error(transparent)]
    Walk(#[from] crate::btree::walk::Error),
    #[error("Root page {0} is outside the file.")]
    RootOutOfRange(PageNum),
    #[error("Page {0} is not a table btree page.")]
    NotATableBtree(PageNum),
    #[error("Rowid {0} was not found in the btree rooted at page {1}.")]
    RowidNotFound(i64, PageNum),
    #[error("Descent from page {0} exceeded the depth cap; cyclic or corrupt btree.")]
    DepthExceeded(PageNum),
}

// ---------------------------------------------------------------- freelist

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreelistVerdict {
    /// Observed count equals the header count.
    Match,
    /// Observed more pages than the header claims.
    Overage(u32),
    /// Observed fewer pages than the header claims.
    Shortage(u32),
}

#[derive(Debug)]
pub struct FreelistReport {
    pub pagesize: u32,
    pub max_page: PageNum,
    pub first_trunk: PageNum,
    pub header_count: u32,
    pub walk: FreelistWalk,
}

impl FreelistReport {
    pub fn verdict(&self) -> FreelistVerdict {
        let observed = self.walk.total_pages();
        match observed.cmp(&self.header_count) {
            std::cmp::Ordering::Equal => FreelistVerdict::Match,
            std::cmp::Ordering::Greater => FreelistVerdict::Overage(observed - self.header_count),
            std::cmp::Ordering::Less => FreelistVerdict::Shortage(self.header_count - observed),
        }
    }
}

impl std::fmt::Display for FreelistReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "page size:       {}", self.pagesize)?;
        writeln!(f, "pages in file:   {}", self.max_page)?;
        writeln!(f, "first trunk:     {}", self.first_trunk)?;
        writeln!(f, "trunks observed: {}", self.walk.trunk_count())?;
        writeln!(f, "leaves observed: {}", self.walk.leaf_count())?;
        writeln!(f, "header count:    {}", self.header_count)?;
        match self.verdict() {
            FreelistVerdict::Match => writeln!(f, "verdict: match")?,
            FreelistVerdict::Overage(n) => writeln!(f, "verdict: overage({})", n)?,
            FreelistVerdict::Shortage(n) => writeln!(f, "verdict: shortage({})", n)?,
        }
        if self.walk.cycle_detected {
            writeln!(f, "warning: trunk chain contains a cycle")?;
        }
        if self.walk.clamped_trunks > 0 {
            writeln!(
                f,
                "warning: {} trunk(s) declared an impossible leaf count",
                self.walk.clamped_trunks
            )?;
        }
        if let Some(msg) = &self.walk.aborted {
            writeln!(f, "warning: walk stopped early: {}", msg)?;
        }
        for t in &self.walk.trunks {
            writeln!(
                f,
                "trunk page {} (next={}): {} leaves: [{}]",
                t.pgno,
                t.next,
                t.leaves.len(),
                t.leaves.iter().map(|l| l.to_string()).join(", ")
            )?;
        }
        Ok(())
    }
}

/// Walks the freelist and compares the observed page count with the
/// header's claim.
pub fn freelist_check(pager: &mut Pager) -> Result<FreelistReport, Error> {
    let walk = freelist::walk(pager)?;
    Ok(FreelistReport {
        pagesize: pager.pagesize(),
        max_page: pager.max_page(),
        first_trunk: pager.header().freelist_head,
        header_count: pager.header().freelist_pages,
        walk,
    })
}

// --------------------------------------------------------------- conflicts

#[derive(Debug)]
pub struct ConflictReport {
    /// Pages observed by both the freelist walk and the btree walk.
    pub pages: Vec<PageNum>,
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "pages on both the freelist and a btree: {}",
            self.pages.len()
        )?;
        if !self.pages.is_empty() {
            writeln!(f, "[{}]", self.pages.iter().map(|p| p.to_string()).join(", "))?;
        }
        Ok(())
    }
}

/// Collects the freelist page set and the btree-reachable page set
/// independently and reports their intersection.  On a healthy file the
/// two are disjoint.
pub fn find_conflicts(pager: &mut Pager, roots: &[RootEntry]) -> Result<ConflictReport, Error> {
    let fl = freelist::walk(pager)?;
    let free_pages: HashSet<PageNum> = fl.pages().collect();

    let mut map = PageMap::new(pager.max_page());
    {
        let mut walker = BtreeWalker::new(pager, &mut map);
        walker.walk(1, 0)?;
        for entry in roots {
            if let Err(e) = walker.walk(entry.root, 0) {
                log::warn!("walk of root {} ({}) failed: {}", entry.root, entry.name, e);
            }
        }
    }

    let mut pages: Vec<PageNum> = free_pages
        .into_iter()
        .filter(|p| {
            let r = map.role(*p);
            r.is_btree() || r == PageRole::Overflow
        })
        .collect();
    pages.sort_unstable();
    Ok(ConflictReport { pages })
}

// --------------------------------------------------------------- ownership

#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    /// "table btree", "index btree", or "btree" when the root's own type
    /// could not be read.
    pub kind: &'static str,
    pub name: String,
    pub root: PageNum,
}

#[derive(Debug)]
pub struct PageOwnership {
    pub pgno: PageNum,
    pub owners: Vec<Owner>,
    pub in_freelist: bool,
}

#[derive(Debug)]
pub struct OwnerReport {
    pub entries: Vec<PageOwnership>,
}

impl std::fmt::Display for OwnerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for e in &self.entries {
            if e.owners.is_empty() && !e.in_freelist {
                writeln!(f, "page {}: not in any btree or the freelist", e.pgno)?;
                continue;
            }
            for o in &e.owners {
                writeln!(
                    f,
                    "page {}: reached by {} '{}' (root {})",
                    e.pgno, o.kind, o.name, o.root
                )?;
            }
            if e.in_freelist {
                writeln!(f, "page {}: on the freelist", e.pgno)?;
            }
        }
        Ok(())
    }
}

/// For each queried page, walks every root with a fresh bitset and reports
/// which walks reach it.  Page 1 is included implicitly as `sqlite_schema`.
pub fn page_owner(
    pager: &mut Pager,
    roots: &[RootEntry],
    pages: &[PageNum],
) -> Result<OwnerReport, Error> {
    let fl = freelist::walk(pager)?;
    let free_pages: HashSet<PageNum> = fl.pages().collect();

    let mut entries: Vec<PageOwnership> = pages
        .iter()
        .map(|p| PageOwnership {
            pgno: *p,
            owners: Vec::new(),
            in_freelist: free_pages.contains(p),
        })
        .collect();

    let schema_root = RootEntry {
        name: "sqlite_schema".to_string(),
        root: 1,
    };
    for entry in std::iter::once(&schema_root).chain(roots.iter()) {
        let mut map = PageMap::new(pager.max_page());
        {
            let mut walker = BtreeWalker::new(pager, &mut map);
            if let Err(e) = walker.walk(entry.root, 0) {
                log::warn!("walk of root {} ({}) failed: {}", entry.root, entry.name, e);
                continue;
            }
        }
        let kind = match map.role(entry.root) {
            r if r == PageRole::BtreeInteriorTable || r == PageRole::BtreeLeafTable => {
                "table btree"
            }
            r if r == PageRole::BtreeInteriorIndex || r == PageRole::BtreeLeafIndex => {
                "index btree"
            }
            _ => "btree",
        };
        for po in entries.iter_mut() {
            if map.role(po.pgno) != PageRole::Unknown {
                po.owners.push(Owner {
                    kind,
                    name: entry.name.clone(),
                    root: entry.root,
                });
            }
        }
    }
    Ok(OwnerReport { entries })
}

// -------------------------------------------------------------- row dumps

#[derive(Debug)]
pub struct RowDump {
    pub root: PageNum,
    pub rowid: i64,
    pub leaf_page: PageNum,
    pub cell_index: usize,
    pub payload_size: u64,
    pub local_payload: Vec<u8>,
    pub overflow_head: Option<PageNum>,
    /// None when the record header itself was undecodable.
    pub record: Option<ParsedRecord>,
}

impl std::fmt::Display for RowDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "rowid {} found on page {} (cell {}, btree root {})",
            self.rowid, self.leaf_page, self.cell_index, self.root
        )?;
        writeln!(
            f,
            "record size: {} bytes ({} local)",
            self.payload_size,
            self.local_payload.len()
        )?;
        if let Some(head) = self.overflow_head {
            writeln!(f, "first overflow page: {}", head)?;
        }
        match &self.record {
            Some(rec) => {
                writeln!(
                    f,
                    "record header: {} bytes ({:#x})",
                    rec.header_size, rec.header_size
                )?;
                if rec.header_spilled {
                    writeln!(f, "record header continues on the overflow chain")?;
                }
                for (i, col) in rec.columns.iter().enumerate() {
                    match &col.value {
                        Some(v) => writeln!(
                            f,
                            "col {:2}: {:12} = {}",
                            i,
                            serial_type::describe(col.serial_type),
                            v
                        )?,
                        None => writeln!(
                            f,
                            "col {:2}: {:12} = <spilled to overflow>",
                            i,
                            serial_type::describe(col.serial_type)
                        )?,
                    }
                }
            }
            None => writeln!(f, "record header is undecodable")?,
        }
        writeln!(f, "local payload:")?;
        for (i, chunk) in self.local_payload.chunks(16).enumerate() {
            writeln!(
                f,
                "{:08x}  {}",
                i * 16,
                chunk.iter().map(|b| format!("{:02x}", b)).join(" ")
            )?;
        }
        Ok(())
    }
}

/// Descends the table btree at `root` by rowid and dumps the matching
/// cell's record.  Interior keys are upper bounds for their left subtree,
/// so a key equal to the target descends left; the rightmost child holds
/// everything greater than all cell keys.
// TODO: optionally reassemble the overflow chain so spilled columns can be
// decoded instead of only reported.
pub fn dump_rowid(pager: &mut Pager, root: PageNum, rowid: i64) -> Result<RowDump, Error> {
    if root < 1 || root > pager.max_page() {
        return Err(Error::RootOutOfRange(root));
    }
    let usable = pager.usable_size();
    let mut pgno = root;

    for _depth in 0..=MAX_DEPTH {
        let page = pager.read_page(pgno)?;
        let offset = btree_start_offset(pgno);
        let hdr = header::parse(&page, offset).map_err(|_| Error::NotATableBtree(pgno))?;
        let cps = header::cell_pointers(&page, offset, &hdr);
        match hdr.page_type {
            PageType::TableLeaf => {
                for (i, cp) in cps.offsets.iter().enumerate() {
                    let c = match cell::parse_table_leaf(&page, *cp, usable) {
                        Ok(c) => c,
                        Err(e) => {
                            log::warn!("page {}: skipping cell at {:#x}: {}", pgno, cp, e);
                            continue;
                        }
                    };
                    if c.rowid != rowid {
                        continue;
                    }
                    let local_payload = page[c.local.clone()].to_vec();
                    let record = record::parse_record(&local_payload, c.payload_size)
                        .map_err(|e| {
                            log::warn!("record of rowid {} is undecodable: {}", rowid, e);
                            e
                        })
                        .ok();
                    return Ok(RowDump {
                        root,
                        rowid,
                        leaf_page: pgno,
                        cell_index: i,
                        payload_size: c.payload_size,
                        local_payload,
                        overflow_head: c.overflow,
                        record,
                    });
                }
                return Err(Error::RowidNotFound(rowid, root));
            }
            PageType::TableInterior => {
                // Cells are in ascending key order; take the first child
                // whose key bounds the target from above.
                let mut next = match hdr.rightmost_pointer {
                    Some(p) => p,
                    None => return Err(Error::NotATableBtree(pgno)),
                };
                for cp in cps.offsets {
                    match cell::parse_table_interior(&page, cp) {
                        Ok(c) => {
                            if rowid <= c.rowid {
                                next = c.left_child;
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("page {}: skipping cell at {:#x}: {}", pgno, cp, e)
                        }
                    }
                }
                if next < 1 || next > pager.max_page() {
                    return Err(Error::RootOutOfRange(next));
                }
                pgno = next;
            }
            _ => return Err(Error::NotATableBtree(pgno)),
        }
    }
    Err(Error::DepthExceeded(root))
}
