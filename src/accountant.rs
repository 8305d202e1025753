//! accountant assigns a role to every page in the file and checks the
//! partition against the header's own bookkeeping.
//!
//! Order matters and is fixed: lock-byte page, freelist, pointer maps,
//! btrees (page 1 plus every supplied root), then the orphan scan over
//! whatever is left.  Conflicts surface wherever a later walk touches an
//! already-claimed page; they are recorded, never resolved.

use crate::btree::walk::{BtreeWalker, WalkStats};
use crate::btree::PageType;
use crate::freelist::{self, FreelistWalk};
use crate::pagemap::{PageMap, PageRole};
use crate::pager::{PageNum, Pager};
use crate::ptrmap::{self, PtrmapStats};
use crate::schema::RootEntry;

use byteorder::{BigEndian, ByteOrder};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
    #[error(transparent)]
    Walk(#[from] crate::btree::walk::Error),
}

/// The result of a full accounting run.
#[derive(Debug)]
pub struct Accounting {
    pub pagesize: u32,
    pub max_page: PageNum,
    pub header_numpages: u32,
    pub header_freelist_pages: u32,
    pub autovacuum: bool,
    pub map: PageMap,
    pub freelist: FreelistWalk,
    pub ptrmap: PtrmapStats,
    pub walk_stats: WalkStats,
    /// Roots whose walk failed outright (bad page number, read error).
    pub failed_roots: Vec<(String, String)>,
}

impl Accounting {
    pub fn orphan_pages(&self) -> Vec<PageNum> {
        let mut v: Vec<PageNum> = PageRole::ALL
            .iter()
            .filter(|r| r.is_orphan())
            .flat_map(|r| self.map.pages_with(*r))
            .collect();
        v.sort_unstable();
        v
    }

    pub fn unknown_pages(&self) -> Vec<PageNum> {
        self.map.pages_with(PageRole::Unknown)
    }

    /// Every ghost observation, whether made by the ptrmap pass or by a
    /// btree walk crossing a ptrmap position.
    pub fn ghost_ptrmap_count(&self) -> u32 {
        self.ptrmap.ghost_ptrmaps + self.walk_stats.ghost_ptrmaps
    }

    /// True when every page carries a role, nothing is orphaned, and no
    /// page was claimed twice.
    pub fn fully_accounted(&self) -> bool {
        self.unknown_pages().is_empty()
            && self.orphan_pages().is_empty()
            && self.map.conflicts().is_empty()
    }
}

/// Runs the full accounting over `pager`.  `roots` lists every known btree
/// root beyond page 1, however the caller obtained them.
pub fn account(pager: &mut Pager, roots: &[RootEntry]) -> Result<Accounting, Error> {
    let max_page = pager.max_page();
    let mut map = PageMap::new(max_page);

    // The lock-byte page is never part of any structure; claim it first so
    // a corrupt pointer into it shows up as a conflict.
    if let Some(lock_pgno) = pager.lock_byte_page() {
        map.classify(lock_pgno, PageRole::LockByte, 0);
    }

    let fl = freelist::walk(pager)?;
    for trunk in &fl.trunks {
        map.classify(trunk.pgno, PageRole::FreelistTrunk, 0);
        for &leaf in &trunk.leaves {
            map.classify(leaf, PageRole::FreelistLeaf, trunk.pgno);
        }
    }

    let ptrmap_stats = ptrmap::classify_all(pager, &mut map)?;

    let mut failed_roots = Vec::new();
    let walk_stats = {
        let mut walker = BtreeWalker::new(pager, &mut map);
        if let Err(e) = walker.walk(1, 0) {
            failed_roots.push(("sqlite_schema".to_string(), e.to_string()));
        }
        for entry in roots {
            if let Err(e) = walker.walk(entry.root, 0) {
                log::warn!("walk of root {} ({}) failed: {}", entry.root, entry.name, e);
                failed_roots.push((entry.name.clone(), e.to_string()));
            }
        }
        walker.stats
    };

    scan_orphans(pager, &mut map);

    Ok(Accounting {
        pagesize: pager.pagesize(),
        max_page,
        header_numpages: pager.header().numpages,
        header_freelist_pages: pager.header().freelist_pages,
        autovacuum: pager.header().autovacuum != 0,
        map,
        freelist: fl,
        ptrmap: ptrmap_stats,
        walk_stats,
        failed_roots,
    })
}

/// Looks at every page no walk claimed and classifies it by shape alone:
/// all-zero, a btree page nothing points at, or a plausible overflow page.
fn scan_orphans(pager: &mut Pager, map: &mut PageMap) {
    let max_page = pager.max_page();
    for pgno in 1..=max_page {
        if map.role(pgno) != PageRole::Unknown {
            continue;
        }
        let page = match pager.read_page(pgno) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("orphan scan cannot read page {}: {}", pgno, e);
                continue;
            }
        };
        if page.iter().all(|b| *b == 0) {
            map.classify(pgno, PageRole::OrphanEmpty, 0);
            continue;
        }
        if let Some(t) = PageType::from_byte(page[0]) {
            let role = match t {
                PageType::IndexInterior => PageRole::OrphanInteriorIndex,
                PageType::TableInterior => PageRole::OrphanInteriorTable,
                PageType::IndexLeaf => PageRole::OrphanLeafIndex,
                PageType::TableLeaf => PageRole::OrphanLeafTable,
            };
            map.classify(pgno, role, 0);
            continue;
        }
        // An overflow page has no signature beyond a plausible next pointer
        // at offset 0; a zero type byte keeps that pointer small.
        if page[0] == 0 {
            let next = BigEndian::read_u32(&page[0..4]);
            if next == 0 || next <= max_page {
                map.classify(pgno, PageRole::OrphanOverflow, 0);
                continue;
            }
        }
        // Leave unknown.
    }
}

impl std::fmt::Display for Accounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "page size:        {}", self.pagesize)?;
        writeln!(
            f,
            "pages in file:    {} (header says {})",
            self.max_page, self.header_numpages
        )?;
        writeln!(
            f,
            "auto-vacuum:      {}",
            if self.autovacuum { "on" } else { "off" }
        )?;
        writeln!(f)?;
        for role in PageRole::ALL {
            writeln!(f, "{:32} {:>8}", role.describe(), self.map.count(role))?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "freelist pages observed:   {} (header says {})",
            self.freelist.total_pages(),
            self.header_freelist_pages
        )?;
        writeln!(f, "ghost ptrmap pages:        {}", self.ghost_ptrmap_count())?;
        writeln!(
            f,
            "missing/corrupt ptrmaps:   {}",
            self.ptrmap.missing_ptrmaps
        )?;
        writeln!(f, "cells skipped:             {}", self.walk_stats.skipped_cells)?;
        writeln!(
            f,
            "pointers out of range:     {}",
            self.walk_stats.range_violations
        )?;
        if self.walk_stats.depth_overruns > 0 {
            writeln!(f, "depth-capped subtrees:     {}", self.walk_stats.depth_overruns)?;
        }
        for (name, err) in &self.failed_roots {
            writeln!(f, "walk of root '{}' failed: {}", name, err)?;
        }
        if !self.map.conflicts().is_empty() {
            writeln!(f)?;
            writeln!(f, "conflicts: {}", self.map.conflicts().len())?;
            for c in self.map.conflicts() {
                writeln!(
                    f,
                    "  page {}: {} vs {}",
                    c.pgno, c.existing, c.claimed
                )?;
            }
        }
        writeln!(f)?;
        let orphans = self.orphan_pages();
        let unknown = self.unknown_pages();
        writeln!(f, "orphan pages:  {}", orphans.len())?;
        writeln!(f, "unknown pages: {}", unknown.len())?;
        if self.fully_accounted() {
            writeln!(f, "verdict: all pages accounted for")?;
        } else {
            writeln!(
                f,
                "verdict: {} orphan, {} unknown, {} conflict(s)",
                orphans.len(),
                unknown.len(),
                self.map.conflicts().len()
            )?;
        }
        Ok(())
    }
}
