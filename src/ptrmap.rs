//! ptrmap locates and validates pointer-map pages.
//!
//! Pointer-map pages exist only in auto-vacuum databases, at positions
//! fully determined by the usable page size: the first candidate is
//! `usable/5 + 1` and they recur with the same stride.  Each entry is five
//! bytes: a one-byte type and a 4-byte parent page number.  A database that
//! once had auto-vacuum on and later had it switched off keeps "ghost"
//! ptrmap pages at those positions.

use byteorder::{BigEndian, ByteOrder};

use crate::pagemap::{PageMap, PageRole};
use crate::pager::{PageNum, Pager};

pub const ENTRY_SIZE: usize = 5;

// Entry types.  1 and 2 carry no parent; 3..=5 must name one.
const TYPE_ROOT: u8 = 1;
const TYPE_FREE: u8 = 2;
const TYPE_MAX: u8 = 5;

/// Distance between consecutive ptrmap candidate positions; also the page
/// number of the first candidate.
pub fn stride(usable: u32) -> PageNum {
    usable / ENTRY_SIZE as u32 + 1
}

/// Whether `pgno` sits at a ptrmap candidate position.
pub fn is_ptrmap_page(usable: u32, pgno: PageNum) -> bool {
    pgno >= stride(usable) && pgno % stride(usable) == 0
}

/// Content-validates a page as a pointer map: every entry type in range,
/// parents in range where the type requires one, and at least one non-zero
/// entry.
pub fn looks_like_ptrmap(page: &[u8], usable: u32, max_page: PageNum) -> bool {
    let entries = (usable as usize / ENTRY_SIZE).min(page.len() / ENTRY_SIZE);
    let mut nonzero = false;
    for i in 0..entries {
        let at = i * ENTRY_SIZE;
        let typ = page[at];
        let parent = BigEndian::read_u32(&page[at + 1..at + 5]);
        if typ > TYPE_MAX {
            return false;
        }
        if typ == 0 {
            // An unused slot must be wholly zero.
            if parent != 0 {
                return false;
            }
            continue;
        }
        nonzero = true;
        if typ == TYPE_ROOT || typ == TYPE_FREE {
            if parent != 0 {
                return false;
            }
        } else if parent < 1 || parent > max_page {
            return false;
        }
    }
    nonzero
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PtrmapStats {
    /// Candidate positions classified as pointer-map pages.
    pub ptrmap_pages: u32,
    /// Valid ptrmap pages found while auto-vacuum is off.
    pub ghost_ptrmaps: u32,
    /// Candidate positions that should hold a ptrmap page (auto-vacuum on)
    /// but are occupied by another role or fail validation.
    pub missing_ptrmaps: u32,
}

/// Visits every candidate position and classifies the ones whose content
/// validates.  Runs after the freelist walk and before the btree walks.
pub fn classify_all(pager: &mut Pager, map: &mut PageMap) -> Result<PtrmapStats, crate::pager::Error> {
    let usable = pager.usable_size();
    let autovacuum = pager.header().autovacuum != 0;
    let max_page = pager.max_page();
    let mut stats = PtrmapStats::default();

    let mut pgno = stride(usable);
    while pgno <= max_page {
        if map.role(pgno) != PageRole::Unknown {
            if autovacuum {
                log::warn!(
                    "expected a pointer map at page {} but it is classified {}",
                    pgno,
                    map.role(pgno)
                );
                stats.missing_ptrmaps += 1;
            }
        } else {
            let page = pager.read_page(pgno)?;
            if looks_like_ptrmap(&page, usable, max_page) {
                map.classify(pgno, PageRole::PtrMap, 0);
                stats.ptrmap_pages += 1;
                if !autovacuum {
                    log::warn!(
                        "page {} holds valid pointer-map content but auto-vacuum is off (ghost)",
                        pgno
                    );
                    stats.ghost_ptrmaps += 1;
                }
            } else if autovacuum {
                log::warn!(
                    "expected a pointer map at page {} but its content does not validate",
                    pgno
                );
                stats.missing_ptrmaps += 1;
            }
        }
        pgno = match pgno.checked_add(stride(usable)) {
            Some(p) => p,
            None => break,
        };
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_candidate_positions() {
        // usable 512 -> stride 103: candidates 103, 206, 309, ...
        assert_eq!(stride(512), 103);
        assert!(is_ptrmap_page(512, 103));
        assert!(is_ptrmap_page(512, 206));
        assert!(!is_ptrmap_page(512, 1));
        assert!(!is_ptrmap_page(512, 104));
        // usable 4096 -> stride 820.
        assert_eq!(stride(4096), 820);
        assert!(is_ptrmap_page(4096, 1640));
    }

    fn entry(page: &mut [u8], i: usize, typ: u8, parent: u32) {
        let at = i * ENTRY_SIZE;
        page[at] = typ;
        page[at + 1..at + 5].copy_from_slice(&parent.to_be_bytes());
    }

    #[test]
    fn test_valid_ptrmap_content() {
        let mut page = vec![0_u8; 512];
        entry(&mut page, 0, 1, 0); // root entry, no parent
        entry(&mut page, 1, 5, 3); // btree entry with parent
        assert!(looks_like_ptrmap(&page, 512, 200));
    }

    #[test]
    fn test_all_zero_page_is_not_a_ptrmap() {
        let page = vec![0_u8; 512];
        assert!(!looks_like_ptrmap(&page, 512, 200));
    }

    #[test]
    fn test_bad_entries_rejected() {
        let mut page = vec![0_u8; 512];
        entry(&mut page, 0, 6, 1); // type out of range
        assert!(!looks_like_ptrmap(&page, 512, 200));

        let mut page = vec![0_u8; 512];
        entry(&mut page, 0, 5, 999); // parent out of range
        assert!(!looks_like_ptrmap(&page, 512, 200));

        let mut page = vec![0_u8; 512];
        entry(&mut page, 0, 1, 7); // root entries carry no parent
        assert!(!looks_like_ptrmap(&page, 512, 200));

        let mut page = vec![0_u8; 512];
        entry(&mut page, 0, 0, 7); // unused slot with a parent is garbage
        assert!(!looks_like_ptrmap(&page, 512, 200));
    }
}
