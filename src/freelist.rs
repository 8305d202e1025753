//! freelist walks the chain of freelist trunk pages.
//!
//! The header points at the first trunk.  Each trunk page holds a 4-byte
//! next-trunk pointer, a 4-byte leaf count, and that many 4-byte leaf page
//! numbers.  A chain on a corrupt file can loop or point anywhere, so the
//! walk carries a visited set and clamps the per-trunk leaf count.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::pager::{PageNum, Pager};

/// Cap on the trunk visited set.  Past this many distinct trunks, cycle
/// detection degrades but the walk continues.
pub const VISITED_CAP: usize = 10_000;

#[derive(Debug, Clone)]
pub struct TrunkPage {
    pub pgno: PageNum,
    pub next: PageNum,
    /// Leaf count as stored on the page, before clamping.
    pub declared_leaves: u32,
    pub leaves: Vec<PageNum>,
}

#[derive(Debug, Clone, Default)]
pub struct FreelistWalk {
    pub trunks: Vec<TrunkPage>,
    pub cycle_detected: bool,
    /// Trunks whose leaf count exceeded (pagesize - 8) / 4 and was clamped.
    pub clamped_trunks: u32,
    /// Set when an out-of-range pointer stopped the walk early.
    pub aborted: Option<String>,
}

impl FreelistWalk {
    pub fn trunk_count(&self) -> u32 {
        self.trunks.len() as u32
    }

    pub fn leaf_count(&self) -> u32 {
        self.trunks.iter().map(|t| t.leaves.len() as u32).sum()
    }

    /// Total pages observed on the freelist, trunks included.
    pub fn total_pages(&self) -> u32 {
        self.trunk_count() + self.leaf_count()
    }

    /// Every page number the walk observed, trunks then leaves in walk order.
    pub fn pages(&self) -> impl Iterator<Item = PageNum> + '_ {
        self.trunks
            .iter()
            .flat_map(|t| std::iter::once(t.pgno).chain(t.leaves.iter().copied()))
    }
}

/// Follows the freelist chain from the header.  Read failures propagate;
/// range violations stop the walk but keep everything observed so far.
pub fn walk(pager: &mut Pager) -> Result<FreelistWalk, crate::pager::Error> {
    let mut out = FreelistWalk::default();
    let max_page = pager.max_page();
    let max_leaves = (pager.pagesize() - 8) / 4;
    let mut visited: HashSet<PageNum> = HashSet::new();
    let mut next = pager.header().freelist_head;

    'chain: while next != 0 {
        if next > max_page {
            let msg = format!(
                "freelist trunk pointer {} is outside the file (max page {})",
                next, max_page
            );
            log::warn!("{}", msg);
            out.aborted = Some(msg);
            break;
        }
        if visited.contains(&next) {
            log::warn!("freelist trunk chain revisits page {}; cycle", next);
            out.cycle_detected = true;
            break;
        }
        if visited.len() < VISITED_CAP {
            visited.insert(next);
        }

        let page = pager.read_page(next)?;
        let next_trunk = BigEndian::read_u32(&page[0..4]);
        let declared = BigEndian::read_u32(&page[4..8]);
        let nleaves = if declared > max_leaves {
            log::warn!(
                "trunk page {} declares {} leaves; a {} byte page holds at most {}",
                next,
                declared,
                pager.pagesize(),
                max_leaves
            );
            out.clamped_trunks += 1;
            max_leaves
        } else {
            declared
        };

        let mut trunk = TrunkPage {
            pgno: next,
            next: next_trunk,
            declared_leaves: declared,
            leaves: Vec::with_capacity(nleaves as usize),
        };
        for i in 0..nleaves as usize {
            let leaf = BigEndian::read_u32(&page[8 + 4 * i..12 + 4 * i]);
            if leaf < 1 || leaf > max_page {
                let msg = format!(
                    "freelist leaf pointer {} on trunk {} is outside the file",
                    leaf, trunk.pgno
                );
                log::warn!("{}", msg);
                out.aborted = Some(msg);
                out.trunks.push(trunk);
                break 'chain;
            }
            trunk.leaves.push(leaf);
        }
        out.trunks.push(trunk);
        next = next_trunk;
    }

    Ok(out)
}
