//! pagemap holds the per-page classification for one query.
//!
//! Every page gets exactly one role.  The first walker to reach a page
//! claims it; a later claim with a different role is recorded as a conflict
//! and never overwrites the original.  The array doubles as the visited set
//! for the btree walk, sized to the real page count of the file.

use crate::pager::PageNum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Unknown,
    FreelistTrunk,
    FreelistLeaf,
    BtreeInteriorTable,
    BtreeLeafTable,
    BtreeInteriorIndex,
    BtreeLeafIndex,
    Overflow,
    PtrMap,
    LockByte,
    OrphanInteriorTable,
    OrphanLeafTable,
    OrphanInteriorIndex,
    OrphanLeafIndex,
    OrphanOverflow,
    OrphanEmpty,
}

impl PageRole {
    /// All roles in report order, unknown last.
    pub const ALL: [PageRole; 16] = [
        PageRole::BtreeInteriorTable,
        PageRole::BtreeLeafTable,
        PageRole::BtreeInteriorIndex,
        PageRole::BtreeLeafIndex,
        PageRole::Overflow,
        PageRole::FreelistTrunk,
        PageRole::FreelistLeaf,
        PageRole::PtrMap,
        PageRole::LockByte,
        PageRole::OrphanInteriorTable,
        PageRole::OrphanLeafTable,
        PageRole::OrphanInteriorIndex,
        PageRole::OrphanLeafIndex,
        PageRole::OrphanOverflow,
        PageRole::OrphanEmpty,
        PageRole::Unknown,
    ];

    pub fn is_btree(self) -> bool {
        matches!(
            self,
            PageRole::BtreeInteriorTable
                | PageRole::BtreeLeafTable
                | PageRole::BtreeInteriorIndex
                | PageRole::BtreeLeafIndex
        )
    }

    pub fn is_orphan(self) -> bool {
        matches!(
            self,
            PageRole::OrphanInteriorTable
                | PageRole::OrphanLeafTable
                | PageRole::OrphanInteriorIndex
                | PageRole::OrphanLeafIndex
                | PageRole::OrphanOverflow
                | PageRole::OrphanEmpty
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            PageRole::Unknown => "unknown",
            PageRole::FreelistTrunk => "freelist trunk",
            PageRole::FreelistLeaf => "freelist leaf",
            PageRole::BtreeInteriorTable => "btree interior (table)",
            PageRole::BtreeLeafTable => "btree leaf (table)",
            PageRole::BtreeInteriorIndex => "btree interior (index)",
            PageRole::BtreeLeafIndex => "btree leaf (index)",
            PageRole::Overflow => "payload overflow",
            PageRole::PtrMap => "pointer map",
            PageRole::LockByte => "lock byte",
            PageRole::OrphanInteriorTable => "orphan btree interior (table)",
            PageRole::OrphanLeafTable => "orphan btree leaf (table)",
            PageRole::OrphanInteriorIndex => "orphan btree interior (index)",
            PageRole::OrphanLeafIndex => "orphan btree leaf (index)",
            PageRole::OrphanOverflow => "orphan payload overflow",
            PageRole::OrphanEmpty => "orphan empty",
        }
    }
}

impl std::fmt::Display for PageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// One page claimed by two roles.  The existing role stays in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub pgno: PageNum,
    pub existing: PageRole,
    pub claimed: PageRole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageMap {
    roles: Vec<PageRole>,
    parents: Vec<PageNum>,
    conflicts: Vec<Conflict>,
}

impl PageMap {
    pub fn new(max_page: PageNum) -> PageMap {
        PageMap {
            roles: vec![PageRole::Unknown; max_page as usize],
            parents: vec![0; max_page as usize],
            conflicts: Vec::new(),
        }
    }

    pub fn max_page(&self) -> PageNum {
        self.roles.len() as PageNum
    }

    /// Role of `pgno`, `Unknown` for out-of-range page numbers.
    pub fn role(&self, pgno: PageNum) -> PageRole {
        if pgno < 1 || pgno as usize > self.roles.len() {
            return PageRole::Unknown;
        }
        self.roles[pgno as usize - 1]
    }

    /// The page whose pointer led the walk to `pgno`; 0 for roots and
    /// header-reached pages.
    pub fn parent(&self, pgno: PageNum) -> PageNum {
        if pgno < 1 || pgno as usize > self.parents.len() {
            return 0;
        }
        self.parents[pgno as usize - 1]
    }

    /// Claims `pgno` for `role`.  Returns true if the claim stuck; a page
    /// already holding a different role keeps it and the clash is recorded.
    pub fn classify(&mut self, pgno: PageNum, role: PageRole, parent: PageNum) -> bool {
        if pgno < 1 || pgno as usize > self.roles.len() {
            return false;
        }
        let idx = pgno as usize - 1;
        match self.roles[idx] {
            PageRole::Unknown => {
                self.roles[idx] = role;
                self.parents[idx] = parent;
                true
            }
            existing if existing == role => true,
            existing => {
                self.record_conflict(pgno, existing, role);
                false
            }
        }
    }

    pub fn record_conflict(&mut self, pgno: PageNum, existing: PageRole, claimed: PageRole) {
        log::warn!(
            "page {} already classified as {} but is also claimed as {}",
            pgno,
            existing,
            claimed
        );
        self.conflicts.push(Conflict {
            pgno,
            existing,
            claimed,
        });
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn count(&self, role: PageRole) -> u32 {
        self.roles.iter().filter(|r| **r == role).count() as u32
    }

    pub fn pages_with(&self, role: PageRole) -> Vec<PageNum> {
        self.roles
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == role)
            .map(|(i, _)| i as PageNum + 1)
            .collect()
    }

    /// Pages holding any role at all.
    pub fn classified_total(&self) -> u32 {
        self.roles
            .iter()
            .filter(|r| **r != PageRole::Unknown)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_and_lookup() {
        let mut m = PageMap::new(5);
        assert!(m.classify(2, PageRole::FreelistTrunk, 0));
        assert!(m.classify(3, PageRole::FreelistLeaf, 2));
        assert_eq!(m.role(2), PageRole::FreelistTrunk);
        assert_eq!(m.role(3), PageRole::FreelistLeaf);
        assert_eq!(m.parent(3), 2);
        assert_eq!(m.role(4), PageRole::Unknown);
        assert_eq!(m.classified_total(), 2);
    }

    #[test]
    fn test_second_role_is_a_conflict_and_does_not_overwrite() {
        let mut m = PageMap::new(5);
        assert!(m.classify(3, PageRole::FreelistLeaf, 2));
        assert!(!m.classify(3, PageRole::BtreeLeafTable, 1));
        assert_eq!(m.role(3), PageRole::FreelistLeaf);
        assert_eq!(
            m.conflicts(),
            &[Conflict {
                pgno: 3,
                existing: PageRole::FreelistLeaf,
                claimed: PageRole::BtreeLeafTable,
            }]
        );
    }

    #[test]
    fn test_reclassifying_with_same_role_is_quiet() {
        let mut m = PageMap::new(5);
        assert!(m.classify(3, PageRole::Overflow, 2));
        assert!(m.classify(3, PageRole::Overflow, 4));
        assert!(m.conflicts().is_empty());
        // The first parent wins along with the first role.
        assert_eq!(m.parent(3), 2);
    }

    #[test]
    fn test_out_of_range_pages_are_ignored() {
        let mut m = PageMap::new(2);
        assert!(!m.classify(0, PageRole::Overflow, 0));
        assert!(!m.classify(9, PageRole::Overflow, 0));
        assert_eq!(m.role(0), PageRole::Unknown);
        assert_eq!(m.role(9), PageRole::Unknown);
    }
}
