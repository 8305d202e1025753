//! schema recovers `(name, root page)` pairs from the file itself.
//!
//! Page 1 is always the root of the `sqlite_schema` table btree, whose rows
//! are `(type, name, tbl_name, rootpage, sql)`.  The accounting queries only
//! need the names and root pages, and those are recoverable with the
//! crate's own cell and record decoders; no SQL layer is involved.  Callers
//! are free to supply root lists from anywhere else instead.

use std::collections::HashSet;

use crate::btree::{btree_start_offset, cell, header, PageType};
use crate::pager::{PageNum, Pager};
use crate::record;
use crate::sql_value::SqlValue;

const SCHEMA_ROOT_PAGENUM: PageNum = 1;
const SCHEMA_TYPE_COLIDX: usize = 0;
const SCHEMA_NAME_COLIDX: usize = 1;
const SCHEMA_ROOTPAGE_COLIDX: usize = 3;

/// One named btree root.
#[derive(Debug, Clone, PartialEq)]
pub struct RootEntry {
    pub name: String,
    pub root: PageNum,
}

/// Scans the schema table and returns every table and index root recorded
/// there.  Damaged or spilled schema rows are skipped with a warning; the
/// queries degrade to whatever roots were recoverable.
pub fn list_roots(pager: &mut Pager) -> Result<Vec<RootEntry>, crate::pager::Error> {
    let mut roots = Vec::new();
    let mut visited: HashSet<PageNum> = HashSet::new();
    let mut stack = vec![SCHEMA_ROOT_PAGENUM];
    let usable = pager.usable_size();

    while let Some(pgno) = stack.pop() {
        if pgno < 1 || pgno > pager.max_page() {
            log::warn!("schema btree pointer to page {} is outside the file", pgno);
            continue;
        }
        if !visited.insert(pgno) {
            log::warn!("schema btree re-enters page {}; cycle", pgno);
            continue;
        }
        let page = match pager.read_page(pgno) {
            Ok(p) => p,
            // Page 1 unreadable means no schema at all; elsewhere, skip.
            Err(e) if pgno == SCHEMA_ROOT_PAGENUM => return Err(e),
            Err(e) => {
                log::warn!("cannot read schema page {}: {}", pgno, e);
                continue;
            }
        };
        let offset = btree_start_offset(pgno);
        let hdr = match header::parse(&page, offset) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("schema page {} is not a btree page: {}", pgno, e);
                continue;
            }
        };
        let cps = header::cell_pointers(&page, offset, &hdr);
        match hdr.page_type {
            PageType::TableLeaf => {
                for cp in cps.offsets {
                    match cell::parse_table_leaf(&page, cp, usable) {
                        Ok(c) => {
                            if let Some(entry) = root_from_record(&page[c.local.clone()], c.payload_size) {
                                roots.push(entry);
                            }
                        }
                        Err(e) => log::warn!("schema page {}: bad cell at {:#x}: {}", pgno, cp, e),
                    }
                }
            }
            PageType::TableInterior => {
                for cp in cps.offsets {
                    match cell::parse_table_interior(&page, cp) {
                        Ok(c) => stack.push(c.left_child),
                        Err(e) => log::warn!("schema page {}: bad cell at {:#x}: {}", pgno, cp, e),
                    }
                }
                if let Some(rightmost) = hdr.rightmost_pointer {
                    stack.push(rightmost);
                }
            }
            _ => log::warn!(
                "schema page {} has index btree type; the schema is a table btree",
                pgno
            ),
        }
    }
    Ok(roots)
}

/// Pulls `(name, rootpage)` out of one schema record, keeping only rows of
/// type `table` or `index` with a positive root page.
fn root_from_record(payload: &[u8], full_size: u64) -> Option<RootEntry> {
    let rec = match record::parse_record(payload, full_size) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("undecodable schema record: {}", e);
            return None;
        }
    };
    let text_col = |idx: usize| -> Option<String> {
        match rec.columns.get(idx)?.value.clone()? {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    };
    let typ = text_col(SCHEMA_TYPE_COLIDX)?;
    if typ != "table" && typ != "index" {
        return None;
    }
    let name = text_col(SCHEMA_NAME_COLIDX)?;
    match rec.columns.get(SCHEMA_ROOTPAGE_COLIDX)?.value.clone()? {
        SqlValue::Int(root) if root >= 1 => Some(RootEntry {
            name,
            root: root as PageNum,
        }),
        // Views and triggers store rootpage 0; nothing to walk.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Builds a schema record: (type, name, tbl_name, rootpage, sql NULL).
    fn schema_record(typ: &str, name: &str, rootpage: i64) -> Vec<u8> {
        let tserial = (13 + 2 * typ.len()) as u8;
        let nserial = (13 + 2 * name.len()) as u8;
        // header: size, type text, name text, tbl_name text, rootpage int1, sql null
        let mut v = vec![6, tserial, nserial, nserial, 1, 0];
        v.extend_from_slice(typ.as_bytes());
        v.extend_from_slice(name.as_bytes());
        v.extend_from_slice(name.as_bytes());
        v.push(rootpage as u8);
        v
    }

    #[test]
    fn test_root_from_record() {
        let rec = schema_record("table", "t1", 4);
        let entry = root_from_record(&rec, rec.len() as u64).unwrap();
        assert_eq!(
            entry,
            RootEntry {
                name: "t1".to_string(),
                root: 4
            }
        );
    }

    #[test]
    fn test_views_and_triggers_are_skipped() {
        let rec = schema_record("view", "v1", 0);
        assert_eq!(root_from_record(&rec, rec.len() as u64), None);
        let rec = schema_record("table", "shell", 0); // rootpage 0
        assert_eq!(root_from_record(&rec, rec.len() as u64), None);
    }
}
