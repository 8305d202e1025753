//! pagecheck inspects SQLite database files at the raw page level.
//!
//! The normal engine refuses or silently misreads corrupt files; these
//! walkers assume every varint, offset, and pointer they read may be
//! hostile.  The core is a page-graph walker and accounting engine: parse
//! the header, decode btree and freelist structures, follow every reachable
//! pointer, put every page in exactly one role, and cross-check the result
//! against the header's own counts.
//!
//! System layers, leaves first:
//! - "varint" / "dbheader" - byte-level decoders for the file's primitives.
//! - "pager" - read-only page access with range checking.
//! - "serial_type" / "sql_value" / "record" - record decoding for dumps.
//! - "btree" - page headers, the four cell shapes, and the classifying walk.
//! - "freelist" / "ptrmap" - the non-btree page chains.
//! - "pagemap" - the one-role-per-page classification store.
//! - "accountant" / "queries" - whole-file accounting and the query facade.
//! - "schema" - recovers (name, root page) pairs from page 1.

pub mod accountant;
pub mod btree;
pub mod dbheader;
pub mod freelist;
pub mod pagemap;
pub mod pager;
pub mod ptrmap;
pub mod queries;
pub mod record;
pub mod schema;
pub mod serial_type;
pub mod sql_value;
pub mod varint;

pub use pagemap::{Conflict, PageMap, PageRole};
pub use pager::{PageNum, Pager};
pub use schema::RootEntry;
