// Manages read-only access to the pages of a sqlite3 file as defined at
// https://www.sqlite.org/fileformat.html
//
// Every page in the main database has a single use which is one of the following:
//   - The lock-byte page
//   - A freelist trunk page
//   - A freelist leaf page
//   - A b-tree page
//     - A table b-tree interior page
//     - A table b-tree leaf page
//     - An index b-tree interior page
//     - An index b-tree leaf page
//   - A payload overflow page
//   - A pointer map page
//
// The pager hands out a freshly allocated buffer for every read.  Recursive
// walkers keep one buffer per frame, so a parent's page stays intact while a
// child page is being read.  No caching: a forensic pass touches each page a
// small number of times and the file under inspection may be large.

use std::io::{Read, Seek, SeekFrom};

use crate::dbheader::{self, DbHeader};

// Page numbers are 1-based, to match how Sqlite numbers pages.
pub type PageNum = u32;

/// File offset of the lock-byte range; the page containing it is never used
/// for data.
pub const LOCK_BYTE_OFFSET: u64 = 1 << 30;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error accessing database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error in database header: {0}")]
    Header(#[from] dbheader::Error),
    #[error("Page {pgno} is out of range; the file holds pages 1..={max_page}.")]
    PageOutOfRange { pgno: PageNum, max_page: PageNum },
    #[error("Short read on page {0}.")]
    ShortRead(PageNum),
}

/// A pager manages read-only access to one open database file.
pub struct Pager {
    f: std::fs::File,
    header: DbHeader,
    max_page: PageNum,
}

impl Pager {
    /// Opens `path` read-only and parses the database header.  Fails if the
    /// file is not a SQLite database or its header page size is absurd.
    pub fn open(path: &str) -> Result<Pager, Error> {
        let mut f = std::fs::OpenOptions::new().read(true).open(path)?;
        let header = dbheader::get_header(&mut f)?;
        let len = f.metadata()?.len();
        let pagesize = header.pagesize as u64;
        // Round up: a trailing partial page is still addressed, and reading
        // it reports the truncation rather than hiding it.
        let max_page = ((len + pagesize - 1) / pagesize) as PageNum;
        Ok(Pager {
            f,
            header,
            max_page,
        })
    }

    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    pub fn pagesize(&self) -> u32 {
        self.header.pagesize
    }

    /// Usable bytes per page: the page size minus the reserved region.
    pub fn usable_size(&self) -> u32 {
        self.header.pagesize - self.header.reserved as u32
    }

    /// Highest valid page number, derived from the file length.  The
    /// in-header page count is deliberately not trusted here.
    pub fn max_page(&self) -> PageNum {
        self.max_page
    }

    /// Page number of the lock-byte page, if the file is large enough to
    /// contain one.
    pub fn lock_byte_page(&self) -> Option<PageNum> {
        let pgno = (LOCK_BYTE_OFFSET / self.header.pagesize as u64) as PageNum + 1;
        (pgno <= self.max_page).then_some(pgno)
    }

    /// Reads page `pgno` into a freshly allocated buffer of exactly one page.
    /// Page 1 consumers must remember that its b-tree header starts at byte
    /// 100, after the database header.
    pub fn read_page(&mut self, pgno: PageNum) -> Result<Vec<u8>, Error> {
        if pgno < 1 || pgno > self.max_page {
            return Err(Error::PageOutOfRange {
                pgno,
                max_page: self.max_page,
            });
        }
        let mut v = vec![0_u8; self.header.pagesize as usize];
        self.f
            .seek(SeekFrom::Start((pgno - 1) as u64 * self.header.pagesize as u64))?;
        match self.f.read_exact(&mut v[..]) {
            Ok(()) => Ok(v),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ShortRead(pgno)),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
