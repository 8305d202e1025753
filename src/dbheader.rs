//! dbheader reads the 100-byte header of a database file.
//!
//! Only the fields the page walks consume are decoded; everything else in
//! the header is skipped rather than validated, because the whole point of
//! this crate is to open files the engine itself would refuse.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("The magic bytes for this file are wrong; not a SQLite database.")]
    WrongMagic,
    #[error("The file is shorter than the 100 byte database header.")]
    Truncated,
    #[error("The page size {0} is not a power of two in 512..=65536.")]
    InvalidPagesize(u32),
}

/// The subset of the database file header consumed by the walkers.
#[derive(Debug, Clone, PartialEq)]
pub struct DbHeader {
    pub pagesize: u32,
    /// Bytes of reserved space at the end of every page.
    pub reserved: u8,
    /// The in-header database size in pages.  May be stale; the pager
    /// derives the real page count from the file length.
    pub numpages: u32,
    /// Page number of the first freelist trunk page, 0 if none.
    pub freelist_head: u32,
    /// Total number of freelist pages claimed by the header.
    pub freelist_pages: u32,
    /// Non-zero when the file was built with auto-vacuum enabled.
    pub autovacuum: u32,
}

pub const HEADER_SIZE: usize = 100;

const SQLITE3_MAGIC_STRING: &[u8] = &[
    0x53, 0x51, 0x4c, 0x69, 0x74, 0x65, 0x20, 0x66, 0x6f, 0x72, 0x6d, 0x61, 0x74, 0x20, 0x33, 0x00,
];

pub fn get_header<R: Read + Seek>(f: &mut R) -> Result<DbHeader, Error> {
    // A file that cannot supply all 100 header bytes is not a database at all.
    f.seek(SeekFrom::Start(0)).map_err(|_| Error::Truncated)?;
    let mut whole = [0_u8; HEADER_SIZE];
    f.read_exact(&mut whole).map_err(|_| Error::Truncated)?;
    let mut c = std::io::Cursor::new(&whole[..]);

    // Offset	Size	Description
    // 0        16	    The header string: "SQLite format 3\000"
    let mut magic = [0; 16];
    c.read_exact(&mut magic).map_err(|_| Error::Truncated)?;
    if magic != SQLITE3_MAGIC_STRING {
        return Err(Error::WrongMagic);
    }

    // Offset	Size	Description
    // 16	    2	    The database page size in bytes. A power of two between 512 and
    //                  32768 inclusive, or the value 1 representing a page size of 65536.
    //                  Very old files write 0 here, meaning the original default of 1024.
    let pagesize: u32 = match c.read_u16::<BigEndian>().map_err(|_| Error::Truncated)? {
        1 => 65536,
        0 => 1024,
        x => {
            let x = x as u32;
            if !x.is_power_of_two() || x < 512 {
                return Err(Error::InvalidPagesize(x));
            }
            x
        }
    };

    // Offset	Size	Description
    // 18	    1	    File format write version.
    // 19	    1	    File format read version.
    // 20	    1	    Bytes of unused "reserved" space at the end of each page.
    let reserved = whole[20];

    // Offset	Size	Description
    // 24	    4	    File change counter.
    // 28	    4	    Size of the database file in pages. The "in-header database size".
    // 32	    4	    Page number of the first freelist trunk page.
    // 36	    4	    Total number of freelist pages.
    c.seek(SeekFrom::Start(28)).map_err(|_| Error::Truncated)?;
    let numpages = c.read_u32::<BigEndian>().map_err(|_| Error::Truncated)?;
    let freelist_head = c.read_u32::<BigEndian>().map_err(|_| Error::Truncated)?;
    let freelist_pages = c.read_u32::<BigEndian>().map_err(|_| Error::Truncated)?;

    // Offset	Size	Description
    // 52	    4	    The page number of the largest root b-tree page when in
    //                  auto-vacuum or incremental-vacuum modes, or zero otherwise.
    c.seek(SeekFrom::Start(52)).map_err(|_| Error::Truncated)?;
    let autovacuum = c.read_u32::<BigEndian>().map_err(|_| Error::Truncated)?;

    Ok(DbHeader {
        pagesize,
        reserved,
        numpages,
        freelist_head,
        freelist_pages,
        autovacuum,
    })
}
