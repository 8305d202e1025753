//! Defines an enum of all the possible values that a stored column can hold.

/// One decoded column value, in one of the storage classes SQLite files use.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
    Real(f64),
    Null(),
}

// Oversize TEXT and BLOB values are rendered truncated, with the full length
// noted, so a dump of a multi-kilobyte row stays readable.
const TEXT_DISPLAY_MAX: usize = 64;
const BLOB_DISPLAY_MAX: usize = 32;

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Int(x) => write!(f, "{}", x),
            SqlValue::Real(x) => write!(f, "{}", x),
            SqlValue::Null() => write!(f, "NULL"),
            SqlValue::Text(x) => {
                if x.len() <= TEXT_DISPLAY_MAX {
                    write!(f, "'{}'", x)
                } else {
                    let cut = floor_char_boundary(x, TEXT_DISPLAY_MAX);
                    write!(f, "'{}'... ({} bytes)", &x[..cut], x.len())
                }
            }
            SqlValue::Blob(x) => {
                if x.len() <= BLOB_DISPLAY_MAX {
                    write!(f, "x'{}'", hex::encode(x))
                } else {
                    write!(
                        f,
                        "x'{}'... ({} bytes)",
                        hex::encode(&x[..BLOB_DISPLAY_MAX]),
                        x.len()
                    )
                }
            }
        }
    }
}

fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}
