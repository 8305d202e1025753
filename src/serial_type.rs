//! Serial Types are how SQLite stores values in storage.
//!
//! A record header is a run of serial type codes; each code determines the
//! byte length and interpretation of one column in the record body.

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use std::io::Read;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error reading value bytes: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial type code {0} is not valid in a record.")]
    InvalidSerialTypeCode(i64),
    #[error("Value of serial type {serial_type} needs {need} bytes but only {have} are available.")]
    ValueOutOfBounds {
        serial_type: i64,
        need: usize,
        have: usize,
    },
}

/// Number of record-body bytes occupied by a value of the given serial type.
pub fn content_size(serial_type: i64) -> Result<usize, Error> {
    match serial_type {
        // Serial Type	Content Size	Meaning
        // 0	        0	            Value is a NULL.
        0 => Ok(0),
        // 1	        1	            Value is an 8-bit twos-complement integer.
        1 => Ok(1),
        // 2	        2	            Value is a big-endian 16-bit twos-complement integer.
        2 => Ok(2),
        // 3	        3	            Value is a big-endian 24-bit twos-complement integer.
        3 => Ok(3),
        // 4	        4	            Value is a big-endian 32-bit twos-complement integer.
        4 => Ok(4),
        // 5	        6	            Value is a big-endian 48-bit twos-complement integer.
        5 => Ok(6),
        // 6	        8	            Value is a big-endian 64-bit twos-complement integer.
        // 7	        8	            Value is a big-endian IEEE 754-2008 64-bit floating point number.
        6 | 7 => Ok(8),
        // 8	        0	            Value is the integer 0.
        // 9	        0	            Value is the integer 1.
        8 | 9 => Ok(0),
        // 10,11	    variable	    Reserved for internal use; never valid in a well-formed file.
        // N≥12 & even	(N-12)/2	    Value is a BLOB that is (N-12)/2 bytes in length.
        // N≥13 & odd	(N-13)/2	    Value is a string of (N-13)/2 bytes.
        x if x >= 12 => Ok(((x - 12 - (x % 2)) / 2) as usize),
        x => Err(Error::InvalidSerialTypeCode(x)),
    }
}

/// Short name for a serial type, suitable for dump output.
pub fn describe(serial_type: i64) -> String {
    match serial_type {
        0 => "null".to_string(),
        1 => "int1B".to_string(),
        2 => "int2B".to_string(),
        3 => "int3B".to_string(),
        4 => "int4B".to_string(),
        5 => "int6B".to_string(),
        6 => "int8B".to_string(),
        7 => "float8B".to_string(),
        8 => "zero".to_string(),
        9 => "one".to_string(),
        10 | 11 => format!("internal_{}", serial_type),
        x if x >= 12 && x % 2 == 0 => format!("blob({})", (x - 12) / 2),
        x if x >= 13 => format!("text({})", (x - 13) / 2),
        x => format!("invalid({})", x),
    }
}

/// Deserialize bytes of one serial type into a `SqlValue`.
///
/// `data` must hold at least `content_size(serial_type)` bytes.  Text that is
/// not valid UTF-8 is rendered lossily rather than refused: a forensic dump
/// has to show what is there.
pub fn to_value(serial_type: i64, data: &[u8]) -> Result<crate::sql_value::SqlValue, Error> {
    use crate::sql_value::SqlValue::*;

    let need = content_size(serial_type)?;
    if data.len() < need {
        return Err(Error::ValueOutOfBounds {
            serial_type,
            need,
            have: data.len(),
        });
    }

    let mut c = std::io::Cursor::new(data);
    match serial_type {
        0 => Ok(Null()),
        1 => Ok(Int(c.read_i8()? as i64)),
        2 => Ok(Int(c.read_i16::<BigEndian>()? as i64)),
        3 => {
            // 24-bit: sign-extend the top byte.
            let mut bytes = [0_u8; 4];
            c.read_exact(&mut bytes[1..])?;
            bytes[0] = if bytes[1] & 0x80 != 0 { 0xff } else { 0 };
            Ok(Int(i32::from_be_bytes(bytes) as i64))
        }
        4 => Ok(Int(c.read_i32::<BigEndian>()? as i64)),
        5 => {
            // 48-bit: sign-extend the top two bytes.
            let mut bytes = [0_u8; 8];
            c.read_exact(&mut bytes[2..])?;
            let fill = if bytes[2] & 0x80 != 0 { 0xff } else { 0 };
            bytes[0] = fill;
            bytes[1] = fill;
            Ok(Int(i64::from_be_bytes(bytes)))
        }
        6 => Ok(Int(c.read_i64::<BigEndian>()?)),
        7 => Ok(Real(c.read_f64::<BigEndian>()?)),
        8 => Ok(Int(0_i64)),
        9 => Ok(Int(1_i64)),
        x if x >= 12 && x % 2 == 0 => Ok(Blob(data[..need].to_vec())),
        x if x >= 13 => Ok(Text(String::from_utf8_lossy(&data[..need]).into_owned())),
        x => Err(Error::InvalidSerialTypeCode(x)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_value::SqlValue::{self, *};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_value() {
        let cases: Vec<(i64, &[u8], SqlValue)> = vec![
            (0, b"", Null()),
            // one byte ints of various values.
            (1, &[0x7f], Int(127)),
            (1, &[0xff], Int(-1)),
            (1, &[0x01], Int(1)),
            // two byte ints
            (2, &[0x00, 0x7f], Int(127)),
            (2, &[0xff, 0xff], Int(-1)),
            (2, &[0x01, 0x00], Int(256)),
            // three byte ints
            (3, &[0xff, 0xff, 0xff], Int(-1)),
            (3, &[0x01, 0x00, 0x00], Int(65536)),
            // four and eight byte ints
            (4, &[0x7f, 0xff, 0xff, 0xff], Int(i32::MAX as i64)),
            (6, &[0xff; 8], Int(-1)),
            // six byte ints, including sign extension.
            (5, &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00], Int(256)),
            (5, &[0xff; 6], Int(-1)),
            // float
            (7, &[0x40, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], Real(3.25)),
            // Literal 0 and 1
            (8, b"", Int(0)),
            (9, b"", Int(1)),
            // Text of various lengths
            (13, b"", Text("".to_string())),
            (19, b"Foo", Text("Foo".to_string())),
            (25, b"FooBar", Text("FooBar".to_string())),
            // Blob
            (18, &[0x00, 0x01, 0xff], Blob(vec![0, 1, 255])),
        ];
        for (i, case) in cases.iter().enumerate() {
            println!("Testing case {}: serial type {}", i, case.0);
            assert_eq!(to_value(case.0, case.1).unwrap(), case.2);
        }
    }

    #[test]
    fn test_to_value_errors() {
        // Reserved and negative codes.
        assert!(to_value(10, b"").is_err());
        assert!(to_value(11, b"").is_err());
        assert!(to_value(-1, b"").is_err());
        // Not enough bytes for the declared type.
        assert!(to_value(4, &[0x00, 0x01]).is_err());
        assert!(to_value(19, b"Fo").is_err());
    }

    #[test]
    fn test_invalid_utf8_text_is_rendered_lossily() {
        let v = to_value(17, &[0xff, 0xfe]).unwrap();
        match v {
            Text(s) => assert_eq!(s.chars().count(), 2),
            other => panic!("expected Text, got {:?}", other),
        }
    }

    #[test]
    fn test_content_size() {
        assert_eq!(content_size(0).unwrap(), 0);
        assert_eq!(content_size(5).unwrap(), 6);
        assert_eq!(content_size(7).unwrap(), 8);
        assert_eq!(content_size(12).unwrap(), 0);
        assert_eq!(content_size(13).unwrap(), 0);
        assert_eq!(content_size(20).unwrap(), 4);
        assert_eq!(content_size(21).unwrap(), 4);
        assert!(content_size(10).is_err());
    }
}
