use std::fmt::Write as _;

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::Error;

/// PostgreSQL type OID. Passed through verbatim, never interpreted beyond
/// value encoding.
pub type Oid = u32;

/// Well-known type OIDs.
pub mod oid {
    use super::Oid;

    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const VARCHAR: Oid = 1043;
}

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatCode {
    #[default]
    Text,
    Binary,
}

impl FormatCode {
    pub fn as_i16(self) -> i16 {
        match self {
            FormatCode::Text => 0,
            FormatCode::Binary => 1,
        }
    }

    /// Resolve the format of column `index` from a Bind format list: empty
    /// means all text, a single entry applies to every column.
    pub fn for_column(formats: &[FormatCode], index: usize) -> FormatCode {
        match formats.len() {
            0 => FormatCode::Text,
            1 => formats[0],
            _ => formats.get(index).copied().unwrap_or_default(),
        }
    }
}

impl TryFrom<i16> for FormatCode {
    type Error = Error;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            _ => Err(Error::ProtocolSyncError(format!(
                "invalid format code {code}"
            ))),
        }
    }
}

/// A result cell produced by a statement handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode the value in the given format. `None` stands for SQL NULL.
    pub fn encode(&self, format: FormatCode) -> Option<Vec<u8>> {
        match format {
            FormatCode::Text => self.encode_text().map(String::into_bytes),
            FormatCode::Binary => self.encode_binary(),
        }
    }

    fn encode_text(&self) -> Option<String> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(v) => (if *v { "t" } else { "f" }).to_string(),
            Value::Int2(v) => v.to_string(),
            Value::Int4(v) => v.to_string(),
            Value::Int8(v) => v.to_string(),
            Value::Float4(v) => float_text(f64::from(*v), v.to_string()),
            Value::Float8(v) => float_text(*v, v.to_string()),
            Value::Text(v) => v.clone(),
            Value::Bytea(v) => {
                let mut hex = String::with_capacity(2 + v.len() * 2);
                hex.push_str("\\x");
                for byte in v {
                    let _ = write!(hex, "{byte:02x}");
                }
                hex
            }
        };
        Some(text)
    }

    fn encode_binary(&self) -> Option<Vec<u8>> {
        let bytes = match self {
            Value::Null => return None,
            Value::Bool(v) => vec![u8::from(*v)],
            Value::Int2(v) => v.to_be_bytes().to_vec(),
            Value::Int4(v) => v.to_be_bytes().to_vec(),
            Value::Int8(v) => v.to_be_bytes().to_vec(),
            Value::Float4(v) => v.to_be_bytes().to_vec(),
            Value::Float8(v) => v.to_be_bytes().to_vec(),
            Value::Text(v) => v.as_bytes().to_vec(),
            Value::Bytea(v) => v.clone(),
        };
        Some(bytes)
    }
}

fn float_text(value: f64, display: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        (if value > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else {
        display
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Bounds-checked reads from a message body.
pub trait BytesMutReader {
    fn read_string(&mut self) -> Result<String, Error>;
    fn read_i16_checked(&mut self) -> Result<i16, Error>;
    fn read_i32_checked(&mut self) -> Result<i32, Error>;
}

impl BytesMutReader for BytesMut {
    /// Read a nul-terminated string.
    fn read_string(&mut self) -> Result<String, Error> {
        let end = match self.iter().position(|b| *b == 0) {
            Some(end) => end,
            None => {
                return Err(Error::ProtocolSyncError(
                    "string is not nul-terminated".into(),
                ))
            }
        };
        let raw = self.split_to(end);
        self.advance(1);
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::ProtocolSyncError("string is not valid UTF-8".into()))
    }

    fn read_i16_checked(&mut self) -> Result<i16, Error> {
        if self.remaining() < 2 {
            return Err(Error::ProtocolSyncError("message is truncated".into()));
        }
        Ok(self.get_i16())
    }

    fn read_i32_checked(&mut self) -> Result<i32, Error> {
        if self.remaining() < 4 {
            return Err(Error::ProtocolSyncError("message is truncated".into()));
        }
        Ok(self.get_i32())
    }
}

/// Append a length-prefixed cell to a DataRow body.
pub fn put_cell(buf: &mut BytesMut, cell: Option<&[u8]>) {
    match cell {
        Some(bytes) => {
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
        None => buf.put_i32(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_encoding() {
        assert_eq!(Value::Int4(42).encode(FormatCode::Text), Some(b"42".to_vec()));
        assert_eq!(Value::Bool(true).encode(FormatCode::Text), Some(b"t".to_vec()));
        assert_eq!(
            Value::Bytea(vec![0xde, 0xad]).encode(FormatCode::Text),
            Some(b"\\xdead".to_vec())
        );
        assert_eq!(
            Value::Float8(f64::INFINITY).encode(FormatCode::Text),
            Some(b"Infinity".to_vec())
        );
        assert_eq!(Value::Null.encode(FormatCode::Text), None);
    }

    #[test]
    fn test_binary_encoding() {
        assert_eq!(
            Value::Int4(1).encode(FormatCode::Binary),
            Some(vec![0, 0, 0, 1])
        );
        assert_eq!(
            Value::Int8(-1).encode(FormatCode::Binary),
            Some(vec![0xff; 8])
        );
        assert_eq!(Value::Bool(false).encode(FormatCode::Binary), Some(vec![0]));
    }

    #[test]
    fn test_format_for_column() {
        let binary = [FormatCode::Binary];
        assert_eq!(FormatCode::for_column(&[], 3), FormatCode::Text);
        assert_eq!(FormatCode::for_column(&binary, 3), FormatCode::Binary);
        let mixed = [FormatCode::Text, FormatCode::Binary];
        assert_eq!(FormatCode::for_column(&mixed, 1), FormatCode::Binary);
        assert!(FormatCode::try_from(2).is_err());
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_read_string() {
        let mut bytes = BytesMut::from(&b"user\0rest"[..]);
        assert_eq!(bytes.read_string().unwrap(), "user");
        assert_eq!(&bytes[..], b"rest");
        assert!(bytes.read_string().is_err());
    }

    #[test]
    fn test_checked_ints_on_short_input() {
        let mut bytes = BytesMut::from(&[0u8][..]);
        assert!(bytes.read_i16_checked().is_err());
        assert!(bytes.read_i32_checked().is_err());
    }
}
