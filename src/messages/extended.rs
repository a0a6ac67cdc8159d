//! Frontend messages of the extended query protocol.

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::Error;
use crate::messages::types::{BytesMutReader, FormatCode, Oid};

/// Parse ('P').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    pub name: String,
    pub query: String,
    pub param_types: Vec<Oid>,
}

impl TryFrom<BytesMut> for Parse {
    type Error = Error;

    fn try_from(mut body: BytesMut) -> Result<Parse, Error> {
        let name = body.read_string()?;
        let query = body.read_string()?;
        let count = body.read_i16_checked()?;
        let mut param_types = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            param_types.push(body.read_i32_checked()? as Oid);
        }
        Ok(Parse {
            name,
            query,
            param_types,
        })
    }
}

/// Bind ('B').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<FormatCode>,
    pub params: Vec<Option<Bytes>>,
    pub result_formats: Vec<FormatCode>,
}

impl TryFrom<BytesMut> for Bind {
    type Error = Error;

    fn try_from(mut body: BytesMut) -> Result<Bind, Error> {
        let portal = body.read_string()?;
        let statement = body.read_string()?;

        let format_count = body.read_i16_checked()?;
        let mut param_formats = Vec::with_capacity(format_count.max(0) as usize);
        for _ in 0..format_count {
            param_formats.push(FormatCode::try_from(body.read_i16_checked()?)?);
        }

        let param_count = body.read_i16_checked()?;
        let mut params = Vec::with_capacity(param_count.max(0) as usize);
        for _ in 0..param_count {
            let len = body.read_i32_checked()?;
            if len < 0 {
                params.push(None);
                continue;
            }
            if body.remaining() < len as usize {
                return Err(Error::ProtocolSyncError(
                    "bind parameter exceeds message length".into(),
                ));
            }
            params.push(Some(body.split_to(len as usize).freeze()));
        }

        let result_count = body.read_i16_checked()?;
        let mut result_formats = Vec::with_capacity(result_count.max(0) as usize);
        for _ in 0..result_count {
            result_formats.push(FormatCode::try_from(body.read_i16_checked()?)?);
        }

        Ok(Bind {
            portal,
            statement,
            param_formats,
            params,
            result_formats,
        })
    }
}

/// Whether Describe/Close refers to a statement or a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl TryFrom<u8> for Target {
    type Error = Error;

    fn try_from(code: u8) -> Result<Target, Error> {
        match code {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            _ => Err(Error::ProtocolSyncError(format!(
                "invalid describe/close target '{}'",
                code as char
            ))),
        }
    }
}

fn read_target(body: &mut BytesMut) -> Result<(Target, String), Error> {
    if !body.has_remaining() {
        return Err(Error::ProtocolSyncError("message is truncated".into()));
    }
    let target = Target::try_from(body.get_u8())?;
    let name = body.read_string()?;
    Ok((target, name))
}

/// Describe ('D').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Describe {
    pub target: Target,
    pub name: String,
}

impl TryFrom<BytesMut> for Describe {
    type Error = Error;

    fn try_from(mut body: BytesMut) -> Result<Describe, Error> {
        let (target, name) = read_target(&mut body)?;
        Ok(Describe { target, name })
    }
}

/// Close ('C').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub target: Target,
    pub name: String,
}

impl TryFrom<BytesMut> for Close {
    type Error = Error;

    fn try_from(mut body: BytesMut) -> Result<Close, Error> {
        let (target, name) = read_target(&mut body)?;
        Ok(Close { target, name })
    }
}

/// Execute ('E').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub portal: String,
    pub max_rows: i32,
}

impl TryFrom<BytesMut> for Execute {
    type Error = Error;

    fn try_from(mut body: BytesMut) -> Result<Execute, Error> {
        let portal = body.read_string()?;
        let max_rows = body.read_i32_checked()?;
        Ok(Execute { portal, max_rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_parse_message() {
        let mut body = BytesMut::new();
        body.put_slice(b"s1\0SELECT $1\0");
        body.put_i16(1);
        body.put_i32(23);

        let parse = Parse::try_from(body).unwrap();
        assert_eq!(parse.name, "s1");
        assert_eq!(parse.query, "SELECT $1");
        assert_eq!(parse.param_types, vec![23]);
    }

    #[test]
    fn test_bind_message_with_null() {
        let mut body = BytesMut::new();
        body.put_slice(b"\0s1\0");
        body.put_i16(1);
        body.put_i16(1);
        body.put_i16(2);
        body.put_i32(4);
        body.put_i32(7);
        body.put_i32(-1);
        body.put_i16(1);
        body.put_i16(1);

        let bind = Bind::try_from(body).unwrap();
        assert_eq!(bind.portal, "");
        assert_eq!(bind.statement, "s1");
        assert_eq!(bind.param_formats, vec![FormatCode::Binary]);
        assert_eq!(bind.params[0].as_deref(), Some(&[0, 0, 0, 7][..]));
        assert_eq!(bind.params[1], None);
        assert_eq!(bind.result_formats, vec![FormatCode::Binary]);
    }

    #[test]
    fn test_bind_truncated_parameter() {
        let mut body = BytesMut::new();
        body.put_slice(b"\0\0");
        body.put_i16(0);
        body.put_i16(1);
        body.put_i32(100);
        body.put_slice(b"short");
        assert!(Bind::try_from(body).is_err());
    }

    #[test]
    fn test_describe_and_close() {
        let describe = Describe::try_from(BytesMut::from(&b"Sname\0"[..])).unwrap();
        assert_eq!(describe.target, Target::Statement);
        assert_eq!(describe.name, "name");

        let close = Close::try_from(BytesMut::from(&b"P\0"[..])).unwrap();
        assert_eq!(close.target, Target::Portal);
        assert_eq!(close.name, "");

        assert!(Describe::try_from(BytesMut::from(&b"X\0"[..])).is_err());
    }

    #[test]
    fn test_execute_message() {
        let mut body = BytesMut::new();
        body.put_slice(b"\0");
        body.put_i32(0);
        let execute = Execute::try_from(body).unwrap();
        assert_eq!(execute.portal, "");
        assert_eq!(execute.max_rows, 0);
    }
}
