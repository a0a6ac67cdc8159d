use bytes::{BufMut, BytesMut};

/// Severity of an ErrorResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Fields of an ErrorResponse message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgErrorMsg {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl PgErrorMsg {
    pub fn new(severity: Severity, code: &str, message: &str) -> PgErrorMsg {
        PgErrorMsg {
            severity,
            code: code.to_string(),
            message: message.to_string(),
            detail: None,
            hint: None,
        }
    }

    /// Encode as a complete 'E' message.
    pub fn to_bytes(&self) -> BytesMut {
        let mut error = BytesMut::new();

        // Error level, localized and not.
        error.put_u8(b'S');
        put_cstr(&mut error, self.severity.as_str());
        error.put_u8(b'V');
        put_cstr(&mut error, self.severity.as_str());

        error.put_u8(b'C');
        put_cstr(&mut error, &self.code);

        error.put_u8(b'M');
        put_cstr(&mut error, &self.message);

        if let Some(detail) = &self.detail {
            error.put_u8(b'D');
            put_cstr(&mut error, detail);
        }
        if let Some(hint) = &self.hint {
            error.put_u8(b'H');
            put_cstr(&mut error, hint);
        }

        // No more fields follow.
        error.put_u8(0);

        let mut res = BytesMut::with_capacity(error.len() + 5);
        res.put_u8(b'E');
        res.put_i32(error.len() as i32 + 4);
        res.put(error);
        res
    }
}

fn put_cstr(buf: &mut BytesMut, value: &str) {
    // Embedded nuls would truncate the field on the client side.
    buf.put_slice(value.replace('\0', "").as_bytes());
    buf.put_u8(0);
}
