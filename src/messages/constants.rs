// Startup packet codes.
pub const PROTOCOL_VERSION_NUMBER: i32 = 196608; // 3.0
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
pub const REQUEST_GSSENCMODE_CODE: i32 = 80877104;

/// Length of a CancelRequest packet, length field included.
pub const CANCEL_REQUEST_LEN: i32 = 16;

/// Upper bound for a startup packet, length field included.
pub const MAX_STARTUP_PACKET_LEN: i32 = 10_000;

// Authentication request codes.
pub const AUTHENTICATION_OK: i32 = 0;
pub const AUTHENTICATION_CLEAR_PASSWORD: i32 = 3;
pub const AUTHENTICATION_MD5_PASSWORD: i32 = 5;

/// Stored passwords starting with this are md5(password + user) hashes.
pub const MD5_PASSWORD_PREFIX: &str = "md5";

// Frontend message codes.
pub const QUERY: u8 = b'Q';
pub const PARSE: u8 = b'P';
pub const BIND: u8 = b'B';
pub const DESCRIBE: u8 = b'D';
pub const EXECUTE: u8 = b'E';
pub const CLOSE: u8 = b'C';
pub const SYNC: u8 = b'S';
pub const FLUSH: u8 = b'H';
pub const TERMINATE: u8 = b'X';
pub const PASSWORD_MESSAGE: u8 = b'p';

/// SQLSTATE codes sent in ErrorResponse.
pub mod sqlstate {
    pub const QUERY_CANCELED: &str = "57014";
    pub const ADMIN_SHUTDOWN: &str = "57P01";
    pub const INTERNAL_ERROR: &str = "XX000";
    pub const PROTOCOL_VIOLATION: &str = "08P01";
    pub const INVALID_PASSWORD: &str = "28P01";
    pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";
    pub const TOO_MANY_CONNECTIONS: &str = "53300";
    pub const DUPLICATE_PREPARED_STATEMENT: &str = "42P05";
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";
    pub const INVALID_CURSOR_NAME: &str = "34000";
    pub const DUPLICATE_CURSOR: &str = "42P03";
}
