// Standard library imports
use std::collections::HashMap;
// External crate imports
use bytes::{Buf, BufMut, BytesMut};
use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
// Internal crate imports
use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::error::{PgErrorMsg, Severity};
use crate::messages::socket::{write_all, write_all_flush};
use crate::messages::types::{put_cell, BytesMutReader, FormatCode, Oid, Value};
use crate::query::Column;
use crate::session::BackendKey;

/// Generate md5 password challenge.
pub async fn md5_challenge<S>(stream: &mut S) -> Result<[u8; 4], Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    let salt: [u8; 4] = rand::random();

    let mut res = BytesMut::new();
    res.put_u8(b'R');
    res.put_i32(12);
    res.put_i32(AUTHENTICATION_MD5_PASSWORD);
    res.put_slice(&salt[..]);

    write_all_flush(stream, &res).await?;
    Ok(salt)
}

/// Generate plain password challenge.
pub async fn plain_password_challenge<S>(stream: &mut S) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    let mut res = BytesMut::new();
    res.put_u8(b'R');
    res.put_i32(8);
    res.put_i32(AUTHENTICATION_CLEAR_PASSWORD);

    write_all_flush(stream, &res).await
}

/// Read password from client.
pub async fn read_password<S>(stream: &mut S) -> Result<Vec<u8>, Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let mut code = [0u8; 1];
    match stream.read_exact(&mut code).await {
        Ok(_) => {}
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to read password message type identifier: {err}"
            )))
        }
    }

    if code[0] != PASSWORD_MESSAGE {
        return Err(Error::ProtocolSyncError(format!(
            "Expected password message (p), received '{}' instead",
            code[0] as char
        )));
    }

    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to read password message length: {err}"
            )))
        }
    }

    let len = i32::from_be_bytes(len_buf);
    if !(5..=1024).contains(&len) {
        return Err(Error::ProtocolSyncError(format!(
            "Invalid password message length {len}"
        )));
    }
    let mut password = vec![0u8; (len - 4) as usize];
    match stream.read_exact(&mut password).await {
        Ok(_) => {}
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to read password message content: {err}"
            )))
        }
    }

    // Drop the trailing nul.
    if password.last() == Some(&0) {
        password.pop();
    }
    Ok(password)
}

/// Parse the nul-separated name/value pairs of a StartupMessage body. The
/// list ends with an empty name. Empty values are kept.
pub fn parse_params(mut bytes: BytesMut) -> Result<HashMap<String, String>, Error> {
    let mut result = HashMap::new();

    while bytes.has_remaining() {
        let name = bytes.read_string()?;
        if name.is_empty() {
            break;
        }
        let value = bytes.read_string().map_err(|_| {
            Error::ProtocolSyncError(format!(
                "Invalid client startup message: parameter \"{name}\" has no value"
            ))
        })?;
        result.insert(name, value);
    }

    if result.is_empty() {
        return Err(Error::ProtocolSyncError(
            "Invalid client startup message: no parameters".into(),
        ));
    }
    Ok(result)
}

/// Parse StartupMessage parameters.
/// e.g. user, database, application_name, etc.
pub fn parse_startup(bytes: BytesMut) -> Result<HashMap<String, String>, Error> {
    let result = parse_params(bytes)?;

    // The protocol requires the user at the very minimum.
    if !result.contains_key("user") {
        return Err(Error::ClientBadStartup);
    }

    Ok(result)
}

/// Create md5 password hash given a salt.
pub fn md5_hash_password(user: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let mut md5 = Md5::new();

    // First pass
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());

    let output = md5.finalize_reset();

    // Second pass
    md5_hash_second_pass(&(format!("{output:x}")), salt)
}

pub fn md5_hash_second_pass(hash: &str, salt: &[u8]) -> Vec<u8> {
    let mut md5 = Md5::new();
    md5.update(hash);
    md5.update(salt);

    format!("md5{:x}", md5.finalize()).into_bytes()
}

/// FATAL error message, the connection is closed after sending it.
pub fn error_message(message: &str, code: &str) -> BytesMut {
    PgErrorMsg::new(Severity::Fatal, code, message).to_bytes()
}

pub async fn error_response_terminal<S>(
    stream: &mut S,
    message: &str,
    code: &str,
) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    let res = error_message(message, code);
    write_all_flush(stream, &res).await
}

pub async fn wrong_password<S>(stream: &mut S, user: &str) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    let res = error_message(
        &format!("password authentication failed for user \"{user}\""),
        sqlstate::INVALID_PASSWORD,
    );
    write_all(stream, res).await
}

/// AuthenticationOk.
pub fn auth_ok() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(9);
    bytes.put_u8(b'R');
    bytes.put_i32(8);
    bytes.put_i32(AUTHENTICATION_OK);
    bytes
}

/// BackendKeyData carrying the session's cancellation key.
pub fn backend_key_data(key: &BackendKey) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(13);
    bytes.put_u8(b'K');
    bytes.put_i32(12);
    bytes.put_i32(key.process_id);
    bytes.put_i32(key.secret_key);
    bytes
}

/// Create a row description message. Column descriptors are forwarded as is.
pub fn row_description(columns: &[Column], formats: &[FormatCode]) -> BytesMut {
    let mut res = BytesMut::new();
    let mut row_desc = BytesMut::new();

    // how many columns we are storing
    row_desc.put_i16(columns.len() as i16);

    for (index, column) in columns.iter().enumerate() {
        row_desc.put_slice(column.name.as_bytes());
        row_desc.put_u8(0);

        // Doesn't belong to any table
        row_desc.put_i32(column.table_oid as i32);
        row_desc.put_i16(column.attribute_number);

        row_desc.put_i32(column.oid as i32);
        row_desc.put_i16(column.width);
        row_desc.put_i32(column.type_modifier);

        row_desc.put_i16(FormatCode::for_column(formats, index).as_i16());
    }

    res.put_u8(b'T');
    res.put_i32(row_desc.len() as i32 + 4);
    res.put(row_desc);

    res
}

/// Create a data row message, encoding every value in its column's format.
pub fn data_row(row: &[Value], formats: &[FormatCode]) -> BytesMut {
    let mut res = BytesMut::new();
    let mut data_row = BytesMut::new();

    // how many columns we are storing
    data_row.put_i16(row.len() as i16);

    for (index, value) in row.iter().enumerate() {
        let cell = value.encode(FormatCode::for_column(formats, index));
        put_cell(&mut data_row, cell.as_deref());
    }

    res.put_u8(b'D');
    res.put_i32(data_row.len() as i32 + 4);
    res.put(data_row);

    res
}

/// Create a command complete message.
pub fn command_complete(command: &str) -> BytesMut {
    let mut res = BytesMut::new();
    res.put_u8(b'C');
    res.put_i32(command.len() as i32 + 4 + 1);
    res.put_slice(command.as_bytes());
    res.put_u8(0);
    res
}

/// Create a parameter description message.
pub fn parameter_description(types: &[Oid]) -> BytesMut {
    let mut res = BytesMut::with_capacity(7 + types.len() * 4);
    res.put_u8(b't');
    res.put_i32(4 + 2 + types.len() as i32 * 4);
    res.put_i16(types.len() as i16);
    for oid in types {
        res.put_u32(*oid);
    }
    res
}

fn empty_message(code: u8) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(code);
    bytes.put_i32(4);
    bytes
}

/// Create a parse complete message.
pub fn parse_complete() -> BytesMut {
    empty_message(b'1')
}

pub fn bind_complete() -> BytesMut {
    empty_message(b'2')
}

pub fn close_complete() -> BytesMut {
    empty_message(b'3')
}

pub fn no_data() -> BytesMut {
    empty_message(b'n')
}

pub fn empty_query_response() -> BytesMut {
    empty_message(b'I')
}

/// Create a ready for query message.
pub fn ready_for_query(in_transaction: bool) -> BytesMut {
    let mut bytes = BytesMut::new();
    bytes.put_u8(b'Z');
    bytes.put_i32(5);
    if in_transaction {
        bytes.put_u8(b'T');
    } else {
        bytes.put_u8(b'I');
    }

    bytes
}

/// Create a server parameter message.
pub fn server_parameter_message(key: &str, value: &str) -> BytesMut {
    let mut server_info = BytesMut::new();
    server_info.put_u8(b'S');
    server_info.put_i32(4 + key.len() as i32 + 1 + value.len() as i32 + 1);
    server_info.put_slice(key.as_bytes());
    server_info.put_bytes(0, 1);
    server_info.put_slice(value.as_bytes());
    server_info.put_bytes(0, 1);

    server_info
}
