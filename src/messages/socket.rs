use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::Error;

use super::MAX_MESSAGE_SIZE;

/// Write all data in the buffer to the stream.
pub async fn write_all<S>(stream: &mut S, buf: BytesMut) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    match stream.write_all(&buf).await {
        Ok(_) => Ok(()),
        Err(err) => Err(Error::SocketError(format!(
            "Failed to write to socket: {err}"
        ))),
    }
}

/// Write all the data and flush it.
pub async fn write_all_flush<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    match stream.write_all(buf).await {
        Ok(_) => match stream.flush().await {
            Ok(_) => Ok(()),
            Err(err) => Err(Error::SocketError(format!(
                "Failed to flush socket: {err}"
            ))),
        },
        Err(err) => Err(Error::SocketError(format!(
            "Failed to write to socket: {err}"
        ))),
    }
}

/// Read a message header: type code and total length (length field included).
pub async fn read_message_header<S>(stream: &mut S) -> Result<(u8, i32), Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let code = stream.read_u8().await?;
    let len = stream.read_i32().await?;
    if !(4..=MAX_MESSAGE_SIZE).contains(&len) {
        return Err(Error::ProtocolSyncError(format!(
            "invalid length {len} for message '{}'",
            code as char
        )));
    }
    Ok((code, len))
}

/// Read a whole message. The returned body excludes the code and length.
pub async fn read_message<S>(stream: &mut S) -> Result<(u8, BytesMut), Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let (code, len) = read_message_header(stream).await?;
    let mut body = BytesMut::with_capacity(len as usize - 4);
    body.put_bytes(0, len as usize - 4);
    stream.read_exact(&mut body[..]).await?;
    Ok((code, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_message() {
        let raw: Vec<u8> = vec![b'Q', 0, 0, 0, 7, b'a', b'b', 0];
        let mut stream = &raw[..];
        let (code, body) = read_message(&mut stream).await.unwrap();
        assert_eq!(code, b'Q');
        assert_eq!(&body[..], b"ab\0");
    }

    #[tokio::test]
    async fn test_read_message_rejects_bad_length() {
        let raw: Vec<u8> = vec![b'Q', 0, 0, 0, 2];
        let mut stream = &raw[..];
        assert!(matches!(
            read_message(&mut stream).await,
            Err(Error::ProtocolSyncError(_))
        ));
    }

    #[tokio::test]
    async fn test_read_message_eof() {
        let raw: Vec<u8> = vec![b'Q', 0, 0];
        let mut stream = &raw[..];
        let err = read_message(&mut stream).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
