#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use pg_wicket::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serve on an ephemeral port in the background.
pub async fn start(server: &Server) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let background = server.clone();
    tokio::spawn(async move { background.serve(listener).await });
    addr
}

pub fn conninfo(addr: SocketAddr, user: &str) -> String {
    format!("host=127.0.0.1 port={} user={user}", addr.port())
}

/// Connect without TLS and drive the connection in the background.
pub async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(&conninfo(addr, "alice"), tokio_postgres::NoTls)
        .await
        .unwrap();
    tokio::spawn(connection);
    client
}

/// Self-signed certificate and PKCS#8 key, written as PEM into `dir`.
pub fn self_signed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509NameBuilder, X509};

    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
    std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    (cert_path, key_path)
}

/// A hand-driven protocol connection, for packets no client library sends.
pub struct RawConnection {
    pub stream: TcpStream,
}

impl RawConnection {
    pub async fn connect(addr: SocketAddr) -> tokio::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Send a packet with the length prefix, as the first message.
    pub async fn send_untyped(&mut self, body: &[u8]) -> tokio::io::Result<()> {
        let len = (body.len() + 4) as i32;
        let mut msg = Vec::with_capacity(body.len() + 4);
        msg.extend_from_slice(&len.to_be_bytes());
        msg.extend_from_slice(body);
        self.stream.write_all(&msg).await
    }

    pub async fn send_cancel(&mut self, process_id: i32, secret_key: i32) -> tokio::io::Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&80877102i32.to_be_bytes());
        body.extend_from_slice(&process_id.to_be_bytes());
        body.extend_from_slice(&secret_key.to_be_bytes());
        self.send_untyped(&body).await
    }

    pub async fn send_startup(&mut self, user: &str) -> tokio::io::Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&196608i32.to_be_bytes()); // protocol version 3.0
        body.extend_from_slice(b"user\0");
        body.extend_from_slice(user.as_bytes());
        body.push(0);
        body.push(0);
        self.send_untyped(&body).await
    }

    pub async fn read_message(&mut self) -> tokio::io::Result<(char, Vec<u8>)> {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).await?;
        let msg_type = header[0] as char;
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        assert!(len >= 4, "Invalid message length: {len}");
        let mut data = vec![0u8; len - 4];
        self.stream.read_exact(&mut data).await?;
        Ok((msg_type, data))
    }

    /// Read the session key, skipping everything up to ReadyForQuery.
    pub async fn read_until_ready(&mut self) -> tokio::io::Result<Option<(i32, i32)>> {
        let mut key = None;
        loop {
            let (msg_type, data) = self.read_message().await?;
            match msg_type {
                'K' => {
                    key = Some((
                        i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                        i32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    ))
                }
                'Z' => return Ok(key),
                _ => (),
            }
        }
    }

    /// Bytes left until the server closes the socket.
    pub async fn read_to_end(&mut self) -> tokio::io::Result<Vec<u8>> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await?;
        Ok(rest)
    }
}
