//! Tests for authentication module.

use super::*;
use crate::messages::constants::{
    AUTHENTICATION_CLEAR_PASSWORD, AUTHENTICATION_MD5_PASSWORD, PASSWORD_MESSAGE,
};

fn credentials() -> HashMap<String, String> {
    HashMap::from([
        ("alice".to_string(), "secret".to_string()),
        ("bob".to_string(), md5_stored_password("bob", "hunter2")),
    ])
}

fn password_message(password: &[u8]) -> Vec<u8> {
    let mut raw = vec![PASSWORD_MESSAGE];
    raw.extend_from_slice(&(4 + password.len() as i32 + 1).to_be_bytes());
    raw.extend_from_slice(password);
    raw.push(0);
    raw
}

fn salt_from(challenge: &[u8]) -> [u8; 4] {
    assert_eq!(challenge[0], b'R');
    assert_eq!(
        i32::from_be_bytes([challenge[5], challenge[6], challenge[7], challenge[8]]),
        AUTHENTICATION_MD5_PASSWORD
    );
    [challenge[9], challenge[10], challenge[11], challenge[12]]
}

#[tokio::test]
async fn test_trust_sends_nothing() {
    let mut read: &[u8] = &[];
    let mut write = Vec::new();
    authenticate(&mut read, &mut write, AuthMethod::Trust, &credentials(), "anyone")
        .await
        .unwrap();
    assert!(write.is_empty());
}

#[tokio::test]
async fn test_cleartext_accepts_correct_password() {
    let raw = password_message(b"secret");
    let mut read = &raw[..];
    let mut write = Vec::new();
    authenticate(&mut read, &mut write, AuthMethod::Cleartext, &credentials(), "alice")
        .await
        .unwrap();
    assert_eq!(
        i32::from_be_bytes([write[5], write[6], write[7], write[8]]),
        AUTHENTICATION_CLEAR_PASSWORD
    );
    assert_eq!(write.len(), 9);
}

#[tokio::test]
async fn test_cleartext_against_md5_hash() {
    let raw = password_message(b"hunter2");
    let mut read = &raw[..];
    let mut write = Vec::new();
    authenticate(&mut read, &mut write, AuthMethod::Cleartext, &credentials(), "bob")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cleartext_rejects_wrong_password() {
    let raw = password_message(b"nope");
    let mut read = &raw[..];
    let mut write = Vec::new();
    let err = authenticate(&mut read, &mut write, AuthMethod::Cleartext, &credentials(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthError(_)));
    // Challenge, then a FATAL 28P01.
    let fatal = &write[9..];
    assert_eq!(fatal[0], b'E');
    assert!(fatal.windows(6).any(|w| w == b"C28P01"));
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let raw = password_message(b"secret");
    let mut read = &raw[..];
    let mut write = Vec::new();
    let err = authenticate(&mut read, &mut write, AuthMethod::Cleartext, &credentials(), "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthError(_)));
}

#[tokio::test]
async fn test_md5_exchange() {
    let store = credentials();

    // The salt is only known once the challenge is out, so run the exchange
    // over a duplex pipe and answer like a client would.
    for (user, password) in [("alice", "secret"), ("bob", "hunter2")] {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let store = store.clone();
        let user_owned = user.to_string();
        let server_task = tokio::spawn(async move {
            authenticate(
                &mut server_read,
                &mut server_write,
                AuthMethod::Md5,
                &store,
                &user_owned,
            )
            .await
        });

        let mut challenge = [0u8; 13];
        client.read_exact(&mut challenge).await.unwrap();
        let salt = salt_from(&challenge);
        let hashed = md5_hash_password(user, password, &salt);
        client
            .write_all(&password_message(&hashed))
            .await
            .unwrap();

        server_task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_md5_wrong_password() {
    let (mut client, server) = tokio::io::duplex(1024);
    let (mut server_read, mut server_write) = tokio::io::split(server);
    let store = credentials();
    let server_task = tokio::spawn(async move {
        authenticate(
            &mut server_read,
            &mut server_write,
            AuthMethod::Md5,
            &store,
            "alice",
        )
        .await
    });

    let mut challenge = [0u8; 13];
    client.read_exact(&mut challenge).await.unwrap();
    let salt = salt_from(&challenge);
    let hashed = md5_hash_password("alice", "wrong", &salt);
    client.write_all(&password_message(&hashed)).await.unwrap();

    assert!(matches!(
        server_task.await.unwrap(),
        Err(Error::AuthError(_))
    ));
    let mut code = [0u8; 1];
    client.read_exact(&mut code).await.unwrap();
    assert_eq!(code[0], b'E');
}

#[test]
fn test_md5_stored_password_format() {
    let stored = md5_stored_password("bob", "hunter2");
    assert!(is_md5_hash(&stored));
    assert!(!is_md5_hash("md5short"));
    assert_eq!(AuthMethod::Md5.to_string(), "md5");
}
