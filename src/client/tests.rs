//! Drives `Client` over an in-memory stream, from startup to Terminate.

use super::core::Client;
use crate::errors::Error;
use crate::listener::ServerState;
use crate::messages::{oid, read_message, Value};
use crate::query::{
    handler_fn, Column, Parameter, PreparedStatement, QueryContext, QueryError, QueryHandler,
    RowWriter, StatementHandler,
};
use crate::session::CancelOutcome;
use crate::Server;

use bytes::{Buf, BufMut, BytesMut};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

fn state() -> Arc<ServerState> {
    let handler = handler_fn(|_ctx, query: String| async move {
        let statement = match query.as_str() {
            "stream" => PreparedStatement::new(|ctx, mut writer, _params| async move {
                let mut n = 0;
                loop {
                    n += 1;
                    writer.row(vec![Value::Int4(n)]).await?;
                    ctx.until_cancelled(tokio::time::sleep(Duration::from_millis(10)))
                        .await?;
                }
            })
            .with_columns(vec![Column::new("n", oid::INT4, 4)]),
            "fail" => PreparedStatement::new(|_ctx, _writer, _params| async {
                Err(QueryError::new("22012", "division by zero"))
            }),
            "insert" => PreparedStatement::new(|_ctx, mut writer, _params| async move {
                writer.complete("INSERT 0 3").await
            }),
            _ => {
                let text = query.clone();
                PreparedStatement::new(move |_ctx, mut writer, _params| {
                    let text = text.clone();
                    async move { writer.row(vec![Value::Text(text)]).await }
                })
                .with_columns(vec![Column::new("echo", oid::TEXT, -1)])
            }
        };
        Ok(statement)
    });
    Server::builder(handler).build().state()
}

fn startup_body(user: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_slice(b"user\0");
    body.put_slice(user.as_bytes());
    body.put_u8(0);
    body.put_slice(b"application_name\0tests\0");
    body.put_u8(0);
    body
}

fn message(code: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![code];
    bytes.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

fn query(text: &str) -> Vec<u8> {
    message(b'Q', format!("{text}\0").as_bytes())
}

fn parse(name: &str, text: &str) -> Vec<u8> {
    let mut body = format!("{name}\0{text}\0").into_bytes();
    body.extend_from_slice(&0i16.to_be_bytes());
    message(b'P', &body)
}

fn bind(portal: &str, statement: &str, params: &[&str]) -> Vec<u8> {
    let mut body = format!("{portal}\0{statement}\0").into_bytes();
    body.extend_from_slice(&0i16.to_be_bytes());
    body.extend_from_slice(&(params.len() as i16).to_be_bytes());
    for param in params {
        body.extend_from_slice(&(param.len() as i32).to_be_bytes());
        body.extend_from_slice(param.as_bytes());
    }
    body.extend_from_slice(&0i16.to_be_bytes());
    message(b'B', &body)
}

fn describe(target: u8, name: &str) -> Vec<u8> {
    let mut body = vec![target];
    body.extend_from_slice(format!("{name}\0").as_bytes());
    message(b'D', &body)
}

fn execute(portal: &str) -> Vec<u8> {
    let mut body = format!("{portal}\0").into_bytes();
    body.extend_from_slice(&0i32.to_be_bytes());
    message(b'E', &body)
}

fn sync() -> Vec<u8> {
    message(b'S', &[])
}

/// SQLSTATE of an ErrorResponse body.
fn error_code(mut body: BytesMut) -> String {
    while body.has_remaining() {
        let field = body.get_u8();
        if field == 0 {
            break;
        }
        let end = body.iter().position(|b| *b == 0).unwrap();
        let value = body.split_to(end);
        body.advance(1);
        if field == b'C' {
            return String::from_utf8(value.to_vec()).unwrap();
        }
    }
    panic!("no SQLSTATE in error response");
}

struct Connection {
    stream: DuplexStream,
    process_id: i32,
    secret_key: i32,
    task: JoinHandle<Result<(), Error>>,
}

impl Connection {
    async fn open(state: Arc<ServerState>) -> Connection {
        let (mut stream, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move {
            let (read, write) = tokio::io::split(server);
            let addr = "127.0.0.1:40000".parse().unwrap();
            let mut client =
                Client::startup(read, write, addr, startup_body("alice"), state, false).await?;
            client.handle().await
        });

        let mut key = None;
        loop {
            let (code, mut body) = read_message(&mut stream).await.unwrap();
            match code {
                b'K' => key = Some((body.get_i32(), body.get_i32())),
                b'Z' => break,
                _ => (),
            }
        }
        let (process_id, secret_key) = key.unwrap();
        Connection {
            stream,
            process_id,
            secret_key,
            task,
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Messages up to and including ReadyForQuery.
    async fn until_ready(&mut self) -> Vec<(u8, BytesMut)> {
        let mut messages = Vec::new();
        loop {
            let (code, body) = read_message(&mut self.stream).await.unwrap();
            messages.push((code, body));
            if code == b'Z' {
                return messages;
            }
        }
    }

    async fn terminate(mut self) -> Result<(), Error> {
        self.send(&message(b'X', &[])).await;
        self.task.await.unwrap()
    }
}

fn codes(messages: &[(u8, BytesMut)]) -> Vec<u8> {
    messages.iter().map(|(code, _)| *code).collect()
}

#[tokio::test]
async fn test_startup_registers_session() {
    let state = state();
    let conn = Connection::open(Arc::clone(&state)).await;

    let session = state.registry.get(conn.process_id).unwrap();
    assert_eq!(session.secret_key, conn.secret_key);
    assert!(session.cancel.is_none());

    let process_id = conn.process_id;
    conn.terminate().await.unwrap();
    assert!(state.registry.get(process_id).is_none());
}

#[tokio::test]
async fn test_simple_query() {
    let mut conn = Connection::open(state()).await;

    conn.send(&query("hello")).await;
    let messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"TDCZ".to_vec());
    assert_eq!(&messages[2].1[..], b"SELECT 1\0");

    conn.send(&query("insert")).await;
    let messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"CZ".to_vec());
    assert_eq!(&messages[0].1[..], b"INSERT 0 3\0");

    conn.send(&query("  ")).await;
    assert_eq!(codes(&conn.until_ready().await), b"IZ".to_vec());

    conn.terminate().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_keeps_connection() {
    let state = state();
    let mut conn = Connection::open(Arc::clone(&state)).await;

    conn.send(&query("fail")).await;
    let mut messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"EZ".to_vec());
    assert_eq!(error_code(messages.remove(0).1), "22012");

    conn.send(&query("again")).await;
    assert_eq!(codes(&conn.until_ready().await), b"TDCZ".to_vec());
    assert_eq!(state.stats.snapshot().queries_failed, 1);

    conn.terminate().await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_query() {
    let state = state();
    let mut conn = Connection::open(Arc::clone(&state)).await;

    conn.send(&query("stream")).await;
    let (code, _) = read_message(&mut conn.stream).await.unwrap();
    assert_eq!(code, b'T');
    let (code, _) = read_message(&mut conn.stream).await.unwrap();
    assert_eq!(code, b'D');

    // A wrong secret changes nothing.
    assert_eq!(
        state.registry.cancel(conn.process_id, conn.secret_key.wrapping_add(1)),
        CancelOutcome::SecretMismatch
    );
    assert_eq!(
        state.registry.cancel(conn.process_id, conn.secret_key),
        CancelOutcome::Cancelled
    );

    let messages = conn.until_ready().await;
    let errors: Vec<_> = messages
        .iter()
        .filter(|(code, _)| *code == b'E')
        .map(|(_, body)| error_code(body.clone()))
        .collect();
    assert_eq!(errors, vec!["57014".to_string()]);
    assert!(!codes(&messages).contains(&b'C'));

    // The handle is gone once the query ended.
    assert_eq!(
        state.registry.cancel(conn.process_id, conn.secret_key),
        CancelOutcome::NoQueryInFlight
    );

    conn.send(&query("after")).await;
    assert_eq!(codes(&conn.until_ready().await), b"TDCZ".to_vec());
    assert_eq!(state.stats.snapshot().queries_canceled, 1);

    conn.terminate().await.unwrap();
}

#[tokio::test]
async fn test_extended_query() {
    let mut conn = Connection::open(state()).await;

    let mut batch = parse("", "hello");
    batch.extend(bind("", "", &[]));
    batch.extend(describe(b'P', ""));
    batch.extend(execute(""));
    batch.extend(sync());
    conn.send(&batch).await;
    assert_eq!(codes(&conn.until_ready().await), b"12TDCZ".to_vec());

    let mut batch = parse("named", "insert");
    batch.extend(describe(b'S', "named"));
    batch.extend(bind("", "named", &[]));
    batch.extend(execute(""));
    batch.extend(sync());
    conn.send(&batch).await;
    assert_eq!(codes(&conn.until_ready().await), b"1tn2CZ".to_vec());

    conn.terminate().await.unwrap();
}

#[tokio::test]
async fn test_extended_error_skips_until_sync() {
    let mut conn = Connection::open(state()).await;

    let mut batch = bind("", "missing", &[]);
    batch.extend(execute(""));
    batch.extend(parse("", "hello"));
    batch.extend(sync());
    conn.send(&batch).await;
    let mut messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"EZ".to_vec());
    assert_eq!(error_code(messages.remove(0).1), "26000");

    // Parameter count mismatch.
    let mut batch = parse("", "hello");
    batch.extend(bind("", "", &["1"]));
    batch.extend(sync());
    conn.send(&batch).await;
    let mut messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"1EZ".to_vec());
    assert_eq!(error_code(messages.remove(1).1), "08P01");

    // Duplicate named statement.
    let mut batch = parse("s1", "hello");
    batch.extend(parse("s1", "hello"));
    batch.extend(sync());
    conn.send(&batch).await;
    let mut messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"1EZ".to_vec());
    assert_eq!(error_code(messages.remove(1).1), "42P05");

    // Portals do not survive Sync.
    let mut batch = bind("", "s1", &[]);
    batch.extend(sync());
    batch.extend(execute(""));
    batch.extend(sync());
    conn.send(&batch).await;
    assert_eq!(codes(&conn.until_ready().await), b"2Z".to_vec());
    let mut messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"EZ".to_vec());
    assert_eq!(error_code(messages.remove(0).1), "34000");

    conn.terminate().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_terminates_session() {
    let state = state();
    let mut conn = Connection::open(Arc::clone(&state)).await;

    conn.send(&query("stream")).await;
    let (code, _) = read_message(&mut conn.stream).await.unwrap();
    assert_eq!(code, b'T');

    state.shutdown.cancel();

    // The running query ends with 57P01 rather than a user cancel, then the
    // session gets the same code as FATAL and is closed.
    let mut errors = Vec::new();
    while let Ok((code, body)) = read_message(&mut conn.stream).await {
        if code == b'E' {
            errors.push(error_code(body));
        }
    }
    assert_eq!(errors, vec!["57P01".to_string(), "57P01".to_string()]);
    assert!(matches!(conn.task.await.unwrap(), Err(Error::ShuttingDown)));
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_unknown_message_is_fatal() {
    let mut conn = Connection::open(state()).await;
    conn.send(&message(b'?', &[])).await;
    let (code, body) = read_message(&mut conn.stream).await.unwrap();
    assert_eq!(code, b'E');
    assert_eq!(error_code(body), "08P01");
    assert!(matches!(
        conn.task.await.unwrap(),
        Err(Error::ProtocolSyncError(_))
    ));
}

/// Panics synchronously for "boom" in prepare and for "crash" in execute.
struct Fragile;

impl QueryHandler for Fragile {
    fn prepare(
        &self,
        _ctx: QueryContext,
        query: String,
    ) -> BoxFuture<'static, Result<PreparedStatement, QueryError>> {
        match query.as_str() {
            "boom" => panic!("prepare bug"),
            "crash" => Box::pin(async { Ok(PreparedStatement::from_handler(Fragile)) }),
            _ => Box::pin(async {
                Ok(PreparedStatement::new(|_ctx, mut writer, _params| async move {
                    writer.complete("OK").await
                }))
            }),
        }
    }
}

impl StatementHandler for Fragile {
    fn execute(
        &self,
        _ctx: QueryContext,
        _writer: RowWriter,
        _parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, Result<(), QueryError>> {
        panic!("execute bug");
    }
}

#[tokio::test]
async fn test_panicking_handler_keeps_connection() {
    let state = Server::builder(Fragile).build().state();
    let mut conn = Connection::open(Arc::clone(&state)).await;

    for text in ["boom", "crash"] {
        conn.send(&query(text)).await;
        let mut messages = conn.until_ready().await;
        assert_eq!(codes(&messages), b"EZ".to_vec());
        assert_eq!(error_code(messages.remove(0).1), "XX000");
    }

    conn.send(&query("fine")).await;
    let messages = conn.until_ready().await;
    assert_eq!(codes(&messages), b"CZ".to_vec());
    assert_eq!(&messages[0].1[..], b"OK\0");
    assert_eq!(state.stats.snapshot().queries_failed, 2);

    conn.terminate().await.unwrap();
}
