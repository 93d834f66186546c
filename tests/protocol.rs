//! Wire-protocol tests against a scripted in-process server.
//!
//! Each test binds a local TCP listener, plays the backend's side of the
//! v3 protocol with hand-composed frames, and asserts on what the client
//! sends and returns. No PostgreSQL instance is required.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use quill_postgres::protocol::codec::MessageBuilder;
use quill_postgres::{
    Client, CommandType, ConnectionError, ConnectionOptions, Error, Query, TlsOptions, Value,
};

// === backend-side frame composition ===

fn auth_request(buf: &mut Vec<u8>, code: i32) {
    let mut msg = MessageBuilder::new(buf, b'R');
    msg.write_i32(code);
    msg.finish();
}

fn auth_md5(buf: &mut Vec<u8>, salt: [u8; 4]) {
    let mut msg = MessageBuilder::new(buf, b'R');
    msg.write_i32(5);
    msg.write_bytes(&salt);
    msg.finish();
}

fn auth_sasl_mechanisms(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, b'R');
    msg.write_i32(10);
    msg.write_cstr("SCRAM-SHA-256");
    msg.write_u8(0);
    msg.finish();
}

fn auth_sasl_payload(buf: &mut Vec<u8>, code: i32, payload: &str) {
    let mut msg = MessageBuilder::new(buf, b'R');
    msg.write_i32(code);
    msg.write_bytes(payload.as_bytes());
    msg.finish();
}

fn parameter_status(buf: &mut Vec<u8>, name: &str, value: &str) {
    let mut msg = MessageBuilder::new(buf, b'S');
    msg.write_cstr(name);
    msg.write_cstr(value);
    msg.finish();
}

fn backend_key(buf: &mut Vec<u8>, pid: i32, secret: i32) {
    let mut msg = MessageBuilder::new(buf, b'K');
    msg.write_i32(pid);
    msg.write_i32(secret);
    msg.finish();
}

fn ready(buf: &mut Vec<u8>, status: u8) {
    let mut msg = MessageBuilder::new(buf, b'Z');
    msg.write_u8(status);
    msg.finish();
}

fn row_description(buf: &mut Vec<u8>, columns: &[(&str, i32)]) {
    let mut msg = MessageBuilder::new(buf, b'T');
    msg.write_i16(columns.len() as i16);
    for (name, type_oid) in columns {
        msg.write_cstr(name);
        msg.write_i32(0); // table oid
        msg.write_i16(0); // column index
        msg.write_i32(*type_oid);
        msg.write_i16(-1); // type size
        msg.write_i32(-1); // type modifier
        msg.write_i16(0); // text format
    }
    msg.finish();
}

fn data_row(buf: &mut Vec<u8>, fields: &[Option<&str>]) {
    let mut msg = MessageBuilder::new(buf, b'D');
    msg.write_i16(fields.len() as i16);
    for field in fields {
        match field {
            Some(text) => {
                msg.write_i32(text.len() as i32);
                msg.write_bytes(text.as_bytes());
            }
            None => msg.write_i32(-1),
        }
    }
    msg.finish();
}

fn command_complete(buf: &mut Vec<u8>, tag: &str) {
    let mut msg = MessageBuilder::new(buf, b'C');
    msg.write_cstr(tag);
    msg.finish();
}

fn empty_query_response(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, b'I');
    msg.finish();
}

fn error_response(buf: &mut Vec<u8>, severity: &str, code: &str, message: &str) {
    let mut msg = MessageBuilder::new(buf, b'E');
    msg.write_u8(b'S');
    msg.write_cstr(severity);
    msg.write_u8(b'V');
    msg.write_cstr(severity);
    msg.write_u8(b'C');
    msg.write_cstr(code);
    msg.write_u8(b'M');
    msg.write_cstr(message);
    msg.write_u8(0);
    msg.finish();
}

fn notice_response(buf: &mut Vec<u8>, message: &str) {
    let mut msg = MessageBuilder::new(buf, b'N');
    msg.write_u8(b'S');
    msg.write_cstr("NOTICE");
    msg.write_u8(b'V');
    msg.write_cstr("NOTICE");
    msg.write_u8(b'C');
    msg.write_cstr("00000");
    msg.write_u8(b'M');
    msg.write_cstr(message);
    msg.write_u8(0);
    msg.finish();
}

// === backend-side frame reading ===

async fn read_startup(socket: &mut TcpStream) -> Vec<u8> {
    let length = socket.read_i32().await.expect("startup length") as usize;
    let mut payload = vec![0u8; length - 4];
    socket.read_exact(&mut payload).await.expect("startup body");
    payload
}

async fn read_frame(socket: &mut TcpStream) -> (u8, Vec<u8>) {
    let kind = socket.read_u8().await.expect("frame kind");
    let length = socket.read_i32().await.expect("frame length") as usize;
    let mut payload = vec![0u8; length - 4];
    socket.read_exact(&mut payload).await.expect("frame body");
    (kind, payload)
}

fn cstr_at(payload: &[u8], start: usize) -> &str {
    let end = payload[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|nul| start + nul)
        .expect("missing NUL");
    std::str::from_utf8(&payload[start..end]).expect("invalid UTF-8")
}

/// Serve the trust-auth startup sequence on an accepted socket.
async fn complete_trust_startup(socket: &mut TcpStream, pid: i32) {
    let startup = read_startup(socket).await;
    let version = i32::from_be_bytes([startup[0], startup[1], startup[2], startup[3]]);
    assert_eq!(version, 196608);

    let mut buf = Vec::new();
    auth_request(&mut buf, 0);
    parameter_status(&mut buf, "server_version", "16.3");
    backend_key(&mut buf, pid, 12321);
    ready(&mut buf, b'I');
    socket.write_all(&buf).await.expect("startup response");
}

fn client_options(port: u16) -> ConnectionOptions {
    ConnectionOptions {
        user: "scout".into(),
        database: "warren".into(),
        hostname: "127.0.0.1".into(),
        port,
        tls: TlsOptions {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn bound_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

// === scenarios ===

#[tokio::test]
async fn startup_and_simple_select() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 4242).await;

        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        assert_eq!(cstr_at(&payload, 0), "SELECT 1");

        let mut buf = Vec::new();
        row_description(&mut buf, &[("?column?", 23)]);
        data_row(&mut buf, &[Some("1")]);
        command_complete(&mut buf, "SELECT 1");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("query response");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");

    let session = client.session().await;
    assert_eq!(session.pid, 4242);
    assert!(!session.tls);
    assert_eq!(
        session.parameters.get("server_version").map(String::as_str),
        Some("16.3")
    );

    let results = client.query_array("SELECT 1").await.expect("query");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].command, Some(CommandType::Select));
    assert_eq!(results[0].row_count, Some(1));
    assert_eq!(results[0].rows, vec![vec![Value::Int4(1)]]);
    assert_eq!(results[0].columns[0].name, "?column?");

    server.await.expect("server");
}

#[tokio::test]
async fn md5_authentication_round_trip() {
    let (listener, port) = bound_listener().await;
    let salt = [0x0a, 0x0b, 0x0c, 0x0d];

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let _ = read_startup(&mut socket).await;

        let mut buf = Vec::new();
        auth_md5(&mut buf, salt);
        socket.write_all(&buf).await.expect("md5 challenge");

        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'p');

        // md5(md5(password + username) + salt), lowercase hex
        use md5::{Digest as _, Md5};
        let mut hasher = Md5::new();
        hasher.update(b"sekrit");
        hasher.update(b"scout");
        let inner = format!("{:x}", hasher.finalize());
        let mut hasher = Md5::new();
        hasher.update(inner.as_bytes());
        hasher.update(salt);
        let expected = format!("md5{:x}", hasher.finalize());
        assert_eq!(cstr_at(&payload, 0), expected);

        let mut buf = Vec::new();
        auth_request(&mut buf, 0);
        backend_key(&mut buf, 7, 7);
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("auth ok");
    });

    let mut options = client_options(port);
    options.password = Some("sekrit".into());
    let client = Client::new(options).expect("client");
    client.connect().await.expect("connect");

    server.await.expect("server");
}

#[tokio::test]
async fn scram_authentication_round_trip() {
    let (listener, port) = bound_listener().await;
    const PASSWORD: &str = "pencil";
    const ITERATIONS: u32 = 4096;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let _ = read_startup(&mut socket).await;

        let mut buf = Vec::new();
        auth_sasl_mechanisms(&mut buf);
        socket.write_all(&buf).await.expect("sasl request");

        // SASLInitialResponse: mechanism, length, client-first-message
        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'p');
        let mechanism = cstr_at(&payload, 0);
        assert_eq!(mechanism, "SCRAM-SHA-256");
        let initial = std::str::from_utf8(&payload[mechanism.len() + 1 + 4..]).expect("utf8");
        let client_first_bare = initial.strip_prefix("n,,").expect("gs2 header");
        let client_nonce = client_first_bare
            .split(",r=")
            .nth(1)
            .expect("client nonce");

        let salt = b"0123456789abcdef";
        let server_first = format!(
            "r={client_nonce}3rfcNHYJY1ZVvWVs7j,s={},i={ITERATIONS}",
            BASE64.encode(salt)
        );
        let mut buf = Vec::new();
        auth_sasl_payload(&mut buf, 11, &server_first);
        socket.write_all(&buf).await.expect("server first");

        // SASLResponse: client-final-message with proof
        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'p');
        let client_final = std::str::from_utf8(&payload).expect("utf8");
        let (without_proof, proof_b64) =
            client_final.split_once(",p=").expect("proof attribute");

        let mut salted = [0u8; 32];
        pbkdf2_hmac::<Sha256>(PASSWORD.as_bytes(), salt, ITERATIONS, &mut salted);
        let hmac = |key: &[u8], data: &[u8]| -> [u8; 32] {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac key");
            mac.update(data);
            mac.finalize().into_bytes().into()
        };
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let mut expected_proof = [0u8; 32];
        for (i, byte) in expected_proof.iter_mut().enumerate() {
            *byte = client_key[i] ^ signature[i];
        }
        assert_eq!(proof_b64, BASE64.encode(expected_proof));

        let server_key = hmac(&salted, b"Server Key");
        let verifier = BASE64.encode(hmac(&server_key, auth_message.as_bytes()));
        let mut buf = Vec::new();
        auth_sasl_payload(&mut buf, 12, &format!("v={verifier}"));
        auth_request(&mut buf, 0);
        backend_key(&mut buf, 11, 11);
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("sasl final");
    });

    let mut options = client_options(port);
    options.password = Some(PASSWORD.into());
    let client = Client::new(options).expect("client");
    client.connect().await.expect("connect");

    server.await.expect("server");
}

#[tokio::test]
async fn extended_query_with_arguments() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 1).await;

        // Parse, Bind, Describe, Execute, Sync
        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'P');
        assert_eq!(cstr_at(&payload, 0), ""); // unnamed statement
        assert_eq!(cstr_at(&payload, 1), "SELECT $1::INT AS n");

        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'B');
        let text = String::from_utf8_lossy(&payload);
        assert!(text.contains("42"), "bind payload missing argument");

        assert_eq!(read_frame(&mut socket).await.0, b'D');
        assert_eq!(read_frame(&mut socket).await.0, b'E');
        assert_eq!(read_frame(&mut socket).await.0, b'S');

        let mut buf = Vec::new();
        let msg = MessageBuilder::new(&mut buf, b'1');
        msg.finish();
        let msg = MessageBuilder::new(&mut buf, b'2');
        msg.finish();
        row_description(&mut buf, &[("n", 23)]);
        data_row(&mut buf, &[Some("42")]);
        command_complete(&mut buf, "SELECT 1");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("extended response");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");

    let results = client
        .query_object(Query::with_args(
            "SELECT $1::INT AS n",
            [Value::Int4(42)],
        ))
        .await
        .expect("extended query");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rows[0]["n"], Value::Int4(42));

    server.await.expect("server");
}

#[tokio::test]
async fn statement_chain_and_warnings() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 1).await;

        let (kind, _) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');

        let mut buf = Vec::new();
        row_description(&mut buf, &[("a", 23)]);
        data_row(&mut buf, &[Some("1")]);
        notice_response(&mut buf, "heads up");
        command_complete(&mut buf, "SELECT 1");
        row_description(&mut buf, &[("b", 25)]);
        data_row(&mut buf, &[Some("x")]);
        data_row(&mut buf, &[None]);
        command_complete(&mut buf, "SELECT 2");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("chain response");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");

    let results = client
        .query_array("SELECT 1; SELECT x FROM t")
        .await
        .expect("chain");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rows, vec![vec![Value::Int4(1)]]);
    assert_eq!(results[0].warnings.len(), 1);
    assert_eq!(results[0].warnings[0].message, "heads up");
    assert_eq!(
        results[1].rows,
        vec![vec![Value::Text("x".into())], vec![Value::Null]]
    );

    server.await.expect("server");
}

#[tokio::test]
async fn empty_query_returns_no_results() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 1).await;

        let (kind, payload) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        assert_eq!(cstr_at(&payload, 0), "");

        let mut buf = Vec::new();
        empty_query_response(&mut buf);
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("empty response");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");

    let results = client.query_array("").await.expect("empty query");
    assert!(results.is_empty());

    server.await.expect("server");
}

#[tokio::test]
async fn server_error_resynchronizes_before_surfacing() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 1).await;

        let (kind, _) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        let mut buf = Vec::new();
        error_response(&mut buf, "ERROR", "42601", "syntax error at or near \"FROM\"");
        notice_response(&mut buf, "still talking");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("error response");

        // the connection must be usable immediately afterwards
        let (kind, _) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        let mut buf = Vec::new();
        row_description(&mut buf, &[("ok", 16)]);
        data_row(&mut buf, &[Some("t")]);
        command_complete(&mut buf, "SELECT 1");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("recovery response");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");

    let err = client.query_array("SELEC").await.unwrap_err();
    match err {
        Error::Postgres(notice) => {
            assert_eq!(notice.code, "42601");
            assert!(notice.message.starts_with("syntax error"));
        }
        other => panic!("expected server error, got {other:?}"),
    }

    let results = client.query_array("SELECT true").await.expect("recovery");
    assert_eq!(results[0].rows, vec![vec![Value::Bool(true)]]);

    server.await.expect("server");
}

#[tokio::test]
async fn disconnect_fails_in_flight_query_and_reconnects() {
    let (listener, port) = bound_listener().await;

    let server = tokio::spawn(async move {
        // first session: die mid-query
        let (mut socket, _) = listener.accept().await.expect("accept");
        complete_trust_startup(&mut socket, 100).await;
        let (kind, _) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        drop(socket);

        // second session: the transparent reconnect
        let (mut socket, _) = listener.accept().await.expect("re-accept");
        complete_trust_startup(&mut socket, 200).await;
        let (kind, _) = read_frame(&mut socket).await;
        assert_eq!(kind, b'Q');
        let mut buf = Vec::new();
        row_description(&mut buf, &[("n", 23)]);
        data_row(&mut buf, &[Some("1")]);
        command_complete(&mut buf, "SELECT 1");
        ready(&mut buf, b'I');
        socket.write_all(&buf).await.expect("recovered query");
    });

    let client = Client::new(client_options(port)).expect("client");
    client.connect().await.expect("connect");
    assert_eq!(client.session().await.pid, 100);

    let err = client.query_array("SELECT 1").await.unwrap_err();
    assert!(
        matches!(err, Error::Connection(ConnectionError::Lost)),
        "expected ConnectionLost, got {err:?}"
    );

    // the in-flight query was not retried; the session is fresh
    assert_eq!(client.session().await.pid, 200);
    let results = client.query_array("SELECT 1").await.expect("after reconnect");
    assert_eq!(results[0].rows, vec![vec![Value::Int4(1)]]);

    server.await.expect("server");
}
