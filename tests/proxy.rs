use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;

use snirouter::config::{Config, Route};
use snirouter::runner::Runner;

/// A ClientHello for `host`, framed as one TLS record, or as several when
/// `fragment` caps the handshake bytes per record.
fn client_hello(host: &str, minor: u8, fragment: Option<usize>) -> Vec<u8> {
    let name = host.as_bytes();
    let mut sni = Vec::new();
    sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    sni.push(0); // host_name
    sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni.extend_from_slice(name);

    let mut exts = Vec::new();
    exts.extend_from_slice(&[0x00, 0x00]); // server_name
    exts.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    exts.extend_from_slice(&sni);

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0x00, 0x2f]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
    body.extend_from_slice(&exts);

    let mut message = vec![
        0x01,
        (body.len() >> 16) as u8,
        (body.len() >> 8) as u8,
        body.len() as u8,
    ];
    message.extend_from_slice(&body);

    let mut wire = Vec::new();
    for chunk in message.chunks(fragment.unwrap_or(message.len())) {
        wire.push(22);
        wire.push(3);
        wire.push(minor);
        wire.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        wire.extend_from_slice(chunk);
    }
    wire
}

fn route_to(host: &str, backend: &str) -> Config {
    Config {
        listen: None,
        dial_timeout_ms: Some(1000),
        log_config_file: None,
        routes: vec![Route {
            hostnames: vec![host.to_string()],
            patterns: Vec::new(),
            backend: backend.to_string(),
        }],
    }
}

async fn start_router(config: Config) -> SocketAddr {
    let config = Arc::new(RwLock::new(config));
    let runner = Runner::bind("127.0.0.1:0", config).await.unwrap();
    let addr = runner.local_addr().unwrap();
    tokio::spawn(runner.run());
    addr
}

#[tokio::test]
async fn routes_and_replays_handshake_bytes_first() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = start_router(route_to("api.example.com", &backend_addr.to_string())).await;

    let hello = client_hello("api.example.com", 3, None);
    let expected = hello.clone();

    let backend_task = tokio::spawn(async move {
        let (mut socket, _) = backend.accept().await.unwrap();
        let mut first = vec![0u8; expected.len()];
        socket.read_exact(&mut first).await.unwrap();
        assert_eq!(first, expected);
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"application data");
        socket.write_all(b"backend response").await.unwrap();
    });

    let mut client = TcpStream::connect(router).await.unwrap();
    client.write_all(&hello).await.unwrap();
    client.write_all(b"application data").await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"backend response");
    backend_task.await.unwrap();
}

#[tokio::test]
async fn fragmented_hello_routes_identically() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = start_router(route_to("api.example.com", &backend_addr.to_string())).await;

    let hello = client_hello("api.example.com", 3, Some(7));
    let expected = hello.clone();

    let backend_task = tokio::spawn(async move {
        let (mut socket, _) = backend.accept().await.unwrap();
        let mut got = vec![0u8; expected.len()];
        socket.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);
        socket.write_all(b"ok").await.unwrap();
    });

    let mut client = TcpStream::connect(router).await.unwrap();
    // feed the records in two bursts so the router sees partial reads too
    let split = hello.len() / 2;
    client.write_all(&hello[..split]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(&hello[split..]).await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"ok");
    backend_task.await.unwrap();
}

#[tokio::test]
async fn unknown_hostname_gets_unrecognized_name_alert_without_dialing() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = start_router(route_to("configured.example.com", &backend_addr.to_string())).await;

    let mut client = TcpStream::connect(router).await.unwrap();
    client
        .write_all(&client_hello("unknown.example", 1, None))
        .await
        .unwrap();

    let mut alert = Vec::new();
    client.read_to_end(&mut alert).await.unwrap();
    // unrecognized_name, echoing the client's own minor version
    assert_eq!(alert, [21, 3, 1, 0, 2, 2, 112]);

    let outcome = timeout(Duration::from_millis(300), backend.accept()).await;
    assert!(outcome.is_err(), "backend must never see a connection");
}

#[tokio::test]
async fn missing_sni_gets_unrecognized_name_alert() {
    let router = start_router(route_to("api.example.com", "127.0.0.1:1")).await;

    // a hello with no extensions block at all
    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0x00, 0x2f]);
    body.extend_from_slice(&[0x01, 0x00]);
    let mut message = vec![0x01, 0, 0, body.len() as u8];
    message.extend_from_slice(&body);
    let mut wire = vec![22, 3, 3];
    wire.extend_from_slice(&(message.len() as u16).to_be_bytes());
    wire.extend_from_slice(&message);

    let mut client = TcpStream::connect(router).await.unwrap();
    client.write_all(&wire).await.unwrap();

    let mut alert = Vec::new();
    client.read_to_end(&mut alert).await.unwrap();
    assert_eq!(alert, [21, 3, 3, 0, 2, 2, 112]);
}

#[tokio::test]
async fn non_tls_bytes_get_internal_error_alert() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = start_router(route_to("api.example.com", &backend_addr.to_string())).await;

    let mut client = TcpStream::connect(router).await.unwrap();
    // content-type mismatch is detected on the first 5 bytes
    client.write_all(b"GET /").await.unwrap();

    let mut alert = Vec::new();
    client.read_to_end(&mut alert).await.unwrap();
    // internal_error with the default minor version
    assert_eq!(alert, [21, 3, 0, 0, 2, 2, 80]);

    let outcome = timeout(Duration::from_millis(300), backend.accept()).await;
    assert!(outcome.is_err(), "backend must never see a connection");
}

#[tokio::test]
async fn dial_failure_gets_internal_error_alert() {
    // nothing listens on port 1
    let router = start_router(route_to("api.example.com", "127.0.0.1:1")).await;

    let mut client = TcpStream::connect(router).await.unwrap();
    client
        .write_all(&client_hello("api.example.com", 2, None))
        .await
        .unwrap();

    let mut alert = Vec::new();
    client.read_to_end(&mut alert).await.unwrap();
    assert_eq!(alert, [21, 3, 2, 0, 2, 2, 80]);
}

#[tokio::test]
async fn half_close_lets_backend_finish_sending() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = start_router(route_to("api.example.com", &backend_addr.to_string())).await;

    let hello = client_hello("api.example.com", 3, None);
    let hello_len = hello.len();

    let backend_task = tokio::spawn(async move {
        let (mut socket, _) = backend.accept().await.unwrap();
        let mut first = vec![0u8; hello_len];
        socket.read_exact(&mut first).await.unwrap();
        // the client's half-close must arrive as EOF here
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        // and the reverse direction still delivers afterwards
        socket.write_all(b"late backend data").await.unwrap();
    });

    let mut client = TcpStream::connect(router).await.unwrap();
    client.write_all(&hello).await.unwrap();
    client.shutdown().await.unwrap();

    let mut got = Vec::new();
    client.read_to_end(&mut got).await.unwrap();
    assert_eq!(got, b"late backend data");
    backend_task.await.unwrap();
}
