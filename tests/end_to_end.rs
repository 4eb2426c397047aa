//! End-to-end tests: a real router between real sockets.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use dual_router::tunnel::CONNECTION_ESTABLISHED;

mod common;

const UPSTREAM_TUNNEL_REPLY: &[u8] =
    b"HTTP/1.1 200 Connection established\r\nProxy-Agent: mock-upstream\r\n\r\n";
const UPSTREAM_HTTP_REPLY: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 13\r\n\r\nfrom upstream";

#[tokio::test]
async fn designated_host_is_reverse_proxied_to_tls_backend() {
    let backend = common::start_tls_backend().await;
    let router = common::start_router(common::config(backend, common::dead_address().await)).await;

    let res = common::client()
        .get(format!("http://{}/assets/app.js?v=3", router.addr))
        .header("host", "MyUrl.com")
        .send()
        .await
        .expect("router unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-backend"], "tls");
    assert_eq!(
        res.text().await.unwrap(),
        "backend GET /assets/app.js?v=3 host=MyUrl.com"
    );
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let config = common::config(common::dead_address().await, common::dead_address().await);
    let router = common::start_router(config).await;

    let res = common::client()
        .get(format!("http://{}/", router.addr))
        .header("host", "myurl.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn other_hosts_go_through_upstream_proxy() {
    let (upstream, captured) = common::start_mock_upstream(UPSTREAM_HTTP_REPLY).await;
    let router = common::start_router(common::config(common::dead_address().await, upstream)).await;

    let res = common::client()
        .get(format!("http://{}/page?id=7", router.addr))
        .header("host", "other.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "from upstream");

    let head = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
    assert!(
        head.starts_with("GET http://other.example.com/page?id=7 HTTP/1.1\r\n"),
        "upstream saw: {head}"
    );
    assert!(head.to_ascii_lowercase().contains("host: other.example.com\r\n"));
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let config = common::config(common::dead_address().await, common::dead_address().await);
    let router = common::start_router(config).await;

    let res = common::client()
        .get(format!("http://{}/", router.addr))
        .header("host", "other.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn request_without_host_is_bad_request() {
    let router = common::start_router(common::config(
        common::dead_address().await,
        common::dead_address().await,
    ))
    .await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let response = common::read_to_close(&mut stream).await;
    assert!(response.contains(" 400 Bad Request"), "got: {response}");
}

#[tokio::test]
async fn direct_connect_confirms_and_relays() {
    let backend = common::start_echo_server().await;
    let router = common::start_router(common::config(backend, common::dead_address().await)).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"CONNECT myurl.com:443 HTTP/1.1\r\nHost: myurl.com:443\r\n\r\n")
        .await
        .unwrap();

    let confirm = common::read_n(&mut stream, CONNECTION_ESTABLISHED.len()).await;
    assert_eq!(confirm, CONNECTION_ESTABLISHED);

    stream.write_all(b"\x16\x03\x01 arbitrary bytes").await.unwrap();
    let echoed = common::read_n(&mut stream, 19).await;
    assert_eq!(echoed, b"\x16\x03\x01 arbitrary bytes");
}

#[tokio::test]
async fn bytes_sent_with_connect_head_are_relayed() {
    let backend = common::start_echo_server().await;
    let router = common::start_router(common::config(backend, common::dead_address().await)).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"CONNECT myurl.com:443 HTTP/1.1\r\n\r\nearly")
        .await
        .unwrap();

    let reply = common::read_n(&mut stream, CONNECTION_ESTABLISHED.len() + 5).await;
    assert_eq!(&reply[..CONNECTION_ESTABLISHED.len()], CONNECTION_ESTABLISHED);
    assert_eq!(&reply[CONNECTION_ESTABLISHED.len()..], b"early");
}

#[tokio::test]
async fn forwarded_connect_replays_handshake_and_passes_reply() {
    let (upstream, captured) = common::start_mock_upstream(UPSTREAM_TUNNEL_REPLY).await;
    let router = common::start_router(common::config(common::dead_address().await, upstream)).await;

    let handshake: &[u8] = b"CONNECT other.example.com:443 HTTP/1.1\r\nHost: other.example.com:443\r\nUser-Agent: curl/8.5.0\r\nProxy-Connection: Keep-Alive\r\n\r\n";
    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream.write_all(handshake).await.unwrap();

    let reply = common::read_n(&mut stream, UPSTREAM_TUNNEL_REPLY.len()).await;
    assert_eq!(reply, UPSTREAM_TUNNEL_REPLY);
    assert_eq!(captured.lock().unwrap().as_slice(), handshake);

    stream.write_all(b"tunneled").await.unwrap();
    assert_eq!(common::read_n(&mut stream, 8).await, b"tunneled");
}

#[tokio::test]
async fn direct_connect_dial_failure_is_service_unavailable() {
    let config = common::config(common::dead_address().await, common::dead_address().await);
    let router = common::start_router(config).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"CONNECT myurl.com:443 HTTP/1.1\r\nHost: myurl.com:443\r\n\r\n")
        .await
        .unwrap();

    let response = common::read_to_close(&mut stream).await;
    assert!(
        response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "got: {response}"
    );
    assert!(response.contains("Content-Length: "));
    assert!(response.contains("Error connecting to target"));
}

#[tokio::test]
async fn forwarded_connect_dial_failure_is_service_unavailable() {
    let config = common::config(common::dead_address().await, common::dead_address().await);
    let router = common::start_router(config).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"CONNECT other.example.com:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let response = common::read_to_close(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "got: {response}");
}

#[tokio::test]
async fn direct_connect_after_earlier_request_tunnels() {
    let backend = common::start_echo_server().await;
    let (upstream, _) = common::start_mock_upstream(UPSTREAM_HTTP_REPLY).await;
    let router = common::start_router(common::config(backend, upstream)).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"GET /first HTTP/1.1\r\nHost: other.example.com\r\n\r\n")
        .await
        .unwrap();
    let first = common::read_until(&mut stream, b"from upstream").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "got: {first}");

    stream
        .write_all(b"CONNECT myurl.com:443 HTTP/1.1\r\nHost: myurl.com:443\r\n\r\n")
        .await
        .unwrap();
    let confirm = common::read_until(&mut stream, b"\r\n\r\n").await;
    assert!(
        confirm.starts_with("HTTP/1.1 200 Connection Established\r\n"),
        "got: {confirm}"
    );
    assert!(confirm.ends_with("\r\n\r\n"), "got: {confirm}");

    stream.write_all(b"\x16\x03\x01 hello").await.unwrap();
    assert_eq!(common::read_n(&mut stream, 9).await, b"\x16\x03\x01 hello");
}

#[tokio::test]
async fn forwarded_connect_after_earlier_request_tunnels() {
    let backend = common::start_tls_backend().await;
    let (upstream, captured) = common::start_mock_upstream(UPSTREAM_TUNNEL_REPLY).await;
    let router = common::start_router(common::config(backend, upstream)).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream
        .write_all(b"GET /first HTTP/1.1\r\nHost: myurl.com\r\n\r\n")
        .await
        .unwrap();
    let first = common::read_until(&mut stream, b"backend GET /first host=myurl.com").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "got: {first}");

    stream
        .write_all(b"CONNECT other.example.com:443 HTTP/1.1\r\nHost: other.example.com:443\r\n\r\n")
        .await
        .unwrap();
    let reply = common::read_until(&mut stream, b"\r\n\r\n").await;
    assert!(
        reply.starts_with("HTTP/1.1 200 Connection established\r\n"),
        "got: {reply}"
    );
    assert!(reply.to_ascii_lowercase().contains("proxy-agent: mock-upstream\r\n"));

    let head = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
    assert!(
        head.starts_with("CONNECT other.example.com:443 HTTP/1.1\r\n"),
        "upstream saw: {head}"
    );

    stream.write_all(b"tunneled").await.unwrap();
    assert_eq!(common::read_n(&mut stream, 8).await, b"tunneled");
}

#[tokio::test]
async fn malformed_first_request_is_bad_request() {
    let router = common::start_router(common::config(
        common::dead_address().await,
        common::dead_address().await,
    ))
    .await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
    let response = common::read_to_close(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "got: {response}");
}

#[tokio::test]
async fn oversized_first_head_is_rejected() {
    let mut config = common::config(common::dead_address().await, common::dead_address().await);
    config.listener.max_header_bytes = 1024;
    let router = common::start_router(config).await;

    // Exactly fills the head budget without ever ending the header section.
    let mut head = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
    head.resize(1024, b'a');

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream.write_all(&head).await.unwrap();
    let response = common::read_to_close(&mut stream).await;
    assert!(
        response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        "got: {response}"
    );
}

#[tokio::test]
async fn tunnel_ends_when_backend_closes() {
    let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let router = common::start_router(common::config(backend_addr, common::dead_address().await)).await;

    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    stream.write_all(b"CONNECT myurl.com:443 HTTP/1.1\r\n\r\n").await.unwrap();
    let (backend_conn, _) = backend.accept().await.unwrap();
    let confirm = common::read_n(&mut stream, CONNECTION_ESTABLISHED.len()).await;
    assert_eq!(confirm, CONNECTION_ESTABLISHED);

    drop(backend_conn);
    let rest = tokio::time::timeout(Duration::from_secs(2), common::read_to_close(&mut stream))
        .await
        .expect("client side was not closed");
    assert!(rest.is_empty());
}
