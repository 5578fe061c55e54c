//! End-to-end uploads over real TCP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hashdrop_files::store::FileStore;
use hashdrop_files::testing::init_test_tracing;
use hashdrop_files::transfer::{FileReceiver, FileSender, SendError, SendOutcome, Transport};
use hashdrop_net::{HttpTransport, ServerLimits, UploadServer};
use hashdrop_protocol::{decode_verdict, encode_envelope, TransferEnvelope};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    receiver: Arc<FileReceiver<FileStore>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(tmp: &TempDir, limits: ServerLimits) -> Self {
        let store = FileStore::new(tmp.path().join("ReceivedFiles")).unwrap();
        let receiver = Arc::new(FileReceiver::new(store));
        let server = UploadServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&receiver),
            limits,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            receiver,
            shutdown: Some(tx),
            handle,
        }
    }

    fn transport(&self) -> HttpTransport {
        HttpTransport::new(self.addr.to_string(), Duration::from_secs(10))
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn raw_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn salted_upload_is_verified_and_stored() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let path = tmp.path().join("hello.txt");
    tokio::fs::write(&path, b"hello, integrity").await.unwrap();

    let outcome = FileSender::new()
        .send_path(&path, true, &server.transport())
        .await
        .unwrap();

    assert!(outcome.is_verified());
    assert_eq!(outcome.verdict().name, "hello.txt");
    assert_eq!(outcome.verdict().declared_size, 16);

    let stored = tokio::fs::read(tmp.path().join("ReceivedFiles/files").join("hello.txt"))
        .await
        .unwrap();
    assert_eq!(stored, b"hello, integrity");

    server.stop().await;
}

#[tokio::test]
async fn unsalted_upload_is_verified() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let outcome = FileSender::with_rng(StdRng::seed_from_u64(5))
        .send_bytes("ten.bin", b"0123456789".to_vec(), false, &server.transport())
        .await
        .unwrap();
    assert!(outcome.is_verified());

    let receipts = server.receiver.sink().list_receipts().unwrap();
    assert_eq!(receipts.len(), 1);
    assert!(!receipts[0].salted);

    server.stop().await;
}

#[tokio::test]
async fn tampered_payload_is_reported_as_integrity_failure() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let mut envelope = TransferEnvelope::seal(
        "ten.bin",
        b"0123456789".to_vec(),
        true,
        &mut StdRng::seed_from_u64(5),
    )
    .unwrap();
    envelope.payload[0] ^= 0x01;

    let response = server
        .transport()
        .exchange(encode_envelope(&envelope).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let verdict = decode_verdict(&response.body).unwrap();
    assert!(verdict.success);
    assert!(!verdict.integrity_valid);

    // The tampered bytes are still stored; the verdict is what flags them.
    let stored = tokio::fs::read(tmp.path().join("ReceivedFiles/files").join("ten.bin"))
        .await
        .unwrap();
    assert_eq!(stored, envelope.payload);

    server.stop().await;
}

#[tokio::test]
async fn empty_payload_is_rejected_with_bad_request() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let envelope =
        TransferEnvelope::seal("empty.bin", Vec::new(), false, &mut StdRng::seed_from_u64(5))
            .unwrap();
    let response = server
        .transport()
        .exchange(encode_envelope(&envelope).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert!(!tmp.path().join("ReceivedFiles/files").join("empty.bin").exists());

    server.stop().await;
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let response = raw_request(
        server.addr,
        b"GET /upload HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    let response = raw_request(
        server.addr,
        b"POST /download HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    server.stop().await;
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;

    let response = server
        .transport()
        .exchange(b"{\"FileName\": 12".to_vec())
        .await
        .unwrap();
    assert_eq!(response.status, 400);

    server.stop().await;
}

#[tokio::test]
async fn oversized_body_is_rejected_and_sender_sees_server_error() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let limits = ServerLimits {
        max_body_bytes: 1024,
        ..ServerLimits::default()
    };
    let server = TestServer::start(&tmp, limits).await;

    let result = FileSender::new()
        .send_bytes("big.bin", vec![7u8; 4096], false, &server.transport())
        .await;

    match result {
        Err(SendError::Server { status, .. }) => assert_eq!(status, 413),
        other => panic!("expected 413, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn body_far_past_the_limit_still_gets_413() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let limits = ServerLimits {
        max_body_bytes: 1024,
        ..ServerLimits::default()
    };
    let server = TestServer::start(&tmp, limits).await;

    let result = FileSender::new()
        .send_bytes("huge.bin", vec![7u8; 8 * 1024 * 1024], true, &server.transport())
        .await;

    match result {
        Err(SendError::Server { status, .. }) => assert_eq!(status, 413),
        other => panic!("expected 413, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn stalled_request_gets_408() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let limits = ServerLimits {
        request_timeout: Duration::from_millis(200),
        ..ServerLimits::default()
    };
    let server = TestServer::start(&tmp, limits).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nContent-Le")
        .await
        .unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server never answered the stalled request")
        .unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 408"), "got: {response}");
    assert!(response.ends_with("request timed out"));
    assert!(server.receiver.sink().list_receipts().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn upload_named_like_the_ledger_keeps_receipts_intact() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;
    let transport = server.transport();
    let sender = FileSender::new();

    for name in ["receipts.db", "receipts.db-journal"] {
        let outcome = sender
            .send_bytes(name, b"overwrite attempt".to_vec(), true, &transport)
            .await
            .unwrap();
        assert!(outcome.is_verified());
    }
    server.stop().await;

    let store = FileStore::new(tmp.path().join("ReceivedFiles")).unwrap();
    let receipts = store.list_receipts().unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].name, "receipts.db");
    assert_eq!(receipts[1].name, "receipts.db-journal");
    let stored = std::fs::read(store.files_dir().join("receipts.db")).unwrap();
    assert_eq!(stored, b"overwrite attempt");
}

#[tokio::test]
async fn concurrent_senders_are_isolated() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;
    let transport = server.transport();

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let transport = transport.clone();
        tasks.push(tokio::spawn(async move {
            let payload = vec![i; 10_000 + i as usize];
            FileSender::new()
                .send_bytes(&format!("file_{i}.bin"), payload, i % 2 == 0, &transport)
                .await
        }));
    }

    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::Verified(_)));
    }

    for i in 0..8u8 {
        let stored = tokio::fs::read(tmp.path().join("ReceivedFiles/files").join(format!("file_{i}.bin")))
            .await
            .unwrap();
        assert_eq!(stored, vec![i; 10_000 + i as usize]);
    }
    assert_eq!(server.receiver.sink().list_receipts().unwrap().len(), 8);

    server.stop().await;
}

#[tokio::test]
async fn sender_reports_transport_error_when_server_is_gone() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let server = TestServer::start(&tmp, ServerLimits::default()).await;
    let transport = server.transport();
    server.stop().await;

    let result = FileSender::new()
        .send_bytes("late.bin", b"too late".to_vec(), true, &transport)
        .await;
    assert!(matches!(result, Err(SendError::Transport(_))));
}
