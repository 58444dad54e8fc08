//! Integration tests for the php-fpm exporter.
//!
//! These tests run an in-process FastCGI responder standing in for php-fpm
//! and verify the full flow from the status query to the HTTP /metrics
//! endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fpmsight_exporter::{HttpServer, MetricCollector, SharedCollector, Target, TransportKind};
use fpmsight_fastcgi::record::{self, EndRequest, RecordType, decode_params};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

const SCENARIO_BODY: &str = r#"{
    "pool": "www",
    "process manager": "dynamic",
    "start time": 1700000000,
    "start since": 3600,
    "accepted conn": 100,
    "listen queue": 0,
    "max listen queue": 1,
    "listen queue len": 128,
    "idle processes": 3,
    "active processes": 2,
    "total processes": 5,
    "max active processes": 10,
    "max children reached": 0,
    "slow requests": 0
}"#;

/// How the fake php-fpm answers a status request.
#[derive(Clone)]
enum Reply {
    /// CGI response with the given status line and body.
    Page { status: &'static str, body: String },
    /// Half a record, then close.
    Truncated,
    /// Read the request and never answer.
    Silent,
}

impl Reply {
    fn json(body: &str) -> Self {
        Reply::Page {
            status: "200 OK",
            body: body.to_string(),
        }
    }
}

/// Read one request and return its parameters.
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<(String, String)> {
    let mut params = Vec::new();
    loop {
        let (header, content) = record::read_record(stream).await.unwrap();
        match RecordType::from_u8(header.record_type) {
            Some(RecordType::Params) => params.extend_from_slice(&content),
            Some(RecordType::Stdin) if content.is_empty() => break,
            _ => {}
        }
    }
    decode_params(&params).unwrap()
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

async fn respond<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, reply: Reply) {
    let params = read_request(&mut stream).await;
    assert_eq!(param(&params, "QUERY_STRING"), Some("json"));
    assert_eq!(param(&params, "REQUEST_METHOD"), Some("GET"));

    let mut buf = Vec::new();
    match reply {
        Reply::Page { status, body } => {
            let stdout = format!(
                "Status: {}\r\nContent-type: application/json\r\n\r\n{}",
                status, body
            );
            record::write_stream(&mut buf, RecordType::Stdout, 1, stdout.as_bytes());
            let end = EndRequest {
                app_status: 0,
                protocol_status: record::REQUEST_COMPLETE,
            };
            record::write_record(&mut buf, RecordType::EndRequest, 1, &end.encode());
        }
        Reply::Truncated => {
            record::write_record(&mut buf, RecordType::Stdout, 1, b"{\"pool\":");
            buf.truncate(buf.len() - 4);
        }
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        }
    }

    let _ = stream.write_all(&buf).await;
    let _ = stream.shutdown().await;
}

/// Start a fake php-fpm on an ephemeral TCP port.
async fn spawn_tcp_fpm(reply: Reply) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream, reply.clone()));
        }
    });

    addr
}

fn tcp_collector(addr: SocketAddr, timeout: Duration) -> SharedCollector {
    let target = Target::new(TransportKind::Tcp, addr.to_string(), "/fpm_status", timeout).unwrap();
    Arc::new(MetricCollector::new("phpfpm", target))
}

/// Extract the value of the first series with the given name.
fn series_value(output: &str, name: &str) -> Option<f64> {
    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| line.split(['{', ' ']).next() == Some(name))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|value| value.parse().ok())
}

/// Start the exporter HTTP server on an ephemeral port.
async fn spawn_exporter(collector: SharedCollector) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(collector, addr, "/metrics".to_string());
    tokio::spawn(async move {
        server.serve(listener, shutdown_rx).await.unwrap();
    });

    (addr, shutdown_tx)
}

#[tokio::test]
async fn test_tcp_scrape_reports_pool() {
    let fpm = spawn_tcp_fpm(Reply::json(SCENARIO_BODY)).await;
    let collector = tcp_collector(fpm, Duration::from_secs(3));

    let samples = collector.collect().await.samples;

    let values: Vec<(String, f64)> = samples
        .iter()
        .map(|s| (s.name().to_string(), s.value))
        .collect();
    assert_eq!(
        values,
        vec![
            ("phpfpm_up".to_string(), 1.0),
            ("phpfpm_accepted_conn".to_string(), 100.0),
            ("phpfpm_listen_queue".to_string(), 0.0),
            ("phpfpm_max_listen_queue".to_string(), 1.0),
            ("phpfpm_listen_queue_len".to_string(), 128.0),
            ("phpfpm_idle_processes".to_string(), 3.0),
            ("phpfpm_active_processes".to_string(), 2.0),
            ("phpfpm_total_processes".to_string(), 5.0),
            ("phpfpm_max_active_processes".to_string(), 10.0),
            ("phpfpm_max_children_reached".to_string(), 0.0),
            ("phpfpm_slow_requests".to_string(), 0.0),
        ]
    );
}

#[tokio::test]
async fn test_http_scrape_end_to_end() {
    let fpm = spawn_tcp_fpm(Reply::json(SCENARIO_BODY)).await;
    let (addr, shutdown_tx) = spawn_exporter(tcp_collector(fpm, Duration::from_secs(3))).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();

    assert_eq!(series_value(&body, "phpfpm_up"), Some(1.0));
    assert_eq!(series_value(&body, "phpfpm_accepted_conn"), Some(100.0));
    assert_eq!(series_value(&body, "phpfpm_listen_queue_len"), Some(128.0));
    assert_eq!(series_value(&body, "phpfpm_exporter_scrapes_total"), Some(1.0));
    assert!(body.contains("app=\"php-fpm\""));

    let ready = client
        .get(format!("http://{}/ready", addr))
        .send()
        .await
        .unwrap();
    assert!(ready.status().is_success());

    shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn test_unreachable_target_reports_down() {
    // Grab a free port and release it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (exporter, shutdown_tx) = spawn_exporter(tcp_collector(addr, Duration::from_secs(1))).await;

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{}/metrics", exporter))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(series_value(&body, "phpfpm_up"), Some(0.0));
    assert!(!body.contains("phpfpm_accepted_conn"));
    assert_eq!(
        series_value(&body, "phpfpm_exporter_scrape_failures_total"),
        Some(1.0)
    );

    let ready = client
        .get(format!("http://{}/ready", exporter))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    shutdown_tx.send(true).unwrap();
}

/// Fill the accept queue of a listener that never accepts, so further
/// connects stay unanswered. Returns `None` where the platform answers or
/// refuses them instead.
async fn saturated_listener() -> Option<(TcpListener, Vec<TcpStream>)> {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut held = Vec::new();
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => held.push(stream),
            Ok(Err(_)) => return None,
            Err(_) => return Some((listener, held)),
        }
    }
    None
}

#[tokio::test]
async fn test_dial_timeout_reports_down() {
    let Some((listener, _held)) = saturated_listener().await else {
        eprintln!("accept queue never filled up, skipping");
        return;
    };
    let collector = tcp_collector(
        listener.local_addr().unwrap(),
        Duration::from_millis(300),
    );

    let started = std::time::Instant::now();
    let scrape = collector.collect().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(scrape.samples.len(), 1);
    assert_eq!(scrape.samples[0].name(), "phpfpm_up");
    assert_eq!(scrape.samples[0].value, 0.0);
    assert_eq!(scrape.stats.failures, 1);
}

#[tokio::test]
async fn test_silent_target_times_out() {
    let fpm = spawn_tcp_fpm(Reply::Silent).await;
    let collector = tcp_collector(fpm, Duration::from_millis(200));

    let started = std::time::Instant::now();
    let samples = collector.collect().await.samples;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name(), "phpfpm_up");
    assert_eq!(samples[0].value, 0.0);
}

#[tokio::test]
async fn test_missing_field_reads_as_zero() {
    let body = r#"{"pool": "www", "accepted conn": 7, "idle processes": 1}"#;
    let fpm = spawn_tcp_fpm(Reply::json(body)).await;
    let collector = tcp_collector(fpm, Duration::from_secs(3));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 11);
    let slow = samples
        .iter()
        .find(|s| s.name() == "phpfpm_slow_requests")
        .unwrap();
    assert_eq!(slow.value, 0.0);
    assert_eq!(samples[0].value, 1.0);
}

#[tokio::test]
async fn test_error_status_reports_down() {
    let fpm = spawn_tcp_fpm(Reply::Page {
        status: "404 Not Found",
        body: "File not found.\n".to_string(),
    })
    .await;
    let collector = tcp_collector(fpm, Duration::from_secs(3));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 0.0);
}

#[tokio::test]
async fn test_garbage_body_reports_down() {
    let fpm = spawn_tcp_fpm(Reply::json("pool: www")).await;
    let collector = tcp_collector(fpm, Duration::from_secs(3));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 0.0);
}

#[tokio::test]
async fn test_truncated_response_reports_down() {
    let fpm = spawn_tcp_fpm(Reply::Truncated).await;
    let collector = tcp_collector(fpm, Duration::from_secs(3));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 0.0);
    assert_eq!(collector.stats().failures, 1);
}

#[tokio::test]
async fn test_target_recovers_between_scrapes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let collector = tcp_collector(addr, Duration::from_secs(3));

    // Accept and drop the first connection, answer the second
    tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let (second, _) = listener.accept().await.unwrap();
        respond(second, Reply::json(SCENARIO_BODY)).await;
    });

    let first = collector.collect().await.samples;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].value, 0.0);

    let second = collector.collect().await.samples;
    assert_eq!(second.len(), 11);
    assert_eq!(second[0].value, 1.0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("php-fpm.sock");
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream, Reply::json(SCENARIO_BODY)));
        }
    });

    let target = Target::new(
        TransportKind::Unix,
        socket_path.to_string_lossy(),
        "/fpm_status",
        Duration::from_secs(3),
    )
    .unwrap();
    let collector = Arc::new(MetricCollector::new("phpfpm", target));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 11);
    assert_eq!(samples[0].value, 1.0);
    assert_eq!(
        samples
            .iter()
            .find(|s| s.name() == "phpfpm_total_processes")
            .map(|s| s.value),
        Some(5.0)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_unix_socket_reports_down() {
    let dir = tempfile::tempdir().unwrap();
    let target = Target::new(
        TransportKind::Unix,
        dir.path().join("absent.sock").to_string_lossy(),
        "/fpm_status",
        Duration::from_secs(1),
    )
    .unwrap();
    let collector = Arc::new(MetricCollector::new("phpfpm", target));

    let samples = collector.collect().await.samples;

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 0.0);
}
