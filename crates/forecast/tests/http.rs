#![forbid(unsafe_code)]

use carbonfeed_core::resolve;
use carbonfeed_forecast::{ForecastClient, ForecastError, HttpForecastClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one canned HTTP response on loopback; returns the base URL and the captured request line.
async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 { break; }
            buf.extend_from_slice(&chunk[..n]);
        }
        let resp = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        sock.write_all(resp.as_bytes()).await.unwrap();
        sock.shutdown().await.ok();
        String::from_utf8_lossy(&buf).lines().next().unwrap_or("").to_string()
    });
    (format!("http://{}", addr), handle)
}

fn client() -> HttpForecastClient {
    HttpForecastClient::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

#[tokio::test]
async fn fetches_and_decodes_points() {
    let body = r#"[{"time":"2023-01-01T00:00:00Z","duration":"00:30:00","rating":120},{"time":"2023-01-01T00:30:00Z","duration":"00:30:00","rating":0}]"#;
    let (base, server) = serve_once("200 OK", body).await;
    let loc = resolve("FR").unwrap();
    let points = client().fetch(&loc, &format!("{}/forecast?location={{}}", base)).await.unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].rating, 120.0);
    let request_line = server.await.unwrap();
    assert_eq!(request_line, "GET /forecast?location=FR HTTP/1.1");
}

#[tokio::test]
async fn non_success_status_is_fetch_failure() {
    let (base, _server) = serve_once("503 Service Unavailable", "{}").await;
    let loc = resolve("DE").unwrap();
    let err = client().fetch(&loc, &format!("{}/f/{{}}", base)).await.unwrap_err();
    assert!(matches!(err, ForecastError::Status { status: 503, .. }), "err={}", err);
}

#[tokio::test]
async fn undecodable_body_is_parse_failure() {
    let (base, _server) = serve_once("200 OK", r#"{"forecast": []}"#).await;
    let loc = resolve("DE").unwrap();
    let err = client().fetch(&loc, &format!("{}/f/{{}}", base)).await.unwrap_err();
    assert!(matches!(err, ForecastError::Parse { .. }), "err={}", err);
}

#[tokio::test]
async fn bad_template_fails_before_any_request() {
    let loc = resolve("DE").unwrap();
    let err = client().fetch(&loc, "http://127.0.0.1:9/no-placeholder").await.unwrap_err();
    assert!(matches!(err, ForecastError::Template { found: 0, .. }));
}
