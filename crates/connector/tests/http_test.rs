//! Adapters against a canned local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use skyfeed_connector::{ApodAdapter, CelestrakAdapter, NvdAdapter, NvdCursor, SourceAdapter};
use skyfeed_core::IngestError;

struct Canned {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Canned {
    fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type", "application/json".into())],
            body: body.to_string(),
        }
    }

    fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }
}

/// Serve `responses` in order, one per connection. Returns the base URL and
/// the recorded request heads (lowercased).
async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();

    tokio::spawn(async move {
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            recorded
                .lock()
                .await
                .push(String::from_utf8_lossy(&head).to_lowercase());

            let mut response = format!(
                "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n",
                canned.status,
                canned.body.len()
            );
            for (name, value) in &canned.headers {
                response.push_str(&format!("{name}: {value}\r\n"));
            }
            response.push_str("\r\n");
            response.push_str(&canned.body);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}/api"), seen)
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn nasa_uses_demo_key_in_query() {
    let (url, seen) = serve(vec![Canned::json(json!([
        { "date": "2024-01-01", "title": "a" },
        { "date": "2024-01-02", "title": "b" }
    ]))])
    .await;

    let adapter = ApodAdapter::new("nasa", None, TIMEOUT).with_base_url(url);
    let page = adapter.fetch(None).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert!(page.next_cursor.is_none());
    let head = &seen.lock().await[0];
    assert!(head.contains("api_key=demo_key"), "{head}");
    assert!(head.contains("start_date="));
}

#[tokio::test]
async fn nist_sends_key_header_and_follows_cursor() {
    let cve = |id: &str| json!({ "cve": { "id": id, "lastModified": "2024-01-02T03:04:05.678" } });
    let (url, seen) = serve(vec![
        Canned::json(json!({
            "startIndex": 0, "totalResults": 3,
            "vulnerabilities": [cve("CVE-2024-0001"), cve("CVE-2024-0002")]
        })),
        Canned::json(json!({
            "startIndex": 2, "totalResults": 3,
            "vulnerabilities": [cve("CVE-2024-0003")]
        })),
    ])
    .await;

    let adapter = NvdAdapter::new("nist", Some("secret-key".into()), TIMEOUT)
        .with_base_url(url)
        .with_page_size(2);

    let first = adapter.fetch(None).await.unwrap();
    let cursor = NvdCursor::parse(first.next_cursor.as_deref().unwrap()).unwrap();
    assert_eq!(cursor.start_index, 2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = adapter.fetch(first.next_cursor.as_deref()).await.unwrap();
    assert!(second.next_cursor.is_none());
    assert_eq!(second.items[0].sort_key, "CVE-2024-0003");

    let heads = seen.lock().await;
    assert!(heads[0].contains("apikey: secret-key"));
    assert!(heads[0].contains("startindex=0"));
    assert!(heads[1].contains("startindex=2"));
    assert!(!heads[0].contains("api_key="));
    for param in ["lastmodstartdate", "lastmodenddate"] {
        let value = query_value(&heads[0], param);
        assert!(!value.is_empty(), "{param} missing");
        assert_eq!(query_value(&heads[1], param), value, "{param} moved between pages");
    }
}

fn query_value<'a>(head: &'a str, param: &str) -> &'a str {
    let needle = format!("{param}=");
    head.find(&needle)
        .map(|at| {
            let rest = &head[at + needle.len()..];
            let end = rest.find(|c| c == '&' || c == ' ').unwrap_or(rest.len());
            &rest[..end]
        })
        .unwrap_or("")
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let mut limited = Canned::status(429, "slow down");
    limited.headers.push(("Retry-After", "7".into()));
    let (url, _) = serve(vec![limited]).await;

    let adapter = NvdAdapter::new("nist", None, TIMEOUT).with_base_url(url);
    let err = adapter.fetch(None).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn status_classification() {
    let (url, _) = serve(vec![
        Canned::status(503, "maintenance"),
        Canned::status(404, "not found"),
    ])
    .await;
    let adapter = CelestrakAdapter::new("space", "stations", TIMEOUT).with_base_url(url);

    assert!(matches!(adapter.fetch(None).await, Err(IngestError::Transient(_))));
    assert!(matches!(adapter.fetch(None).await, Err(IngestError::Permanent(_))));
}

#[tokio::test]
async fn non_json_body_is_permanent() {
    let (url, _) = serve(vec![Canned::status(200, "No GP data found")]).await;
    let adapter = CelestrakAdapter::new("space", "nope", TIMEOUT).with_base_url(url);
    assert!(matches!(adapter.fetch(None).await, Err(IngestError::Permanent(_))));
}

#[tokio::test]
async fn unreachable_host_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let adapter = ApodAdapter::new("nasa", Some("k".into()), TIMEOUT)
        .with_base_url(format!("http://{addr}/apod"));
    assert!(matches!(adapter.fetch(None).await, Err(IngestError::Transient(_))));
}
