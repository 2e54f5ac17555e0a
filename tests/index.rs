//! Index resolver tests against a local HTTP fixture server

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use storyrun::common::Error;
use storyrun::index::IndexResolver;

/// Serve one canned HTTP response per connection, returning the base URL
async fn serve(status_line: &'static str, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/index.json", addr)
}

#[tokio::test]
async fn resolves_entries_in_document_order() {
    let url = serve(
        "HTTP/1.1 200 OK",
        r#"{
            "v": 5,
            "entries": {
                "intro--docs": {
                    "type": "docs", "id": "intro--docs", "name": "Docs",
                    "title": "Intro", "importPath": "./src/Intro.mdx",
                    "tags": ["docs"]
                },
                "button--one": {
                    "type": "story", "id": "button--one", "name": "One",
                    "title": "Button", "importPath": "./src/Button.stories.tsx",
                    "tags": ["test"]
                },
                "card--basic": {
                    "type": "story", "id": "card--basic", "name": "Basic",
                    "title": "Card", "importPath": "./src/Card.stories.tsx",
                    "tags": ["test"]
                }
            }
        }"#
        .to_string(),
    )
    .await;

    let index = IndexResolver::new().resolve(&url).await.unwrap();
    assert_eq!(index.v, 5);
    let ids: Vec<_> = index.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["intro--docs", "button--one", "card--basic"]);

    let eligible: Vec<_> = index.test_entries().map(|e| e.id.as_str()).collect();
    assert_eq!(eligible, vec!["button--one", "card--basic"]);
}

#[tokio::test]
async fn http_error_status_is_an_index_fetch_error() {
    let url = serve("HTTP/1.1 404 Not Found", String::new()).await;

    let result = IndexResolver::new().resolve(&url).await;
    assert!(matches!(result, Err(Error::IndexFetch { .. })));
}

#[tokio::test]
async fn malformed_document_is_an_index_fetch_error() {
    let url = serve("HTTP/1.1 200 OK", "{\"v\": 5".to_string()).await;

    let result = IndexResolver::new().resolve(&url).await;
    assert!(matches!(result, Err(Error::IndexFetch { .. })));
}

#[tokio::test]
async fn unreachable_host_is_an_index_fetch_error() {
    let result = IndexResolver::new()
        .resolve("http://127.0.0.1:1/index.json")
        .await;
    assert!(matches!(result, Err(Error::IndexFetch { .. })));
}
