//! Serving files from disk, with and without a not-found fallback.

mod common;

use std::path::PathBuf;

use common::{client_for, random_unicode, start_server};
use embedded_http::{ClientOptions, Error, ServerOptions};

struct Site {
    _dir: tempfile::TempDir,
    page: PathBuf,
    fallback: PathBuf,
    missing: PathBuf,
    page_content: String,
    fallback_content: String,
}

fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("test-send-file.html");
    let fallback = dir.path().join("not-found.html");
    let page_content = random_unicode(10_000);
    let fallback_content = "<html><body>gone</body></html>".to_string();
    std::fs::write(&page, &page_content).unwrap();
    std::fs::write(&fallback, &fallback_content).unwrap();
    Site {
        missing: dir.path().join("nope.html"),
        _dir: dir,
        page,
        fallback,
        page_content,
        fallback_content,
    }
}

#[tokio::test]
async fn file_is_sent_with_content_type() {
    let site = site();
    let page = site.page.clone();
    let server = start_server(ServerOptions::default(), move |mut req| {
        let page = page.clone();
        async move {
            req.response_mut().send_file(&page).await.unwrap();
        }
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let mut resp = client.get_now("/").await.unwrap();
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.headers().get("content-type"), Some("text/html"));
    assert_eq!(
        resp.headers().get("content-length"),
        Some(site.page_content.len().to_string().as_str())
    );
    let body = resp.body().await.unwrap();
    assert_eq!(body.to_utf8().unwrap(), site.page_content);

    server.close().await;
}

#[tokio::test]
async fn missing_file_falls_back_with_404() {
    let site = site();
    let (missing, fallback) = (site.missing.clone(), site.fallback.clone());
    let server = start_server(ServerOptions::default(), move |mut req| {
        let (missing, fallback) = (missing.clone(), fallback.clone());
        async move {
            req.response_mut()
                .send_file_or(&missing, &fallback)
                .await
                .unwrap();
        }
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let mut resp = client.get_now("/nope.html").await.unwrap();
    assert_eq!(resp.status_code(), 404);
    assert_eq!(resp.headers().get("content-type"), Some("text/html"));
    let body = resp.body().await.unwrap();
    assert_eq!(body.to_utf8().unwrap(), site.fallback_content);

    server.close().await;
}

#[tokio::test]
async fn missing_file_without_fallback_reports_not_found() {
    let site = site();
    let missing = site.missing.clone();
    let server = start_server(ServerOptions::default(), move |mut req| {
        let missing = missing.clone();
        async move {
            let resp = req.response_mut();
            match resp.send_file(&missing).await {
                Err(Error::FileNotFound(path)) => {
                    assert_eq!(path, missing);
                    resp.set_status_code(404);
                    resp.end_with("no such file").await.unwrap();
                }
                other => panic!("expected FileNotFound, got {:?}", other),
            }
        }
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let mut resp = client.get_now("/nope.html").await.unwrap();
    assert_eq!(resp.status_code(), 404);
    assert_eq!(resp.body().await.unwrap().to_utf8().unwrap(), "no such file");

    server.close().await;
}

#[tokio::test]
async fn head_request_gets_file_headers_only() {
    let site = site();
    let page = site.page.clone();
    let server = start_server(ServerOptions::default(), move |mut req| {
        let page = page.clone();
        async move {
            req.response_mut().send_file(&page).await.unwrap();
        }
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let mut resp = client.head("/").unwrap().end().await.unwrap();
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        resp.headers().get("content-length"),
        Some(site.page_content.len().to_string().as_str())
    );
    assert!(resp.body().await.unwrap().is_empty());

    server.close().await;
}
