//! Form decoding: multipart uploads and url-encoded attributes.

mod common;

use common::{client_for, start_server};
use embedded_http::{ClientOptions, ServerOptions, ServerRequest};
use tokio::sync::mpsc;

const BOUNDARY: &str = "a4e41223-a527-49b6-ac1c-315d76be757e";

#[derive(Debug, Default)]
struct Decoded {
    uploads: Vec<(String, String, String, Vec<u8>)>,
    attributes: Vec<(String, String)>,
    form_offered: bool,
}

async fn decode_form(mut req: ServerRequest, expect: bool, tx: mpsc::UnboundedSender<Decoded>) {
    req.set_expect_multipart(expect);
    let mut decoded = Decoded::default();

    if let Some(mut form) = req.form().unwrap() {
        decoded.form_offered = true;
        while let Some(mut upload) = form.next_upload().await.unwrap() {
            let data = upload.buffer().await.unwrap();
            decoded.uploads.push((
                upload.name().to_string(),
                upload.filename().to_string(),
                upload.content_type().to_string(),
                data.as_bytes().to_vec(),
            ));
        }
        decoded.attributes = form.finish().await.unwrap();
    }

    req.response_mut().end().await.unwrap();
    let _ = tx.send(decoded);
}

fn multipart_body(parts: &[(&str, Option<(&str, &str)>, &str)]) -> String {
    let mut body = String::new();
    for (name, file, content) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match file {
            Some((filename, content_type)) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n",
                name, filename, content_type
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                name
            )),
        }
        body.push_str("\r\n");
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

async fn post_form(content_type: &str, body: String, expect: bool, chunked: bool) -> Decoded {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = start_server(ServerOptions::default(), move |req| {
        decode_form(req, expect, tx.clone())
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let mut req = client.post("/form").unwrap();
    req.put_header("Content-Type", content_type);
    let resp = if chunked {
        req.set_chunked(true);
        for piece in body.as_bytes().chunks(7) {
            req.write(piece).await.unwrap();
        }
        req.end().await.unwrap()
    } else {
        req.end_with(body).await.unwrap()
    };
    assert_eq!(resp.status_code(), 200);

    let decoded = rx.recv().await.unwrap();
    server.close().await;
    decoded
}

#[tokio::test]
async fn multipart_upload_is_streamed_to_handler() {
    let body = multipart_body(&[("file", Some(("tmp-0.txt", "image/gif")), "Vert.x rocks!")]);
    let decoded = post_form(
        &format!("multipart/form-data; boundary={}", BOUNDARY),
        body,
        true,
        false,
    )
    .await;

    assert!(decoded.form_offered);
    assert_eq!(
        decoded.uploads,
        vec![(
            "file".to_string(),
            "tmp-0.txt".to_string(),
            "image/gif".to_string(),
            b"Vert.x rocks!".to_vec()
        )]
    );
    assert!(decoded.attributes.is_empty());
}

#[tokio::test]
async fn multipart_survives_small_chunks() {
    let body = multipart_body(&[
        ("title", None, "holiday"),
        ("file", Some(("photo.png", "image/png")), "not\r\n--really a boundary"),
        ("tag", None, "sea"),
    ]);
    let decoded = post_form(
        &format!("multipart/form-data; boundary=\"{}\"", BOUNDARY),
        body,
        true,
        true,
    )
    .await;

    assert_eq!(decoded.uploads.len(), 1);
    assert_eq!(decoded.uploads[0].1, "photo.png");
    assert_eq!(decoded.uploads[0].3, b"not\r\n--really a boundary".to_vec());
    assert_eq!(
        decoded.attributes,
        vec![
            ("title".to_string(), "holiday".to_string()),
            ("tag".to_string(), "sea".to_string())
        ]
    );
}

#[tokio::test]
async fn url_encoded_form_fills_attributes() {
    let decoded = post_form(
        "application/x-www-form-urlencoded",
        "framework=vertx&runson=jvm".to_string(),
        true,
        false,
    )
    .await;

    assert!(decoded.uploads.is_empty());
    assert_eq!(
        decoded.attributes,
        vec![
            ("framework".to_string(), "vertx".to_string()),
            ("runson".to_string(), "jvm".to_string())
        ]
    );
}

#[tokio::test]
async fn form_is_not_decoded_unless_requested() {
    let decoded = post_form(
        "application/x-www-form-urlencoded",
        "framework=vertx".to_string(),
        false,
        false,
    )
    .await;

    assert!(!decoded.form_offered);
    assert!(decoded.attributes.is_empty());
}
