//! Buffer behaviour over randomized text and across the wire.

mod common;

use common::{client_for, random_bytes, random_unicode, start_server};
use embedded_http::{Buffer, ClientOptions, ServerOptions};

#[test]
fn unicode_length_is_encoded_length() {
    for _ in 0..50 {
        let text = random_unicode(fastrand::usize(0..200));
        let buffer = Buffer::from(text.as_str());
        assert_eq!(buffer.len(), text.len());
        assert_eq!(buffer.to_utf8().unwrap(), text);
    }
}

#[test]
fn appending_preserves_both_halves() {
    let head = random_bytes(100);
    let tail = random_unicode(100);
    let mut buffer = Buffer::from(head.clone());
    buffer.append_str(&tail).append_buffer(&Buffer::from("!"));

    assert_eq!(buffer.len(), head.len() + tail.len() + 1);
    assert_eq!(&buffer.as_bytes()[..100], &head[..]);
    assert_eq!(buffer.get_byte(buffer.len() - 1), Some(b'!'));
    assert_eq!(buffer.get_byte(buffer.len()), None);
}

#[tokio::test]
async fn unicode_body_survives_the_wire() {
    let server = start_server(ServerOptions::default(), |mut req| async move {
        let body = req.body_bytes().await.unwrap();
        req.response_mut().set_chunked(true);
        req.response_mut().end_with(body).await.unwrap();
    })
    .await;
    let client = client_for(&server, ClientOptions::default());

    let text = random_unicode(5000);
    let mut resp = client.put("/").unwrap().end_with(&text).await.unwrap();
    let echoed = resp.body().await.unwrap();
    assert_eq!(echoed.len(), text.len());
    assert_eq!(echoed.to_utf8().unwrap(), text);

    server.close().await;
}
