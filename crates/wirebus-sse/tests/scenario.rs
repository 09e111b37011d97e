//! End-to-end: a real HTTP client subscribes, publishes a request, and reads
//! the reply that a dispatcher routes back through the bus.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use wirebus_core::{Envelope, SessionId, Transport, TransportError};
use wirebus_sse::{start, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

/// One parsed `id:/event:/data:` block.
#[derive(Debug)]
struct Frame {
    id: Option<String>,
    event: Option<String>,
    data: String,
}

struct Frames {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: String,
}

impl Frames {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            body: resp.bytes_stream().map(|c| c.map(|b| b.to_vec())).boxed(),
            buf: String::new(),
        }
    }

    async fn next(&mut self) -> Option<Frame> {
        loop {
            if let Some(pos) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..pos + 2).collect();
                let mut frame = Frame { id: None, event: None, data: String::new() };
                for line in block.lines() {
                    match line.split_once(": ") {
                        Some(("id", v)) => frame.id = Some(v.to_owned()),
                        Some(("event", v)) => frame.event = Some(v.to_owned()),
                        Some(("data", v)) => frame.data.push_str(v),
                        _ => {}
                    }
                }
                if frame.event.is_some() {
                    return Some(frame);
                }
                continue;
            }
            let chunk = self.body.next().await?.ok()?;
            self.buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}

#[tokio::test]
async fn subscribe_publish_recv_send_round_trip() {
    let handle = start(ServerConfig::default()).await.unwrap();
    let bus = handle.transport();
    let base = format!("http://{}", handle.addr);

    // Subscribe and learn where to publish.
    let resp = reqwest::get(format!("{base}/sse")).await.unwrap();
    let mut frames = Frames::new(resp);
    let endpoint = timeout(WAIT, frames.next()).await.unwrap().unwrap();
    assert_eq!(endpoint.event.as_deref(), Some("endpoint"));
    let session = endpoint
        .data
        .strip_prefix("/messages?session_id=")
        .expect("endpoint carries the session id")
        .to_owned();

    // Publish a request.
    let post_url = format!("{base}{}", endpoint.data);
    let publisher = tokio::spawn(async move {
        reqwest::Client::new()
            .post(post_url)
            .body(r#"{"id":"1","method":"ping"}"#)
            .send()
            .await
            .unwrap()
            .status()
    });

    let request = timeout(WAIT, bus.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(request.id, Some("1".into()));
    assert_eq!(request.method.as_deref(), Some("ping"));
    assert_eq!(request.session_id(), Some(session.as_str()));
    assert_eq!(publisher.await.unwrap(), 204);

    // Route the reply back by session id.
    let mut reply = Envelope {
        id: Some("1".into()),
        result: Some(json!("pong")),
        ..Default::default()
    };
    reply.metadata = request.metadata.clone();
    bus.send(reply.clone()).await.unwrap();

    let message = timeout(WAIT, frames.next()).await.unwrap().unwrap();
    assert_eq!(message.id.as_deref(), Some("1"));
    assert_eq!(message.event.as_deref(), Some("message"));
    let decoded = Envelope::decode(message.data.as_bytes()).unwrap();
    assert_eq!(decoded.id, reply.id);
    assert_eq!(decoded.result, reply.result);
    assert!(decoded.metadata.is_none());

    handle.shutdown().await;

    // The session is gone for good.
    let late = reply.clone().with_session(&SessionId::from_raw(session));
    let err = bus.send(late).await.unwrap_err();
    assert!(matches!(err, TransportError::SessionNotFound(_)));
}

#[tokio::test]
async fn concurrent_publishers_all_arrive() {
    let handle = start(ServerConfig::default()).await.unwrap();
    let bus = handle.transport();
    let base = format!("http://{}", handle.addr);

    let mut posts = Vec::new();
    for i in 0..10 {
        let url = format!("{base}/messages?session_id=S{i}");
        posts.push(tokio::spawn(async move {
            reqwest::Client::new()
                .post(url)
                .body(format!(r#"{{"id":{i},"method":"ping"}}"#))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let mut seen = Vec::new();
    for _ in 0..10 {
        let env = timeout(WAIT, bus.recv()).await.unwrap().unwrap().unwrap();
        seen.push(env.session_id().unwrap().to_owned());
    }
    for post in posts {
        assert_eq!(post.await.unwrap(), 204);
    }

    seen.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();
    expected.sort();
    assert_eq!(seen, expected);

    handle.shutdown().await;
}
