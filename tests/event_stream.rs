//! Live websocket tests for `EventStream` against a local server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use robomania::BotError;
use robomania::config::StreamConfig;
use robomania::events::OutboundFrame;
use robomania::stream::{ConnectionStatus, EventStream, FrameHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

const FRAME: &str = r#"{"type":"announcement.announce","announcement":{"id":1,"title":"t","content":"c"}}"#;

#[derive(Default)]
struct Collector {
    connects: AtomicUsize,
    frames: Option<mpsc::UnboundedSender<(String, String)>>,
}

#[async_trait]
impl FrameHandler for Collector {
    async fn on_connected(&self, _channel: &str) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle_frame(&self, channel: &str, text: &str) {
        if let Some(tx) = &self.frames {
            let _ = tx.send((channel.to_owned(), text.to_owned()));
        }
    }
}

fn config(addr: SocketAddr, max_retries: u32) -> StreamConfig {
    StreamConfig {
        ws_url: format!("ws://{addr}/ws/"),
        max_retries,
        connect_timeout_secs: 5,
        ..StreamConfig::default()
    }
}

#[tokio::test]
async fn frames_flow_both_ways_with_auth_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake_rx) = oneshot::channel::<(String, Option<String>)>();
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let auth = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let _ = handshake_tx.send((req.uri().path().to_owned(), auth));
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        ws.send(Message::Text(FRAME.into())).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = received_tx.send(text);
            }
        }
    });

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(Collector {
        frames: Some(frames_tx),
        ..Collector::default()
    });
    let (stream, mut outbox) =
        EventStream::new(&config(addr, 15), "panel-token", "announcement").unwrap();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(stream.run(handler.clone(), cancel.clone()));

    let (path, auth) = handshake_rx.await.unwrap();
    assert_eq!(path, "/ws/announcement/");
    assert_eq!(auth.as_deref(), Some("Token panel-token"));

    let (channel, text) = frames_rx.recv().await.unwrap();
    assert_eq!(channel, "announcement");
    assert_eq!(text, FRAME);

    outbox.wait_for(ConnectionStatus::Connected).await.unwrap();
    outbox
        .send(&OutboundFrame::AnnouncementUnpin { announcement_id: 5 })
        .unwrap();
    let echoed = received_rx.recv().await.unwrap();
    let echoed: serde_json::Value = serde_json::from_str(&echoed).unwrap();
    assert_eq!(
        echoed,
        serde_json::json!({"type": "announcement.unpin", "announcement_id": 5})
    );

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(handler.connects.load(Ordering::SeqCst), 1);
    assert_eq!(outbox.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn reconnects_after_server_drop_and_notifies_each_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First session is closed right after the handshake.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let handler = Arc::new(Collector::default());
    let (stream, mut outbox) = EventStream::new(&config(addr, 15), "t", "meeting").unwrap();
    let stream = stream.with_backoff(Duration::from_millis(5), None);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(stream.run(handler.clone(), cancel.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while handler.connects.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second handshake");
    outbox.wait_for(ConnectionStatus::Connected).await.unwrap();

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (stream, outbox) = EventStream::new(&config(addr, 3), "t", "member").unwrap();
    let stream = stream.with_backoff(Duration::from_millis(1), None);

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        stream.run(Arc::new(Collector::default()), CancellationToken::new()),
    )
    .await
    .expect("stream should stop on its own")
    .unwrap_err();

    assert!(matches!(
        err,
        BotError::MaxRetriesExceeded { ref channel, attempts: 3 } if channel == "member"
    ));
    assert_eq!(outbox.status(), ConnectionStatus::GivingUp);
    assert!(
        outbox
            .send(&OutboundFrame::TestMessage {
                message: "x".into()
            })
            .is_err()
    );
}
