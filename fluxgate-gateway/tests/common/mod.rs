#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use fluxgate_core::prelude::*;
use fluxgate_gateway::prelude::*;

pub enum ServerCmd {
    Send(String),
    Close,
}

/// In-process WebSocket endpoint standing in for a venue. Accepts one
/// connection at a time, records every text frame it receives and lets the
/// test inject frames or close the live socket.
pub struct VenueServer {
    pub url: String,
    frames: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>>,
}

impl VenueServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let frames: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let current: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>> = Arc::new(Mutex::new(None));

        {
            let frames = frames.clone();
            let connections = connections.clone();
            let current = current.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let (mut sink, mut reader) = ws.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<ServerCmd>();
                    *current.lock() = Some(tx);
                    loop {
                        tokio::select! {
                            cmd = rx.recv() => match cmd {
                                Some(ServerCmd::Send(frame)) => {
                                    let _ = sink.send(Message::text(frame)).await;
                                }
                                Some(ServerCmd::Close) => {
                                    let _ = sink.close().await;
                                }
                                None => break,
                            },
                            frame = reader.next() => match frame {
                                Some(Ok(Message::Text(text))) => frames.lock().push(text.to_string()),
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(_)) => break,
                            },
                        }
                    }
                }
            });
        }

        Self {
            url,
            frames,
            connections,
            current,
        }
    }

    /// Sends a frame to the currently connected client.
    pub fn inject(&self, frame: &str) {
        self.current
            .lock()
            .as_ref()
            .expect("no live connection")
            .send(ServerCmd::Send(frame.to_string()))
            .unwrap();
    }

    /// Closes the currently connected client socket server-side.
    pub fn close_current(&self) {
        self.current
            .lock()
            .as_ref()
            .expect("no live connection")
            .send(ServerCmd::Close)
            .unwrap();
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_frames(&self, n: usize) {
        let frames = self.frames.clone();
        wait_for("upstream frames", move || frames.lock().len() >= n).await;
    }

    pub async fn wait_for_connections(&self, n: usize) {
        let connections = self.connections.clone();
        wait_for("upstream connections", move || connections.load(Ordering::SeqCst) >= n).await;
    }
}

/// Polls `condition` for up to five seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn records(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) {
        self.published.lock().push((topic.to_string(), payload));
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub messages: Mutex<Vec<(String, String)>>,
    pub reconnects: Mutex<Vec<String>>,
}

#[async_trait]
impl StreamHandler for RecordingHandler {
    async fn on_message(&self, connection_id: &str, frame: &str) {
        self.messages.lock().push((connection_id.to_string(), frame.to_string()));
    }

    async fn on_reconnect(&self, connection_id: &str) {
        self.reconnects.lock().push(connection_id.to_string());
    }
}
