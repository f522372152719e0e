use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use time::UtcDateTime;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::GatewayError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Receiver half of the connection manager callbacks. One implementation per
/// venue; registered before the manager starts.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Called for every inbound text frame, in arrival order per connection.
    async fn on_message(&self, connection_id: &str, frame: &str);

    /// Called after a connection has been replaced by a fresh socket, so the
    /// handler can re-send its subscriptions.
    async fn on_reconnect(&self, connection_id: &str);
}

/// Snapshot of a live connection for introspection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub uri: String,
    pub created_at: UtcDateTime,
}

/// Tagged mutation of the connection table. Every request travels the single
/// update queue; requests that have a caller waiting carry a completion
/// channel.
enum Update {
    Add {
        connection_id: String,
        uri: String,
        ready: oneshot::Sender<Result<(), GatewayError>>,
    },
    Remove {
        connection_id: String,
    },
    Reconnect {
        connection_id: String,
    },
    Send {
        connection_id: String,
        payload: String,
        sent: oneshot::Sender<Result<(), GatewayError>>,
    },
}

/// A live upstream socket. `closed` is shared with the receive loop of this
/// particular socket; a replaced or removed socket sees it flip before the
/// socket itself is closed.
struct Connection {
    writer: WsSink,
    uri: String,
    closed: Arc<AtomicBool>,
}

struct ProcessorCtx {
    info: Arc<DashMap<String, ConnectionInfo>>,
    message_tx: mpsc::UnboundedSender<(String, String)>,
    update_tx: mpsc::UnboundedSender<Update>,
    handler: Arc<dyn StreamHandler>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Owner of all upstream WebSocket connections for one venue gateway.
///
/// All mutations of the connection table are serialized through one update
/// processor task, so the table itself needs no lock. Inbound frames from
/// every connection funnel into one message queue drained by a single
/// message processor, preserving per-connection arrival order. Callers of
/// [`add`](Self::add) and [`send`](Self::send) block on a per-request
/// completion; a per-connection submission lock keeps concurrent requests
/// for the same connection in FIFO order on the queue.
pub struct ConnectionManager {
    update_tx: mpsc::UnboundedSender<Update>,
    update_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Update>>>,
    info: Arc<DashMap<String, ConnectionInfo>>,
    submission_locks: DashMap<String, Arc<Mutex<()>>>,
    handler: parking_lot::RwLock<Option<Arc<dyn StreamHandler>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Self {
            update_tx,
            update_rx: parking_lot::Mutex::new(Some(update_rx)),
            info: Arc::new(DashMap::new()),
            submission_locks: DashMap::new(),
            handler: parking_lot::RwLock::new(None),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers the venue handler. Must happen before [`start`](Self::start).
    pub fn set_handler(&self, handler: Arc<dyn StreamHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Spawns the update processor and the message processor.
    pub fn start(&self) -> Result<(), GatewayError> {
        let handler = self.handler.read().clone().ok_or(GatewayError::HandlerNotSet)?;
        let update_rx = self.update_rx.lock().take().ok_or(GatewayError::AlreadyStarted)?;

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(ProcessorCtx {
            info: self.info.clone(),
            message_tx,
            update_tx: self.update_tx.clone(),
            handler: handler.clone(),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown.clone(),
        });

        self.tracker.spawn(Self::update_processor(update_rx, ctx));
        self.tracker
            .spawn(Self::message_processor(message_rx, handler, self.shutdown.clone()));
        info!("connection manager started");
        Ok(())
    }

    /// Opens a new connection and completes once the handshake has finished
    /// or failed. Adding an id that is already live is a no-op.
    pub async fn add(&self, uri: &str, connection_id: &str) -> Result<(), GatewayError> {
        let lock = self.submission_lock(connection_id);
        let _guard = lock.lock().await;
        let (ready_tx, ready_rx) = oneshot::channel();
        self.update_tx
            .send(Update::Add {
                connection_id: connection_id.to_string(),
                uri: uri.to_string(),
                ready: ready_tx,
            })
            .map_err(|_| GatewayError::NotRunning)?;
        ready_rx.await.map_err(|_| GatewayError::NotRunning)?
    }

    /// Queues removal of a connection. The socket is closed asynchronously.
    pub async fn remove(&self, connection_id: &str) -> Result<(), GatewayError> {
        let lock = self.submission_lock(connection_id);
        let _guard = lock.lock().await;
        self.update_tx
            .send(Update::Remove {
                connection_id: connection_id.to_string(),
            })
            .map_err(|_| GatewayError::NotRunning)
    }

    /// Queues replacement of a connection's socket with a fresh one to the
    /// same URI.
    pub async fn reconnect(&self, connection_id: &str) -> Result<(), GatewayError> {
        let lock = self.submission_lock(connection_id);
        let _guard = lock.lock().await;
        self.update_tx
            .send(Update::Reconnect {
                connection_id: connection_id.to_string(),
            })
            .map_err(|_| GatewayError::NotRunning)
    }

    /// Sends a text frame and completes once it was handed to the socket or
    /// failed. A failed send also removes the connection.
    pub async fn send(&self, connection_id: &str, payload: String) -> Result<(), GatewayError> {
        let lock = self.submission_lock(connection_id);
        let _guard = lock.lock().await;
        let (sent_tx, sent_rx) = oneshot::channel();
        self.update_tx
            .send(Update::Send {
                connection_id: connection_id.to_string(),
                payload,
                sent: sent_tx,
            })
            .map_err(|_| GatewayError::NotRunning)?;
        sent_rx.await.map_err(|_| GatewayError::NotRunning)?
    }

    pub fn has_connection(&self, connection_id: &str) -> bool {
        self.info.contains_key(connection_id)
    }

    /// Uri and creation time of every live connection.
    pub fn connection_info(&self) -> HashMap<String, ConnectionInfo> {
        self.info
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Stops both processors, drains the queues, waits for every tracked
    /// task and closes all remaining sockets.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("connection manager closed");
    }

    fn submission_lock(&self, connection_id: &str) -> Arc<Mutex<()>> {
        self.submission_locks
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -- update processor ---------------------------------------------------

    /// Sole mutator of the connection table.
    async fn update_processor(mut update_rx: mpsc::UnboundedReceiver<Update>, ctx: Arc<ProcessorCtx>) {
        let mut table: HashMap<String, Connection> = HashMap::new();

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                update = update_rx.recv() => match update {
                    Some(update) => Self::process_update(&mut table, &ctx, update).await,
                    None => break,
                },
            }
        }

        // Drop whatever is still queued; waiting callers observe NotRunning.
        update_rx.close();
        while update_rx.try_recv().is_ok() {}

        for (connection_id, connection) in table.drain() {
            connection.closed.store(true, Ordering::SeqCst);
            let mut writer = connection.writer;
            if let Err(e) = writer.close().await {
                debug!(connection_id, "error closing socket on shutdown: {}", e);
            }
        }
        ctx.info.clear();
    }

    async fn process_update(table: &mut HashMap<String, Connection>, ctx: &Arc<ProcessorCtx>, update: Update) {
        match update {
            Update::Add {
                connection_id,
                uri,
                ready,
            } => Self::handle_add(table, ctx, connection_id, uri, ready).await,
            Update::Remove { connection_id } => Self::handle_remove(table, ctx, &connection_id),
            Update::Reconnect { connection_id } => Self::handle_reconnect(table, ctx, connection_id).await,
            Update::Send {
                connection_id,
                payload,
                sent,
            } => Self::handle_send(table, ctx, &connection_id, payload, sent).await,
        }
    }

    async fn handle_add(
        table: &mut HashMap<String, Connection>,
        ctx: &Arc<ProcessorCtx>,
        connection_id: String,
        uri: String,
        ready: oneshot::Sender<Result<(), GatewayError>>,
    ) {
        if let Some(existing) = table.get(&connection_id) {
            if !existing.closed.load(Ordering::SeqCst) {
                debug!(connection_id, "connection already live");
                let _ = ready.send(Ok(()));
                return;
            }
        }

        info!(connection_id, uri, "connecting");
        match connect_async(uri.as_str()).await {
            Ok((ws, _)) => {
                let (writer, reader) = ws.split();
                let closed = Arc::new(AtomicBool::new(false));
                table.insert(
                    connection_id.clone(),
                    Connection {
                        writer,
                        uri: uri.clone(),
                        closed: closed.clone(),
                    },
                );
                ctx.info.insert(
                    connection_id.clone(),
                    ConnectionInfo {
                        uri,
                        created_at: UtcDateTime::now(),
                    },
                );
                Self::spawn_receive_loop(ctx, connection_id.clone(), reader, closed);
                info!(connection_id, "connected");
                let _ = ready.send(Ok(()));
            }
            Err(e) => {
                error!(connection_id, "connect failed: {}", e);
                let _ = ready.send(Err(e.into()));
            }
        }
    }

    fn handle_remove(table: &mut HashMap<String, Connection>, ctx: &Arc<ProcessorCtx>, connection_id: &str) {
        let Some(connection) = table.remove(connection_id) else {
            return;
        };
        ctx.info.remove(connection_id);
        connection.closed.store(true, Ordering::SeqCst);
        let mut writer = connection.writer;
        let id = connection_id.to_string();
        ctx.tracker.spawn(async move {
            if let Err(e) = writer.close().await {
                debug!(connection_id = id, "error closing socket: {}", e);
            }
        });
        info!(connection_id, "removed connection");
    }

    async fn handle_reconnect(table: &mut HashMap<String, Connection>, ctx: &Arc<ProcessorCtx>, connection_id: String) {
        let Some(uri) = table.get(&connection_id).map(|c| c.uri.clone()) else {
            warn!(connection_id, "reconnect requested for unknown connection");
            return;
        };

        info!(connection_id, uri, "reconnecting");
        match connect_async(uri.as_str()).await {
            Ok((ws, _)) => {
                let (writer, reader) = ws.split();
                let closed = Arc::new(AtomicBool::new(false));
                let old = table.insert(
                    connection_id.clone(),
                    Connection {
                        writer,
                        uri: uri.clone(),
                        closed: closed.clone(),
                    },
                );
                ctx.info.insert(
                    connection_id.clone(),
                    ConnectionInfo {
                        uri,
                        created_at: UtcDateTime::now(),
                    },
                );
                if let Some(old) = old {
                    old.closed.store(true, Ordering::SeqCst);
                    let mut writer = old.writer;
                    ctx.tracker.spawn(async move {
                        let _ = writer.close().await;
                    });
                }
                Self::spawn_receive_loop(ctx, connection_id.clone(), reader, closed);

                // The handler re-sends its subscriptions through the update
                // queue, so it must not run inside the processor itself.
                let handler = ctx.handler.clone();
                let id = connection_id.clone();
                ctx.tracker.spawn(async move {
                    handler.on_reconnect(&id).await;
                });
                info!(connection_id, "reconnected");
            }
            Err(e) => {
                error!(connection_id, "reconnect failed: {}", e);
                // Drop the dead entry so the next subscribe re-establishes it.
                Self::handle_remove(table, ctx, &connection_id);
            }
        }
    }

    async fn handle_send(
        table: &mut HashMap<String, Connection>,
        ctx: &Arc<ProcessorCtx>,
        connection_id: &str,
        payload: String,
        sent: oneshot::Sender<Result<(), GatewayError>>,
    ) {
        let Some(connection) = table.get_mut(connection_id) else {
            let _ = sent.send(Err(GatewayError::ConnectionNotFound(connection_id.to_string())));
            return;
        };
        if connection.closed.load(Ordering::SeqCst) {
            let _ = sent.send(Err(GatewayError::ConnectionClosed(connection_id.to_string())));
            return;
        }

        match connection.writer.send(Message::text(payload)).await {
            Ok(()) => {
                debug!(connection_id, "sent frame");
                let _ = sent.send(Ok(()));
            }
            Err(e) => {
                error!(connection_id, "send failed: {}", e);
                let _ = sent.send(Err(e.into()));
                Self::handle_remove(table, ctx, connection_id);
            }
        }
    }

    // -- receive path -------------------------------------------------------

    fn spawn_receive_loop(ctx: &Arc<ProcessorCtx>, connection_id: String, reader: WsStream, closed: Arc<AtomicBool>) {
        let message_tx = ctx.message_tx.clone();
        let update_tx = ctx.update_tx.clone();
        let shutdown = ctx.shutdown.clone();
        ctx.tracker.spawn(Self::receive_loop(
            connection_id,
            reader,
            closed,
            message_tx,
            update_tx,
            shutdown,
        ));
    }

    /// Reads one socket until it closes. A closure of a socket that is still
    /// current queues a RECONNECT; a transport error queues a REMOVE; a
    /// socket that was already replaced or removed exits silently.
    async fn receive_loop(
        connection_id: String,
        mut reader: WsStream,
        closed: Arc<AtomicBool>,
        message_tx: mpsc::UnboundedSender<(String, String)>,
        update_tx: mpsc::UnboundedSender<Update>,
        shutdown: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return,
                frame = reader.next() => frame,
            };
            if closed.load(Ordering::SeqCst) {
                return;
            }
            match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = message_tx.send((connection_id.clone(), text.to_string()));
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id, "unexpected binary frame");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(connection_id, "connection closed by peer");
                    let _ = update_tx.send(Update::Reconnect {
                        connection_id: connection_id.clone(),
                    });
                    return;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!(connection_id, "receive error: {}", e);
                    let _ = update_tx.send(Update::Remove {
                        connection_id: connection_id.clone(),
                    });
                    return;
                }
            }
        }
    }

    // -- message processor --------------------------------------------------

    /// Drains the shared message queue and hands frames to the handler, one
    /// at a time.
    async fn message_processor(
        mut message_rx: mpsc::UnboundedReceiver<(String, String)>,
        handler: Arc<dyn StreamHandler>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = message_rx.recv() => match message {
                    Some((connection_id, frame)) => handler.on_message(&connection_id, &frame).await,
                    None => break,
                },
            }
        }
    }
}
