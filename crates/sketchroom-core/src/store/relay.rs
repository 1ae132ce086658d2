//! WebSocket store client for the relay server.
//!
//! Network I/O runs on a background thread; the host thread only queues
//! commands and drains subscription channels, so it never blocks.

use super::{ChildEvent, StoreError, StoreResult, StrokeStore, Subscription};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::stroke::{Stroke, StrokeId, StrokePatch};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

#[derive(Default)]
struct Listeners {
    by_path: HashMap<String, Vec<(u64, Sender<ChildEvent>)>>,
    next_id: u64,
}

impl Listeners {
    fn add(&mut self, path: &str, tx: Sender<ChildEvent>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_path.entry(path.to_string()).or_default().push((id, tx));
        id
    }

    /// Remove a listener. Returns true if the path has no listeners left.
    fn remove(&mut self, path: &str, id: u64) -> bool {
        let Some(listeners) = self.by_path.get_mut(path) else {
            return true;
        };
        listeners.retain(|(listener_id, _)| *listener_id != id);
        if listeners.is_empty() {
            self.by_path.remove(path);
            true
        } else {
            false
        }
    }

    fn route(&mut self, path: &str, event: ChildEvent) {
        if let Some(listeners) = self.by_path.get_mut(path) {
            listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }
}

/// Store backed by a relay server over WebSocket.
pub struct RelayStore {
    cmd_tx: Sender<WsCommand>,
    listeners: Arc<Mutex<Listeners>>,
    state: Arc<Mutex<ConnectionState>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayStore {
    /// Connect to a relay server. The handshake completes in the background;
    /// commands issued meanwhile are queued.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let parsed = Url::parse(url).map_err(|e| StoreError::Other(format!("Invalid URL: {}", e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(StoreError::Other(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let listeners = Arc::new(Mutex::new(Listeners::default()));
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));

        let thread_listeners = listeners.clone();
        let thread_state = state.clone();
        let url = url.to_string();
        let handle = thread::spawn(move || run_socket(&url, cmd_rx, thread_listeners, thread_state));

        Ok(Self {
            cmd_tx,
            listeners,
            state,
            _thread: Some(handle),
        })
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.lock().map(|s| *s).unwrap_or(ConnectionState::Error)
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Close the connection. Subsequent operations fail with `Disconnected`.
    pub fn disconnect(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
        set_state(&self.state, ConnectionState::Disconnected);
    }

    fn send(&self, msg: &ClientMessage) -> StoreResult<()> {
        if matches!(self.state(), ConnectionState::Disconnected | ConnectionState::Error) {
            return Err(StoreError::Disconnected);
        }
        let json = serde_json::to_string(msg).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.cmd_tx
            .send(WsCommand::Send(json))
            .map_err(|_| StoreError::Disconnected)
    }
}

impl Drop for RelayStore {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl StrokeStore for RelayStore {
    fn create_child(&self, _path: &str) -> StrokeId {
        StrokeId::generate()
    }

    fn write(&self, path: &str, id: &StrokeId, record: &Stroke) -> StoreResult<()> {
        self.send(&ClientMessage::Write {
            path: path.to_string(),
            id: id.clone(),
            record: record.to_record(),
        })
    }

    fn patch(&self, path: &str, id: &StrokeId, patch: &StrokePatch) -> StoreResult<()> {
        self.send(&ClientMessage::Patch {
            path: path.to_string(),
            id: id.clone(),
            patch: patch.clone(),
        })
    }

    fn delete(&self, path: &str, id: &StrokeId) -> StoreResult<()> {
        self.send(&ClientMessage::Delete {
            path: path.to_string(),
            id: id.clone(),
        })
    }

    fn delete_all(&self, path: &str) -> StoreResult<()> {
        self.send(&ClientMessage::DeleteAll { path: path.to_string() })
    }

    fn subscribe_child_events(&self, path: &str) -> StoreResult<Subscription> {
        let (tx, rx) = channel();
        let listener_id = self
            .listeners
            .lock()
            .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))?
            .add(path, tx);

        // Every subscribe asks for a fresh snapshot; duplicate adds for
        // listeners already on the path are harmless upserts.
        if let Err(e) = self.send(&ClientMessage::Subscribe { path: path.to_string() }) {
            if let Ok(mut listeners) = self.listeners.lock() {
                listeners.remove(path, listener_id);
            }
            return Err(e);
        }

        let listeners = Arc::downgrade(&self.listeners);
        let cmd_tx = self.cmd_tx.clone();
        let watched = path.to_string();
        Ok(Subscription::new(path, rx, move || {
            let Some(listeners) = listeners.upgrade() else {
                return;
            };
            let last = listeners
                .lock()
                .map(|mut l| l.remove(&watched, listener_id))
                .unwrap_or(false);
            if last {
                let msg = ClientMessage::Unsubscribe { path: watched };
                if let Ok(json) = serde_json::to_string(&msg) {
                    let _ = cmd_tx.send(WsCommand::Send(json));
                }
            }
        }))
    }
}

fn set_state(state: &Mutex<ConnectionState>, value: ConnectionState) {
    if let Ok(mut state) = state.lock() {
        *state = value;
    }
}

/// At most `max_chars` leading characters of `msg`, cut on a char boundary.
fn log_prefix(msg: &str, max_chars: usize) -> &str {
    msg.char_indices().nth(max_chars).map_or(msg, |(i, _)| &msg[..i])
}

fn run_socket(
    url: &str,
    cmd_rx: Receiver<WsCommand>,
    listeners: Arc<Mutex<Listeners>>,
    state: Arc<Mutex<ConnectionState>>,
) {
    log::info!("Relay thread: connecting to {}", url);

    let (mut socket, response) = match connect(url) {
        Ok(connected) => connected,
        Err(e) => {
            log::error!("Relay connection failed: {}", e);
            set_state(&state, ConnectionState::Error);
            return;
        }
    };
    log::info!("Relay connected, status: {}", response.status());
    set_state(&state, ConnectionState::Connected);

    // A short read timeout keeps the loop responsive to outgoing commands.
    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(20)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        #[allow(unreachable_patterns)]
        _ => {
            log::debug!("TLS or other stream - using default timeout handling");
        }
    }

    loop {
        let mut closing = false;
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("Relay sending: {}", log_prefix(&msg, 100));
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("Relay send error: {}", e);
                        closing = true;
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("Relay close requested");
                    let _ = socket.close(None);
                    closing = true;
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("Relay command channel disconnected");
                    closing = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if closing {
            break;
        }

        match socket.read() {
            Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                Ok(ServerMessage::Error { message }) => {
                    log::warn!("Relay reported error: {}", message);
                }
                Ok(msg) => {
                    if let Some((path, event)) = msg.into_child_event() {
                        if let Ok(mut listeners) = listeners.lock() {
                            listeners.route(&path, event);
                        }
                    }
                }
                Err(e) => log::warn!("Failed to parse relay message: {} ({})", txt, e),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Relay sent close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("Relay read error: {}", e);
                break;
            }
        }
    }

    log::info!("Relay thread exiting");
    set_state(&state, ConnectionState::Disconnected);
}
