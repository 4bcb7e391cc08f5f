//! Live-channel plumbing: dialing one connection per stream target and the
//! loopback dialer used by tests and demos.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ex_core::{RawMessage, StreamTarget};

const CHANNEL_CAPACITY: usize = 64;

/// Opens live connections. The engine owns which targets to dial and when
/// to tear the connections down; the dialer only produces them.
#[async_trait]
pub trait ChannelDialer: Send + Sync {
    async fn dial(&self, target: &StreamTarget) -> anyhow::Result<LiveConnection>;
}

/// Receiving half of one live connection.
pub struct LiveConnection {
    messages: mpsc::Receiver<RawMessage>,
    closed: CancellationToken,
}

impl LiveConnection {
    /// Creates a connected sender/receiver pair.
    pub fn pair() -> (LiveSender, LiveConnection) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let closed = CancellationToken::new();
        (
            LiveSender {
                tx,
                closed: closed.clone(),
            },
            LiveConnection {
                messages: rx,
                closed,
            },
        )
    }

    /// Next message, or `None` once the connection is closed from either
    /// side.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        tokio::select! {
            _ = self.closed.cancelled() => None,
            message = self.messages.recv() => message,
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Sending half of one live connection.
#[derive(Clone)]
pub struct LiveSender {
    tx: mpsc::Sender<RawMessage>,
    closed: CancellationToken,
}

impl LiveSender {
    /// Delivers one message; false once the receiver closed or went away.
    pub async fn send(&self, message: RawMessage) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.tx.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Dialer that hands the sending half back to the caller, keyed by dial
/// order. Stands in for a real socket layer in tests and demos.
pub struct LoopbackDialer {
    connections: Mutex<Vec<(StreamTarget, LiveSender)>>,
}

impl LoopbackDialer {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    /// All senders handed out so far, in dial order.
    pub fn connections(&self) -> Vec<(StreamTarget, LiveSender)> {
        self.connections.lock().clone()
    }

    /// The most recent sender dialed for `key`.
    pub fn last_sender_for(&self, key: &str) -> Option<LiveSender> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|(target, _)| target.key == key)
            .map(|(_, sender)| sender.clone())
    }
}

impl Default for LoopbackDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelDialer for LoopbackDialer {
    async fn dial(&self, target: &StreamTarget) -> anyhow::Result<LiveConnection> {
        let (sender, connection) = LiveConnection::pair();
        self.connections.lock().push((target.clone(), sender));
        Ok(connection)
    }
}
