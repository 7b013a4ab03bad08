//! Per-session outbound command queue.
//!
//! A thin closable wrapper around an unbounded mpsc channel. Enqueueing
//! never blocks; after `close()` every enqueue is silently dropped, and
//! the writer's receiver drains whatever was queued and then yields
//! `None`. Callers ignore the outcome by design — a send to a dying
//! session is not an error anywhere in the server.

use std::sync::Mutex;

use cadenza_protocol::ServerCommand;
use tokio::sync::mpsc;

/// Receiver half handed to the session's writer task.
pub type CommandReceiver = mpsc::UnboundedReceiver<ServerCommand>;

/// Closable FIFO of outbound commands for one session.
#[derive(Debug)]
pub struct SendQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>,
}

impl SendQueue {
    pub fn new() -> (Self, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueues a command; a closed queue drops it silently.
    pub fn send(&self, command: ServerCommand) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(command);
        }
    }

    /// Closes the queue. Idempotent. Already-queued commands still reach
    /// the receiver before it reports the close.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }
}
