//! One TCP connection: identity, send queue, and the three task loops.
//!
//! Every accepted socket gets a `Session` plus three tasks — reader,
//! writer, heartbeat — that coordinate only through `last_recv`, the send
//! queue, and the `alive` flag. Any of the three can signal the
//! lost-connection channel; the reaper then removes the session from the
//! registry exactly once and calls [`Session::stop`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use cadenza_protocol::{from_bytes, read_frame, write_message, ClientCommand, ServerCommand};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use crate::handler;
use crate::lookup::Lookup;
use crate::queue::{CommandReceiver, SendQueue};
use crate::registry::ServerState;
use crate::user::User;

/// How long the writer waits on the queue before re-checking liveness.
pub const QUEUE_POLL: Duration = Duration::from_millis(100);
/// Heartbeat task period.
pub const HEARTBEAT_TICK: Duration = Duration::from_secs(1);
/// How often an unsolicited `Pong` keeps the connection warm.
pub const PONG_INTERVAL: Duration = Duration::from_secs(5);
/// Inactivity threshold after which the session is declared lost.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Session {
    pub id: Uuid,
    /// Protocol version byte the client announced right after connect.
    pub version: u8,
    pub addr: SocketAddr,
    pub created_at: Instant,

    queue: SendQueue,
    last_recv: Mutex<Instant>,
    alive: AtomicBool,
    user: RwLock<Option<Arc<User>>>,

    /// Woken by `stop()` to unblock the reader mid-read.
    stopped: Notify,
    lost: mpsc::UnboundedSender<Uuid>,
}

impl Session {
    /// Creates a session and hands back the writer's queue receiver.
    ///
    /// The caller owns spawning the loops; tests drive sessions without
    /// any socket at all.
    pub fn new(
        version: u8,
        addr: SocketAddr,
        lost: mpsc::UnboundedSender<Uuid>,
    ) -> (Arc<Self>, CommandReceiver) {
        let (queue, rx) = SendQueue::new();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            version,
            addr,
            created_at: Instant::now(),
            queue,
            last_recv: Mutex::new(Instant::now()),
            alive: AtomicBool::new(true),
            user: RwLock::new(None),
            stopped: Notify::new(),
            lost,
        });
        (session, rx)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn user(&self) -> Option<Arc<User>> {
        self.user.read().unwrap().clone()
    }

    pub fn set_user(&self, user: &Arc<User>) {
        *self.user.write().unwrap() = Some(user.clone());
    }

    /// Enqueues an outbound command; dropped silently once stopping.
    pub fn try_send(&self, command: ServerCommand) {
        self.queue.send(command);
    }

    pub fn touch(&self) {
        *self.last_recv.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_recv.lock().unwrap().elapsed()
    }

    /// Declares the connection lost and notifies the reaper. Safe to call
    /// from any of the three loops; duplicates are absorbed by the reaper.
    pub fn mark_lost(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.lost.send(self.id);
    }

    /// Idempotent shutdown: closes the send queue (the writer drains and
    /// exits), wakes the reader, and clears `alive` (the heartbeat exits
    /// on its next tick).
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.queue.close();
        self.stopped.notify_one();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Task loops
// ---------------------------------------------------------------------------

/// Reads frames, decodes them, and dispatches to the command processor.
///
/// Exits — signalling the lost-connection channel — on EOF, any I/O or
/// decode error, a protocol violation from the processor, or `stop()`.
pub async fn read_loop<L: Lookup>(
    state: Arc<ServerState<L>>,
    session: Arc<Session>,
    mut read_half: OwnedReadHalf,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut read_half) => frame,
            _ = session.stopped.notified() => {
                session.mark_lost();
                return;
            }
        };
        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!(session_id = %session.id, "peer closed the connection");
                session.mark_lost();
                return;
            }
            Err(e) => {
                tracing::debug!(session_id = %session.id, error = %e, "read failed");
                session.mark_lost();
                return;
            }
        };
        let command: ClientCommand = match from_bytes(&payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "undecodable frame");
                session.mark_lost();
                return;
            }
        };
        session.touch();
        if let Err(e) = handler::process(&state, &session, command).await {
            tracing::warn!(session_id = %session.id, error = %e, "protocol violation");
            session.mark_lost();
            return;
        }
    }
}

/// Dequeues commands and writes them as frames, one at a time.
///
/// Exits when the queue is closed and drained, or on a write error.
pub async fn write_loop(
    session: Arc<Session>,
    mut rx: CommandReceiver,
    mut write_half: OwnedWriteHalf,
) {
    loop {
        match timeout(QUEUE_POLL, rx.recv()).await {
            Ok(Some(command)) => {
                if let Err(e) = write_message(&mut write_half, &command).await {
                    tracing::debug!(session_id = %session.id, error = %e, "write failed");
                    session.mark_lost();
                    return;
                }
            }
            // Queue closed and fully drained.
            Ok(None) => return,
            // Deadline passed with nothing to send; poll again.
            Err(_) => {}
        }
    }
}

/// Keeps the connection warm and enforces the idle threshold.
pub async fn heartbeat_loop(session: Arc<Session>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_TICK);
    let mut last_pong = Instant::now();
    loop {
        ticker.tick().await;
        if !session.is_alive() {
            return;
        }
        if session.idle_for() > IDLE_TIMEOUT {
            tracing::info!(session_id = %session.id, "session idle too long");
            session.mark_lost();
            return;
        }
        if last_pong.elapsed() >= PONG_INTERVAL {
            session.try_send(ServerCommand::Pong);
            last_pong = Instant::now();
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
