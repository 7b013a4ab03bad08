//! The accept loop: sockets in, sessions out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hooks::{CommandFilter, EventSink, NoFilter, NullEvents};
use crate::lookup::Lookup;
use crate::registry::{self, ServerState};
use crate::session::{self, Session};

/// How long a client gets to send its protocol version byte.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A bound, not yet running server.
pub struct Server<L: Lookup> {
    listener: TcpListener,
    state: Arc<ServerState<L>>,
    lost_rx: tokio::sync::mpsc::UnboundedReceiver<uuid::Uuid>,
}

impl<L: Lookup> Server<L> {
    /// Binds with the default (no-op) filter and event sink.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        lookup: L,
    ) -> Result<Self, ServerError> {
        Self::bind_with_hooks(addr, config, lookup, Arc::new(NoFilter), Arc::new(NullEvents)).await
    }

    pub async fn bind_with_hooks(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        lookup: L,
        filter: Arc<dyn CommandFilter>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let (state, lost_rx) = ServerState::new(config, lookup, filter, events);
        Ok(Self {
            listener,
            state,
            lost_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared state handle, mainly for embedding and tests.
    pub fn state(&self) -> Arc<ServerState<L>> {
        Arc::clone(&self.state)
    }

    /// Accepts connections until the process ends.
    ///
    /// Spawns the reaper, then three tasks per accepted connection.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            state,
            lost_rx,
        } = self;
        tracing::info!(addr = %listener.local_addr()?, "server running");
        tokio::spawn(registry::reap_loop(Arc::clone(&state), lost_rx));

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = accept_connection(state, stream, addr).await {
                            tracing::debug!(%addr, error = %e, "connection not established");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Performs the version-byte handshake and starts the session tasks.
async fn accept_connection<L: Lookup>(
    state: Arc<ServerState<L>>,
    mut stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;

    // The server sends nothing until this byte arrives.
    let mut version = [0u8; 1];
    timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut version))
        .await
        .map_err(|_| ServerError::HandshakeTimeout)??;
    let version = version[0];

    let (session, queue_rx) = Session::new(version, addr, state.lost_sender());
    tracing::info!(session_id = %session.id, %addr, version, "connection accepted");
    state
        .sessions
        .write()
        .await
        .insert(session.id, Arc::clone(&session));

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(session::write_loop(Arc::clone(&session), queue_rx, write_half));
    tokio::spawn(session::heartbeat_loop(Arc::clone(&session)));
    tokio::spawn(session::read_loop(state, session, read_half));
    Ok(())
}
