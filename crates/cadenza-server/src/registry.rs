//! Server-wide registry: the session/user/room maps and the reaper.
//!
//! The three maps are the owning references for everything in the server.
//! They are guarded by independent reader/writer locks, acquired in the
//! fixed order sessions → users → rooms when an operation needs more than
//! one. Lost connections funnel through one unbounded channel into a
//! single reaper task, so removal from the session map happens exactly
//! once per connection.

use std::collections::HashMap;
use std::sync::Arc;

use cadenza_protocol::RoomId;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::ban::BanList;
use crate::config::ServerConfig;
use crate::hooks::{CommandFilter, EventSink};
use crate::lookup::Lookup;
use crate::room::Room;
use crate::session::Session;
use crate::user::User;

/// Shared state behind every session task.
pub struct ServerState<L: Lookup> {
    pub config: ServerConfig,
    pub lookup: L,
    pub bans: BanList,
    pub filter: Arc<dyn CommandFilter>,
    pub events: Arc<dyn EventSink>,

    pub sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    pub users: RwLock<HashMap<i32, Arc<User>>>,
    pub rooms: RwLock<HashMap<RoomId, Arc<Room>>>,

    lost_tx: mpsc::UnboundedSender<Uuid>,
}

impl<L: Lookup> ServerState<L> {
    /// Builds the state and hands back the reaper's receiving end of the
    /// lost-connection channel.
    pub fn new(
        config: ServerConfig,
        lookup: L,
        filter: Arc<dyn CommandFilter>,
        events: Arc<dyn EventSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Uuid>) {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            config,
            lookup,
            bans: BanList::default(),
            filter,
            events,
            sessions: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            lost_tx,
        });
        (state, lost_rx)
    }

    /// Producer handle for session loops to report lost connections on.
    pub fn lost_sender(&self) -> mpsc::UnboundedSender<Uuid> {
        self.lost_tx.clone()
    }

    /// Bans a user globally, kicks any live session, and notifies
    /// observers.
    pub async fn ban_user(&self, user_id: i32) {
        if self.bans.ban(user_id) {
            self.events.user_banned(user_id);
        }
        let user = self.users.read().await.get(&user_id).cloned();
        if let Some(session) = user.and_then(|u| u.session()) {
            tracing::info!(user_id, "kicking banned user");
            session.mark_lost();
        }
    }

    pub fn unban_user(&self, user_id: i32) {
        if self.bans.unban(user_id) {
            self.events.user_unbanned(user_id);
        }
    }
}

/// Runs the leave protocol for a user and tears the room down when it
/// ends up memberless.
pub async fn leave_room<L: Lookup>(state: &Arc<ServerState<L>>, user: &Arc<User>, room: &Arc<Room>) {
    let destroy = room.on_user_leave(user).await;
    user.clear_room().await;
    state.events.user_left_room(user.id, &room.id);
    if destroy {
        state.rooms.write().await.remove(&room.id);
        state.bans.forget_room(&room.id);
        state.events.room_destroyed(&room.id);
    }
}

/// Drains the lost-connection channel.
///
/// For each reported id: remove the session from the map (first signal
/// wins, duplicates fall through), stop it outside the lock, and start the
/// user's dangle window — but only when the user's weak session binding
/// still points at the session being reaped, so a reconnect that already
/// swapped the binding is left alone.
pub async fn reap_loop<L: Lookup>(
    state: Arc<ServerState<L>>,
    mut lost_rx: mpsc::UnboundedReceiver<Uuid>,
) {
    while let Some(id) = lost_rx.recv().await {
        let session = state.sessions.write().await.remove(&id);
        let Some(session) = session else {
            continue;
        };
        tracing::info!(session_id = %id, addr = %session.addr, "reaping lost connection");
        session.stop();
        if let Some(user) = session.user() {
            if user.session_is(&session) {
                dangle(&state, user);
            }
        }
    }
}

/// Starts a user's dangle window.
///
/// After the grace period, if no new session has rebound meanwhile, the
/// user leaves its room via the normal leave protocol and is removed from
/// the registry.
pub fn dangle<L: Lookup>(state: &Arc<ServerState<L>>, user: Arc<User>) {
    let mark = user.begin_dangle();
    let grace = state.config.dangle_grace();
    tracing::info!(user_id = user.id, grace_secs = grace.as_secs(), "user dangling");
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if user.dangle_expired(mark) {
            expire_user(&state, &user).await;
        }
    });
}

async fn expire_user<L: Lookup>(state: &Arc<ServerState<L>>, user: &Arc<User>) {
    tracing::info!(user_id = user.id, "dangle grace elapsed, removing user");
    if let Some(room) = user.room().await {
        leave_room(state, user, &room).await;
    }
    let mut users = state.users.write().await;
    if users.get(&user.id).is_some_and(|current| Arc::ptr_eq(current, user)) {
        users.remove(&user.id);
    }
}

// =========================================================================
// Tests
// =========================================================================
