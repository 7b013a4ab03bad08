//! A connected (or recently connected) player identity.
//!
//! A `User` outlives its socket: the session binding is weak and is
//! re-pointed on reconnect, while room membership stays put. The registry
//! map owns the `Arc`; rooms and sessions only hold weak or shared
//! references to it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock, Weak};

use cadenza_protocol::{ServerCommand, UserInfo};
use tokio::sync::RwLock;

use crate::lookup::{AuthInfo, Language};
use crate::room::Room;
use crate::session::Session;

pub struct User {
    pub id: i32,
    pub name: String,
    pub lang: Language,

    /// Current session, if any. Weak: the registry owns sessions.
    session: StdRwLock<Weak<Session>>,

    /// Current room, if any. Strong: membership keeps the room reachable
    /// even while every member is between sockets.
    room: RwLock<Option<Arc<Room>>>,

    /// Whether the user joined its current room as a monitor.
    pub monitor: AtomicBool,

    /// Last known in-game timestamp, stored as f32 bits. Reset to -inf
    /// when a game starts; advanced from touch-frame timestamps.
    game_time: AtomicU32,

    /// Dangle generation. Bumped on every dangle start and on rebind, so
    /// a stale grace task can tell it has been superseded.
    dangle_mark: AtomicU64,
}

impl User {
    pub fn new(info: AuthInfo) -> Arc<Self> {
        Arc::new(Self {
            id: info.id,
            name: info.name,
            lang: info.lang,
            session: StdRwLock::new(Weak::new()),
            room: RwLock::new(None),
            monitor: AtomicBool::new(false),
            game_time: AtomicU32::new(f32::NEG_INFINITY.to_bits()),
            dangle_mark: AtomicU64::new(0),
        })
    }

    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            name: self.name.clone(),
            monitor: self.monitor.load(Ordering::Relaxed),
        }
    }

    // -- session binding --------------------------------------------------

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap().upgrade()
    }

    /// Whether `session` is still this user's current session.
    pub fn session_is(&self, session: &Arc<Session>) -> bool {
        self.session()
            .is_some_and(|current| Arc::ptr_eq(&current, session))
    }

    /// Points the user at a new session and cancels any pending dangle.
    pub fn bind_session(&self, session: &Arc<Session>) {
        *self.session.write().unwrap() = Arc::downgrade(session);
        self.dangle_mark.fetch_add(1, Ordering::SeqCst);
    }

    /// Enqueues a command onto the bound session, if there is one.
    pub fn try_send(&self, command: ServerCommand) {
        if let Some(session) = self.session() {
            session.try_send(command);
        }
    }

    // -- room binding -----------------------------------------------------

    pub async fn room(&self) -> Option<Arc<Room>> {
        self.room.read().await.clone()
    }

    pub async fn set_room(&self, room: Arc<Room>) {
        *self.room.write().await = Some(room);
    }

    pub async fn clear_room(&self) {
        *self.room.write().await = None;
        self.monitor.store(false, Ordering::Relaxed);
    }

    // -- game time --------------------------------------------------------

    pub fn game_time(&self) -> f32 {
        f32::from_bits(self.game_time.load(Ordering::Relaxed))
    }

    pub fn set_game_time(&self, time: f32) {
        self.game_time.store(time.to_bits(), Ordering::Relaxed);
    }

    pub fn reset_game_time(&self) {
        self.set_game_time(f32::NEG_INFINITY);
    }

    // -- dangle -----------------------------------------------------------

    /// Starts a dangle window, returning the mark the grace task must
    /// present to reap this user.
    pub fn begin_dangle(&self) -> u64 {
        self.dangle_mark.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a grace task holding `mark` is still authoritative: nothing
    /// superseded it and no session rebound meanwhile.
    pub fn dangle_expired(&self, mark: u64) -> bool {
        self.dangle_mark.load(Ordering::SeqCst) == mark && self.session().is_none()
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
