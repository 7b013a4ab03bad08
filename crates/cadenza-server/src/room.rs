//! Rooms: the container a game round happens in.
//!
//! A room tracks its host, an ordered member list (capped), an uncapped
//! monitor list, the selected chart, and a three-phase state machine:
//!
//! ```text
//! SelectChart ──RequestStart──→ WaitForReady ──all ready──→ Playing
//!      ↑                                                       │
//!      └────────────── all played or aborted ──────────────────┘
//! ```
//!
//! Member and host references are weak; the registry and sessions own the
//! users. A lookup that fails to upgrade is treated as that member having
//! departed, and lists are compacted opportunistically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cadenza_protocol::{
    ClientRoomState, JoinRoomResponse, Message, RoomId, RoomState, ServerCommand,
};
use rand::Rng;
use tokio::sync::RwLock;

use crate::user::User;

/// Member cap per room. Monitors are not counted.
pub const ROOM_MAX_USERS: usize = 8;

/// A playable chart, as resolved by the chart lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub id: i32,
    pub name: String,
}

/// One player's result for one chart, as resolved by the record lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub player: i32,
    pub chart: i32,
    pub score: i32,
    pub perfect: i32,
    pub good: i32,
    pub bad: i32,
    pub miss: i32,
    pub max_combo: i32,
    pub accuracy: f32,
    pub full_combo: bool,
    pub std_dev: f32,
    pub std_score: f32,
}

/// Why a room operation was refused. The `Display` form is the error slug
/// sent back in the failed acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("no-such-room")]
    NoSuchRoom,
    #[error("room-exists")]
    RoomExists,
    #[error("room-creation-disabled")]
    CreationDisabled,
    #[error("already-in-room")]
    AlreadyInRoom,
    #[error("not-in-room")]
    NotInRoom,
    #[error("not-host")]
    NotHost,
    #[error("locked")]
    Locked,
    #[error("room-full")]
    RoomFull,
    #[error("banned")]
    Banned,
    #[error("cannot-monitor")]
    CannotMonitor,
    #[error("bad-state")]
    BadState,
    #[error("bad-chart")]
    BadChart,
    #[error("already-ready")]
    AlreadyReady,
    #[error("not-ready")]
    NotReady,
    #[error("already-played")]
    AlreadyPlayed,
}

/// Server-side room phase, with the bookkeeping clients never see.
#[derive(Debug)]
enum InternalState {
    SelectChart,
    WaitForReady {
        started: HashSet<i32>,
    },
    Playing {
        results: HashMap<i32, Record>,
        aborted: HashSet<i32>,
    },
}

impl InternalState {
    fn to_client(&self, chart_id: Option<i32>) -> RoomState {
        match self {
            Self::SelectChart => RoomState::SelectChart(chart_id),
            Self::WaitForReady { .. } => RoomState::WaitingForReady,
            Self::Playing { .. } => RoomState::Playing,
        }
    }
}

pub struct Room {
    pub id: RoomId,

    host: RwLock<Weak<User>>,
    state: RwLock<InternalState>,

    live: AtomicBool,
    locked: AtomicBool,
    cycle: AtomicBool,

    users: RwLock<Vec<Weak<User>>>,
    monitors: RwLock<Vec<Weak<User>>>,

    chart: RwLock<Option<Chart>>,
}

impl Room {
    /// Creates a room with `host` as its first (and hosting) member.
    pub fn new(id: RoomId, host: &Arc<User>) -> Arc<Self> {
        Arc::new(Self {
            id,
            host: RwLock::new(Arc::downgrade(host)),
            state: RwLock::new(InternalState::SelectChart),
            live: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            cycle: AtomicBool::new(false),
            users: RwLock::new(vec![Arc::downgrade(host)]),
            monitors: RwLock::new(Vec::new()),
            chart: RwLock::new(None),
        })
    }

    // -- flags ------------------------------------------------------------

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Relaxed);
    }

    pub fn is_cycle(&self) -> bool {
        self.cycle.load(Ordering::Relaxed)
    }

    pub fn set_cycle(&self, cycle: bool) {
        self.cycle.store(cycle, Ordering::Relaxed);
    }

    // -- membership -------------------------------------------------------

    /// Live members, in join order.
    pub async fn users(&self) -> Vec<Arc<User>> {
        self.users
            .read()
            .await
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Live monitors, in join order.
    pub async fn monitors(&self) -> Vec<Arc<User>> {
        self.monitors
            .read()
            .await
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Adds a user to the member or monitor list.
    ///
    /// Expired references are compacted first; the member cap is enforced
    /// against what remains. Monitors are uncapped.
    pub async fn add_user(&self, user: &Arc<User>, monitor: bool) -> Result<(), RoomError> {
        if monitor {
            let mut monitors = self.monitors.write().await;
            monitors.retain(|w| w.strong_count() > 0);
            monitors.push(Arc::downgrade(user));
        } else {
            let mut users = self.users.write().await;
            users.retain(|w| w.strong_count() > 0);
            if users.len() >= ROOM_MAX_USERS {
                return Err(RoomError::RoomFull);
            }
            users.push(Arc::downgrade(user));
        }
        Ok(())
    }

    pub async fn check_host(&self, user: &User) -> bool {
        self.host
            .read()
            .await
            .upgrade()
            .is_some_and(|host| host.id == user.id)
    }

    // -- broadcasting -----------------------------------------------------

    /// Sends to every member and monitor. Departed users are skipped.
    pub async fn broadcast(&self, command: ServerCommand) {
        for user in self.users().await.into_iter().chain(self.monitors().await) {
            user.try_send(command.clone());
        }
    }

    /// Sends to monitors only.
    pub async fn broadcast_monitors(&self, command: ServerCommand) {
        for user in self.monitors().await {
            user.try_send(command.clone());
        }
    }

    /// Broadcasts a room message to members and monitors.
    pub async fn send(&self, message: Message) {
        self.broadcast(ServerCommand::Message(message)).await;
    }

    // -- snapshots --------------------------------------------------------

    /// The client-facing phase, with the chart id in the selection phase.
    pub async fn client_room_state(&self) -> RoomState {
        let chart_id = self.chart.read().await.as_ref().map(|c| c.id);
        let state = self.state.read().await;
        state.to_client(chart_id)
    }

    /// Full snapshot for `user`, as carried in a reconnect reply.
    pub async fn client_state(&self, user: &User) -> ClientRoomState {
        let state = self.client_room_state().await;
        let is_host = self.check_host(user).await;
        let is_ready = matches!(
            &*self.state.read().await,
            InternalState::WaitForReady { started } if started.contains(&user.id)
        );
        let mut users = HashMap::new();
        for member in self.users().await.into_iter().chain(self.monitors().await) {
            users.insert(member.id, member.to_info());
        }
        ClientRoomState {
            id: self.id.clone(),
            state,
            live: self.is_live(),
            locked: self.is_locked(),
            cycle: self.is_cycle(),
            is_host,
            is_ready,
            users,
        }
    }

    /// Payload of a successful join.
    pub async fn join_response(&self) -> JoinRoomResponse {
        let state = self.client_room_state().await;
        let users = self
            .users()
            .await
            .into_iter()
            .chain(self.monitors().await)
            .map(|u| u.to_info())
            .collect();
        JoinRoomResponse {
            state,
            users,
            live: self.is_live(),
        }
    }

    /// Broadcasts the current client-facing state.
    pub async fn announce_state(&self) {
        let state = self.client_room_state().await;
        self.broadcast(ServerCommand::ChangeState(state)).await;
    }

    // -- chart ------------------------------------------------------------

    pub async fn chart(&self) -> Option<Chart> {
        self.chart.read().await.clone()
    }

    /// Stores the selected chart. Only legal in the selection phase.
    pub async fn set_chart(&self, chart: Chart) -> Result<(), RoomError> {
        let state = self.state.read().await;
        if !matches!(*state, InternalState::SelectChart) {
            return Err(RoomError::BadState);
        }
        *self.chart.write().await = Some(chart);
        Ok(())
    }

    // -- state machine ----------------------------------------------------

    pub async fn is_select_chart(&self) -> bool {
        matches!(*self.state.read().await, InternalState::SelectChart)
    }

    pub async fn is_playing(&self) -> bool {
        matches!(*self.state.read().await, InternalState::Playing { .. })
    }

    /// SelectChart → WaitForReady. Requires a selected chart.
    pub async fn request_start(&self) -> Result<(), RoomError> {
        let mut state = self.state.write().await;
        if !matches!(*state, InternalState::SelectChart) {
            return Err(RoomError::BadState);
        }
        if self.chart.read().await.is_none() {
            return Err(RoomError::BadChart);
        }
        *state = InternalState::WaitForReady {
            started: HashSet::new(),
        };
        Ok(())
    }

    pub async fn mark_ready(&self, user: i32) -> Result<(), RoomError> {
        match &mut *self.state.write().await {
            InternalState::WaitForReady { started } => {
                if started.insert(user) {
                    Ok(())
                } else {
                    Err(RoomError::AlreadyReady)
                }
            }
            _ => Err(RoomError::BadState),
        }
    }

    pub async fn cancel_ready(&self, user: i32) -> Result<(), RoomError> {
        match &mut *self.state.write().await {
            InternalState::WaitForReady { started } => {
                if started.remove(&user) {
                    Ok(())
                } else {
                    Err(RoomError::NotReady)
                }
            }
            _ => Err(RoomError::BadState),
        }
    }

    pub async fn record_played(&self, user: i32, record: Record) -> Result<(), RoomError> {
        match &mut *self.state.write().await {
            InternalState::Playing { results, aborted } => {
                if results.contains_key(&user) || aborted.contains(&user) {
                    return Err(RoomError::AlreadyPlayed);
                }
                results.insert(user, record);
                Ok(())
            }
            _ => Err(RoomError::BadState),
        }
    }

    pub async fn mark_aborted(&self, user: i32) -> Result<(), RoomError> {
        match &mut *self.state.write().await {
            InternalState::Playing { results, aborted } => {
                if results.contains_key(&user) {
                    return Err(RoomError::AlreadyPlayed);
                }
                if aborted.insert(user) {
                    Ok(())
                } else {
                    Err(RoomError::BadState)
                }
            }
            _ => Err(RoomError::BadState),
        }
    }

    /// WaitForReady → Playing once every member and monitor pressed Ready.
    ///
    /// The transition happens under the state lock; the announcements go
    /// out afterwards, `StartPlaying` strictly before the state change.
    pub async fn check_all_ready(&self) {
        let members = self.users().await;
        let monitors = self.monitors().await;
        if members.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().await;
            let InternalState::WaitForReady { started } = &*state else {
                return;
            };
            let everyone_ready = members
                .iter()
                .chain(monitors.iter())
                .all(|u| started.contains(&u.id));
            if !everyone_ready {
                return;
            }
            *state = InternalState::Playing {
                results: HashMap::new(),
                aborted: HashSet::new(),
            };
        }
        tracing::info!(room_id = %self.id, players = members.len(), "game starting");
        self.send(Message::StartPlaying).await;
        for member in &members {
            member.reset_game_time();
        }
        self.announce_state().await;
    }

    /// Playing → SelectChart once every member has a result or aborted.
    ///
    /// The chart stays selected. With cycle mode on, the host role rotates
    /// one member forward before the state announcement.
    pub async fn check_all_done(&self) {
        let members = self.users().await;
        if members.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().await;
            let InternalState::Playing { results, aborted } = &*state else {
                return;
            };
            let everyone_done = members
                .iter()
                .all(|u| results.contains_key(&u.id) || aborted.contains(&u.id));
            if !everyone_done {
                return;
            }
            *state = InternalState::SelectChart;
        }
        tracing::info!(room_id = %self.id, "game ended");
        self.send(Message::GameEnd).await;
        if self.is_cycle() {
            self.rotate_host(&members).await;
        }
        self.announce_state().await;
    }

    /// Advances the host role to the member after the current host.
    async fn rotate_host(&self, members: &[Arc<User>]) {
        if members.is_empty() {
            return;
        }
        let old_host = self.host.read().await.upgrade();
        let index = old_host
            .as_ref()
            .and_then(|old| members.iter().position(|u| u.id == old.id))
            .map(|i| (i + 1) % members.len())
            .unwrap_or(0);
        let new_host = members[index].clone();
        *self.host.write().await = Arc::downgrade(&new_host);
        tracing::info!(room_id = %self.id, host = new_host.id, "host cycled");
        self.send(Message::NewHost { user: new_host.id }).await;
        if let Some(old) = old_host {
            old.try_send(ServerCommand::ChangeHost(false));
        }
        new_host.try_send(ServerCommand::ChangeHost(true));
    }

    // -- leaving ----------------------------------------------------------

    /// Runs the leave protocol for `user`. Returns `true` when the room is
    /// now memberless and must be destroyed.
    pub async fn on_user_leave(&self, user: &User) -> bool {
        self.send(Message::LeaveRoom {
            user: user.id,
            name: user.name.clone(),
        })
        .await;

        if user.monitor.load(Ordering::Relaxed) {
            self.monitors
                .write()
                .await
                .retain(|w| w.upgrade().is_some_and(|u| u.id != user.id));
        } else {
            self.users
                .write()
                .await
                .retain(|w| w.upgrade().is_some_and(|u| u.id != user.id));
        }

        // Drop the leaver from the phase bookkeeping so the ready/result
        // sets only ever name current members and monitors.
        match &mut *self.state.write().await {
            InternalState::WaitForReady { started } => {
                started.remove(&user.id);
            }
            InternalState::Playing { results, aborted } => {
                results.remove(&user.id);
                aborted.remove(&user.id);
            }
            InternalState::SelectChart => {}
        }

        let members = self.users().await;
        if members.is_empty() {
            tracing::info!(room_id = %self.id, "last member left, dropping room");
            return true;
        }

        if self.check_host(user).await {
            let index = rand::rng().random_range(0..members.len());
            let new_host = members[index].clone();
            *self.host.write().await = Arc::downgrade(&new_host);
            tracing::info!(room_id = %self.id, host = new_host.id, "host left, new host elected");
            self.send(Message::NewHost { user: new_host.id }).await;
            new_host.try_send(ServerCommand::ChangeHost(true));
        }

        self.check_all_ready().await;
        self.check_all_done().await;
        false
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room").field("id", &self.id).finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================
