//! Extension hooks: command filtering and event notification.
//!
//! Both are trait objects injected at server construction. The defaults do
//! nothing, and implementations must not block — they run on session tasks
//! in the middle of command processing.

use cadenza_protocol::{ClientCommand, RoomId};

use crate::user::User;

/// Inspects each command from an authenticated session before dispatch.
pub trait CommandFilter: Send + Sync {
    /// Returns the (possibly rewritten) command to process, or `None` to
    /// veto it. A veto is processed as a `Ping`, so the client still gets
    /// a well-formed reply.
    fn filter(&self, user: &User, command: ClientCommand) -> Option<ClientCommand>;
}

/// Passes every command through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl CommandFilter for NoFilter {
    fn filter(&self, _user: &User, command: ClientCommand) -> Option<ClientCommand> {
        Some(command)
    }
}

/// Fire-and-forget notifications about registry changes.
///
/// Observers (dashboards, plugins) hang off these. Default methods are
/// no-ops so sinks implement only what they care about.
pub trait EventSink: Send + Sync {
    fn room_created(&self, _room: &RoomId, _host: i32) {}
    fn room_destroyed(&self, _room: &RoomId) {}
    fn user_joined_room(&self, _user: i32, _room: &RoomId) {}
    fn user_left_room(&self, _user: i32, _room: &RoomId) {}
    fn user_banned(&self, _user: i32) {}
    fn user_unbanned(&self, _user: i32) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl EventSink for NullEvents {}
