//! # cadenza-server
//!
//! Multiplayer session server for rhythm game rooms.
//!
//! Clients connect over TCP, announce a protocol version byte, and
//! authenticate against an external lookup service. Authenticated users
//! create and join rooms; the host selects a chart, everyone readies up,
//! the round plays out, and results are collected. Touch and judgement
//! telemetry streams to monitor observers in real time.
//!
//! Layers, bottom up:
//!
//! - [`queue`] — the closable per-session send queue.
//! - [`session`] — one TCP connection: reader, writer, heartbeat tasks.
//! - [`user`] — a player identity that survives reconnects.
//! - [`room`] — the room state machine.
//! - [`registry`] — server-wide maps, the lost-connection reaper.
//! - [`handler`] — authentication and command dispatch.
//! - [`server`] — the accept loop.
//!
//! Collaborator seams ([`lookup`], [`ban`], [`config`], [`hooks`]) keep
//! external services and deployment policy out of the core.

pub mod ban;
pub mod config;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod lookup;
pub mod queue;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod user;

pub use ban::BanList;
pub use config::ServerConfig;
pub use error::ServerError;
pub use hooks::{CommandFilter, EventSink, NoFilter, NullEvents};
pub use lookup::{AuthInfo, DevLookup, Language, Lookup, LookupError};
pub use registry::ServerState;
pub use room::{Chart, Record, Room, RoomError, ROOM_MAX_USERS};
pub use server::Server;
pub use session::Session;
pub use user::User;
