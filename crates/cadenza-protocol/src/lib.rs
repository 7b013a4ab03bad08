//! Wire protocol for cadenza.
//!
//! This crate defines the language clients and the server speak:
//!
//! - **Primitives** ([`BinaryReader`], [`BinaryWriter`], the `f16`
//!   conversions) — little-endian integers, ULEB-128 lengths, strings,
//!   UUIDs, half floats.
//! - **Types** ([`RoomId`], [`TouchFrame`], [`UserInfo`], ...) — the data
//!   structures that travel inside commands.
//! - **Commands** ([`ClientCommand`], [`ServerCommand`], [`Message`]) —
//!   the tagged variants each frame carries.
//! - **Framing** ([`read_frame`], [`write_frame`]) — the u32-LE length
//!   prefix around every payload.
//!
//! The crate holds no connection state; both directions encode and decode
//! so test harnesses and Rust clients can reuse it wholesale.

mod codec;
mod commands;
mod error;
mod framing;
mod types;

pub use codec::{
    f16_to_f32, f32_to_f16, from_bytes, to_bytes, BinaryReader, BinaryWriter, Decode, Encode,
};
pub use commands::{ClientCommand, Message, ServerCommand, CHAT_MAX_LEN, TOKEN_MAX_LEN};
pub use error::ProtocolError;
pub use framing::{read_frame, read_message, write_frame, write_message, MAX_PAYLOAD_LEN};
pub use types::{
    ClientRoomState, CompactPos, JoinRoomResponse, JudgeEvent, Judgement, RoomId, RoomState,
    TouchFrame, UserInfo, ROOM_ID_MAX_LEN,
};
