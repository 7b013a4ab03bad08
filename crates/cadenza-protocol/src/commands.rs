//! The command layer: everything that travels as a framed payload.
//!
//! Client and server kinds are disjoint tagged variants, each `{ kind: u8,
//! payload }`. Acknowledgements share one shape — `bool ok`, then an error
//! string when `!ok` — surfaced here as `Result` payloads. `Message` is its
//! own tagged variant carried inside `ServerCommand::Message` broadcasts.

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::types::{
    ClientRoomState, JoinRoomResponse, JudgeEvent, RoomId, RoomState, TouchFrame, UserInfo,
};
use crate::ProtocolError;

/// Longest accepted authentication token, in bytes.
pub const TOKEN_MAX_LEN: usize = 32;
/// Longest accepted chat message, in bytes.
pub const CHAT_MAX_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Ack payloads
// ---------------------------------------------------------------------------

fn write_ack(w: &mut BinaryWriter, ack: &Result<(), String>) {
    match ack {
        Ok(()) => w.write_bool(true),
        Err(error) => {
            w.write_bool(false);
            w.write_string(error);
        }
    }
}

fn read_ack(r: &mut BinaryReader<'_>) -> Result<Result<(), String>, ProtocolError> {
    if r.read_bool()? {
        Ok(Ok(()))
    } else {
        Ok(Err(r.read_string()?))
    }
}

fn write_seq<T: Encode>(w: &mut BinaryWriter, items: &[T]) {
    w.write_uleb(items.len() as u64);
    for item in items {
        item.encode(w);
    }
}

fn read_seq<T: Decode>(r: &mut BinaryReader<'_>) -> Result<Vec<T>, ProtocolError> {
    let count = r.read_uleb()?;
    let mut items = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        items.push(T::decode(r)?);
    }
    Ok(items)
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Room events broadcast to every member and monitor.
///
/// These are observations, never requests: each one states something that
/// has already happened to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat { user: i32, content: String },
    CreateRoom { user: i32 },
    JoinRoom { user: i32, name: String },
    LeaveRoom { user: i32, name: String },
    NewHost { user: i32 },
    SelectChart { user: i32, name: String, id: i32 },
    GameStart { user: i32 },
    Ready { user: i32 },
    CancelReady { user: i32 },
    CancelGame { user: i32 },
    StartPlaying,
    Played { user: i32, score: i32, accuracy: f32, full_combo: bool },
    GameEnd,
    Abort { user: i32 },
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
}

impl Encode for Message {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            Self::Chat { user, content } => {
                w.write_u8(0);
                w.write_i32(*user);
                w.write_string(content);
            }
            Self::CreateRoom { user } => {
                w.write_u8(1);
                w.write_i32(*user);
            }
            Self::JoinRoom { user, name } => {
                w.write_u8(2);
                w.write_i32(*user);
                w.write_string(name);
            }
            Self::LeaveRoom { user, name } => {
                w.write_u8(3);
                w.write_i32(*user);
                w.write_string(name);
            }
            Self::NewHost { user } => {
                w.write_u8(4);
                w.write_i32(*user);
            }
            Self::SelectChart { user, name, id } => {
                w.write_u8(5);
                w.write_i32(*user);
                w.write_string(name);
                w.write_i32(*id);
            }
            Self::GameStart { user } => {
                w.write_u8(6);
                w.write_i32(*user);
            }
            Self::Ready { user } => {
                w.write_u8(7);
                w.write_i32(*user);
            }
            Self::CancelReady { user } => {
                w.write_u8(8);
                w.write_i32(*user);
            }
            Self::CancelGame { user } => {
                w.write_u8(9);
                w.write_i32(*user);
            }
            Self::StartPlaying => w.write_u8(10),
            Self::Played {
                user,
                score,
                accuracy,
                full_combo,
            } => {
                w.write_u8(11);
                w.write_i32(*user);
                w.write_i32(*score);
                w.write_f32(*accuracy);
                w.write_bool(*full_combo);
            }
            Self::GameEnd => w.write_u8(12),
            Self::Abort { user } => {
                w.write_u8(13);
                w.write_i32(*user);
            }
            Self::LockRoom { lock } => {
                w.write_u8(14);
                w.write_bool(*lock);
            }
            Self::CycleRoom { cycle } => {
                w.write_u8(15);
                w.write_bool(*cycle);
            }
        }
    }
}

impl Decode for Message {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(match r.read_u8()? {
            0 => Self::Chat {
                user: r.read_i32()?,
                content: r.read_string()?,
            },
            1 => Self::CreateRoom { user: r.read_i32()? },
            2 => Self::JoinRoom {
                user: r.read_i32()?,
                name: r.read_string()?,
            },
            3 => Self::LeaveRoom {
                user: r.read_i32()?,
                name: r.read_string()?,
            },
            4 => Self::NewHost { user: r.read_i32()? },
            5 => Self::SelectChart {
                user: r.read_i32()?,
                name: r.read_string()?,
                id: r.read_i32()?,
            },
            6 => Self::GameStart { user: r.read_i32()? },
            7 => Self::Ready { user: r.read_i32()? },
            8 => Self::CancelReady { user: r.read_i32()? },
            9 => Self::CancelGame { user: r.read_i32()? },
            10 => Self::StartPlaying,
            11 => Self::Played {
                user: r.read_i32()?,
                score: r.read_i32()?,
                accuracy: r.read_f32()?,
                full_combo: r.read_bool()?,
            },
            12 => Self::GameEnd,
            13 => Self::Abort { user: r.read_i32()? },
            14 => Self::LockRoom {
                lock: r.read_bool()?,
            },
            15 => Self::CycleRoom {
                cycle: r.read_bool()?,
            },
            value => {
                return Err(ProtocolError::UnknownDiscriminant {
                    kind: "Message",
                    value,
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ClientCommand
// ---------------------------------------------------------------------------

/// Everything a client can ask of the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Ping,
    Authenticate { token: String },
    Chat { message: String },
    Touches { frames: Vec<TouchFrame> },
    Judges { judges: Vec<JudgeEvent> },
    CreateRoom { id: RoomId },
    JoinRoom { id: RoomId, monitor: bool },
    LeaveRoom,
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
    SelectChart { id: i32 },
    RequestStart,
    Ready,
    CancelReady,
    Played { id: i32 },
    Abort,
}

impl Encode for ClientCommand {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            Self::Ping => w.write_u8(0),
            Self::Authenticate { token } => {
                w.write_u8(1);
                w.write_string(token);
            }
            Self::Chat { message } => {
                w.write_u8(2);
                w.write_string(message);
            }
            Self::Touches { frames } => {
                w.write_u8(3);
                write_seq(w, frames);
            }
            Self::Judges { judges } => {
                w.write_u8(4);
                write_seq(w, judges);
            }
            Self::CreateRoom { id } => {
                w.write_u8(5);
                id.encode(w);
            }
            Self::JoinRoom { id, monitor } => {
                w.write_u8(6);
                id.encode(w);
                w.write_bool(*monitor);
            }
            Self::LeaveRoom => w.write_u8(7),
            Self::LockRoom { lock } => {
                w.write_u8(8);
                w.write_bool(*lock);
            }
            Self::CycleRoom { cycle } => {
                w.write_u8(9);
                w.write_bool(*cycle);
            }
            Self::SelectChart { id } => {
                w.write_u8(10);
                w.write_i32(*id);
            }
            Self::RequestStart => w.write_u8(11),
            Self::Ready => w.write_u8(12),
            Self::CancelReady => w.write_u8(13),
            Self::Played { id } => {
                w.write_u8(14);
                w.write_i32(*id);
            }
            Self::Abort => w.write_u8(15),
        }
    }
}

impl Decode for ClientCommand {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(match r.read_u8()? {
            0 => Self::Ping,
            1 => Self::Authenticate {
                token: r.read_varchar(TOKEN_MAX_LEN)?,
            },
            2 => Self::Chat {
                message: r.read_varchar(CHAT_MAX_LEN)?,
            },
            3 => Self::Touches {
                frames: read_seq(r)?,
            },
            4 => Self::Judges {
                judges: read_seq(r)?,
            },
            5 => Self::CreateRoom {
                id: RoomId::decode(r)?,
            },
            6 => Self::JoinRoom {
                id: RoomId::decode(r)?,
                monitor: r.read_bool()?,
            },
            7 => Self::LeaveRoom,
            8 => Self::LockRoom {
                lock: r.read_bool()?,
            },
            9 => Self::CycleRoom {
                cycle: r.read_bool()?,
            },
            10 => Self::SelectChart { id: r.read_i32()? },
            11 => Self::RequestStart,
            12 => Self::Ready,
            13 => Self::CancelReady,
            14 => Self::Played { id: r.read_i32()? },
            15 => Self::Abort,
            value => {
                return Err(ProtocolError::UnknownDiscriminant {
                    kind: "ClientCommand",
                    value,
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ServerCommand
// ---------------------------------------------------------------------------

/// Everything the server can push to a client: command acknowledgements,
/// telemetry relays, room broadcasts, and state/host notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Pong,
    /// Ok carries the authenticated identity plus a room snapshot when the
    /// user was already in a room (reconnect).
    Authenticate(Result<(UserInfo, Option<ClientRoomState>), String>),
    Chat(Result<(), String>),
    Touches {
        player: i32,
        frames: Vec<TouchFrame>,
    },
    Judges {
        player: i32,
        judges: Vec<JudgeEvent>,
    },
    Message(Message),
    ChangeState(RoomState),
    ChangeHost(bool),
    CreateRoom(Result<(), String>),
    JoinRoom(Result<JoinRoomResponse, String>),
    OnJoinRoom(UserInfo),
    LeaveRoom(Result<(), String>),
    LockRoom(Result<(), String>),
    CycleRoom(Result<(), String>),
    SelectChart(Result<(), String>),
    RequestStart(Result<(), String>),
    Ready(Result<(), String>),
    CancelReady(Result<(), String>),
    Played(Result<(), String>),
    Abort(Result<(), String>),
}

impl Encode for ServerCommand {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            Self::Pong => w.write_u8(0),
            Self::Authenticate(result) => {
                w.write_u8(1);
                match result {
                    Ok((user, room)) => {
                        w.write_bool(true);
                        user.encode(w);
                        match room {
                            Some(room) => {
                                w.write_bool(true);
                                room.encode(w);
                            }
                            None => w.write_bool(false),
                        }
                    }
                    Err(error) => {
                        w.write_bool(false);
                        w.write_string(error);
                    }
                }
            }
            Self::Chat(ack) => {
                w.write_u8(2);
                write_ack(w, ack);
            }
            Self::Touches { player, frames } => {
                w.write_u8(3);
                w.write_i32(*player);
                write_seq(w, frames);
            }
            Self::Judges { player, judges } => {
                w.write_u8(4);
                w.write_i32(*player);
                write_seq(w, judges);
            }
            Self::Message(message) => {
                w.write_u8(5);
                message.encode(w);
            }
            Self::ChangeState(state) => {
                w.write_u8(6);
                state.encode(w);
            }
            Self::ChangeHost(is_host) => {
                w.write_u8(7);
                w.write_bool(*is_host);
            }
            Self::CreateRoom(ack) => {
                w.write_u8(8);
                write_ack(w, ack);
            }
            Self::JoinRoom(result) => {
                w.write_u8(9);
                match result {
                    Ok(response) => {
                        w.write_bool(true);
                        response.encode(w);
                    }
                    Err(error) => {
                        w.write_bool(false);
                        w.write_string(error);
                    }
                }
            }
            Self::OnJoinRoom(user) => {
                w.write_u8(10);
                user.encode(w);
            }
            Self::LeaveRoom(ack) => {
                w.write_u8(11);
                write_ack(w, ack);
            }
            Self::LockRoom(ack) => {
                w.write_u8(12);
                write_ack(w, ack);
            }
            Self::CycleRoom(ack) => {
                w.write_u8(13);
                write_ack(w, ack);
            }
            Self::SelectChart(ack) => {
                w.write_u8(14);
                write_ack(w, ack);
            }
            Self::RequestStart(ack) => {
                w.write_u8(15);
                write_ack(w, ack);
            }
            Self::Ready(ack) => {
                w.write_u8(16);
                write_ack(w, ack);
            }
            Self::CancelReady(ack) => {
                w.write_u8(17);
                write_ack(w, ack);
            }
            Self::Played(ack) => {
                w.write_u8(18);
                write_ack(w, ack);
            }
            Self::Abort(ack) => {
                w.write_u8(19);
                write_ack(w, ack);
            }
        }
    }
}

impl Decode for ServerCommand {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(match r.read_u8()? {
            0 => Self::Pong,
            1 => {
                if r.read_bool()? {
                    let user = UserInfo::decode(r)?;
                    let room = if r.read_bool()? {
                        Some(ClientRoomState::decode(r)?)
                    } else {
                        None
                    };
                    Self::Authenticate(Ok((user, room)))
                } else {
                    Self::Authenticate(Err(r.read_string()?))
                }
            }
            2 => Self::Chat(read_ack(r)?),
            3 => Self::Touches {
                player: r.read_i32()?,
                frames: read_seq(r)?,
            },
            4 => Self::Judges {
                player: r.read_i32()?,
                judges: read_seq(r)?,
            },
            5 => Self::Message(Message::decode(r)?),
            6 => Self::ChangeState(RoomState::decode(r)?),
            7 => Self::ChangeHost(r.read_bool()?),
            8 => Self::CreateRoom(read_ack(r)?),
            9 => {
                if r.read_bool()? {
                    Self::JoinRoom(Ok(JoinRoomResponse::decode(r)?))
                } else {
                    Self::JoinRoom(Err(r.read_string()?))
                }
            }
            10 => Self::OnJoinRoom(UserInfo::decode(r)?),
            11 => Self::LeaveRoom(read_ack(r)?),
            12 => Self::LockRoom(read_ack(r)?),
            13 => Self::CycleRoom(read_ack(r)?),
            14 => Self::SelectChart(read_ack(r)?),
            15 => Self::RequestStart(read_ack(r)?),
            16 => Self::Ready(read_ack(r)?),
            17 => Self::CancelReady(read_ack(r)?),
            18 => Self::Played(read_ack(r)?),
            19 => Self::Abort(read_ack(r)?),
            value => {
                return Err(ProtocolError::UnknownDiscriminant {
                    kind: "ServerCommand",
                    value,
                })
            }
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes, to_bytes};
    use crate::types::CompactPos;

    fn round_trip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = to_bytes(&value);
        assert_eq!(from_bytes::<T>(&bytes).unwrap(), value, "bytes {bytes:?}");
    }

    fn kind_byte<T: Encode>(value: &T) -> u8 {
        to_bytes(value)[0]
    }

    fn sample_frames() -> Vec<TouchFrame> {
        vec![
            TouchFrame {
                time: 1.0,
                points: vec![(0, CompactPos::new(0.5, 0.5))],
            },
            TouchFrame {
                time: 2.0,
                points: vec![(1, CompactPos::new(-0.5, 1.0)), (2, CompactPos::new(0.0, 0.0))],
            },
        ]
    }

    fn sample_judges() -> Vec<JudgeEvent> {
        vec![JudgeEvent {
            time: 0.25,
            line_id: 3,
            note_id: 99,
            judgement: crate::types::Judgement::Miss,
        }]
    }

    // -- Message ----------------------------------------------------------

    #[test]
    fn test_message_every_variant_round_trips() {
        let variants = [
            Message::Chat { user: 1, content: "hi".into() },
            Message::CreateRoom { user: 2 },
            Message::JoinRoom { user: 3, name: "C".into() },
            Message::LeaveRoom { user: 4, name: "D".into() },
            Message::NewHost { user: 5 },
            Message::SelectChart { user: 6, name: "Song".into(), id: 42 },
            Message::GameStart { user: 7 },
            Message::Ready { user: 8 },
            Message::CancelReady { user: 9 },
            Message::CancelGame { user: 10 },
            Message::StartPlaying,
            Message::Played { user: 11, score: 987_654, accuracy: 0.98, full_combo: true },
            Message::GameEnd,
            Message::Abort { user: 12 },
            Message::LockRoom { lock: true },
            Message::CycleRoom { cycle: false },
        ];
        for (kind, message) in variants.into_iter().enumerate() {
            assert_eq!(kind_byte(&message), kind as u8);
            round_trip(message);
        }
    }

    // -- ClientCommand ----------------------------------------------------

    #[test]
    fn test_client_command_every_variant_round_trips() {
        let variants = [
            ClientCommand::Ping,
            ClientCommand::Authenticate { token: "secret-token".into() },
            ClientCommand::Chat { message: "glhf".into() },
            ClientCommand::Touches { frames: sample_frames() },
            ClientCommand::Judges { judges: sample_judges() },
            ClientCommand::CreateRoom { id: "R1".parse().unwrap() },
            ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: true },
            ClientCommand::LeaveRoom,
            ClientCommand::LockRoom { lock: true },
            ClientCommand::CycleRoom { cycle: true },
            ClientCommand::SelectChart { id: 42 },
            ClientCommand::RequestStart,
            ClientCommand::Ready,
            ClientCommand::CancelReady,
            ClientCommand::Played { id: 42 },
            ClientCommand::Abort,
        ];
        for (kind, command) in variants.into_iter().enumerate() {
            assert_eq!(kind_byte(&command), kind as u8);
            round_trip(command);
        }
    }

    #[test]
    fn test_client_command_token_cap() {
        let mut w = BinaryWriter::new();
        w.write_u8(1);
        w.write_string(&"x".repeat(33));
        assert!(matches!(
            from_bytes::<ClientCommand>(&w.into_inner()),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_client_command_chat_cap() {
        let mut w = BinaryWriter::new();
        w.write_u8(2);
        w.write_string(&"y".repeat(201));
        assert!(matches!(
            from_bytes::<ClientCommand>(&w.into_inner()),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_client_command_unknown_kind() {
        assert!(matches!(
            from_bytes::<ClientCommand>(&[16]),
            Err(ProtocolError::UnknownDiscriminant {
                kind: "ClientCommand",
                value: 16
            })
        ));
    }

    #[test]
    fn test_client_command_truncated_payload() {
        // JoinRoom kind with no room id bytes at all.
        assert!(from_bytes::<ClientCommand>(&[6]).is_err());
    }

    // -- ServerCommand ----------------------------------------------------

    #[test]
    fn test_server_command_every_variant_round_trips() {
        let user = UserInfo { id: 9, name: "Kai".into(), monitor: false };
        let snapshot = ClientRoomState {
            id: "R9".parse().unwrap(),
            state: RoomState::Playing,
            live: false,
            locked: true,
            cycle: false,
            is_host: false,
            is_ready: true,
            users: [(9, user.clone())].into_iter().collect(),
        };
        let response = JoinRoomResponse {
            state: RoomState::SelectChart(Some(1)),
            users: vec![user.clone()],
            live: true,
        };

        let variants = [
            ServerCommand::Pong,
            ServerCommand::Authenticate(Ok((user.clone(), Some(snapshot)))),
            ServerCommand::Chat(Ok(())),
            ServerCommand::Touches { player: 9, frames: sample_frames() },
            ServerCommand::Judges { player: 9, judges: sample_judges() },
            ServerCommand::Message(Message::GameEnd),
            ServerCommand::ChangeState(RoomState::WaitingForReady),
            ServerCommand::ChangeHost(true),
            ServerCommand::CreateRoom(Err("room-exists".into())),
            ServerCommand::JoinRoom(Ok(response)),
            ServerCommand::OnJoinRoom(user),
            ServerCommand::LeaveRoom(Ok(())),
            ServerCommand::LockRoom(Err("not-host".into())),
            ServerCommand::CycleRoom(Ok(())),
            ServerCommand::SelectChart(Err("bad-chart".into())),
            ServerCommand::RequestStart(Ok(())),
            ServerCommand::Ready(Err("bad-state".into())),
            ServerCommand::CancelReady(Ok(())),
            ServerCommand::Played(Ok(())),
            ServerCommand::Abort(Err("bad-state".into())),
        ];
        for (kind, command) in variants.into_iter().enumerate() {
            assert_eq!(kind_byte(&command), kind as u8);
            round_trip(command);
        }
    }

    #[test]
    fn test_server_command_auth_failure_round_trips() {
        round_trip(ServerCommand::Authenticate(Err("banned".into())));
    }

    #[test]
    fn test_server_command_auth_ok_without_room() {
        round_trip(ServerCommand::Authenticate(Ok((
            UserInfo { id: 1, name: "A".into(), monitor: false },
            None,
        ))));
    }

    #[test]
    fn test_server_command_join_failure_round_trips() {
        round_trip(ServerCommand::JoinRoom(Err("room-full".into())));
    }

    #[test]
    fn test_server_command_unknown_kind() {
        assert!(matches!(
            from_bytes::<ServerCommand>(&[20]),
            Err(ProtocolError::UnknownDiscriminant {
                kind: "ServerCommand",
                value: 20
            })
        ));
    }
}
