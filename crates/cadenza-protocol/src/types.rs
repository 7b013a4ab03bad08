//! Wire data types shared by both command directions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::codec::{f16_to_f32, f32_to_f16, BinaryReader, BinaryWriter, Decode, Encode};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// RoomId
// ---------------------------------------------------------------------------

/// Maximum length of a room id in bytes.
pub const ROOM_ID_MAX_LEN: usize = 20;

/// A validated room identifier: 1–20 characters of `[A-Za-z0-9_-]`.
///
/// Validation happens on construction and on decode, so a `RoomId` held
/// anywhere in the server is known to be well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Checks the id shape without allocating.
    pub fn validate(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= ROOM_ID_MAX_LEN
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::validate(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(ProtocolError::InvalidRoomId(s.to_owned()))
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Encode for RoomId {
    fn encode(&self, w: &mut BinaryWriter) {
        w.write_string(&self.0);
    }
}

impl Decode for RoomId {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let s = r.read_varchar(ROOM_ID_MAX_LEN)?;
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// CompactPos
// ---------------------------------------------------------------------------

/// A touch position as a pair of half floats.
///
/// Stored as the raw binary16 bit patterns so an encode/decode round trip
/// is exact even for values a half float only approximates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactPos {
    x_bits: u16,
    y_bits: u16,
}

impl CompactPos {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x_bits: f32_to_f16(x),
            y_bits: f32_to_f16(y),
        }
    }

    pub fn x(&self) -> f32 {
        f16_to_f32(self.x_bits)
    }

    pub fn y(&self) -> f32 {
        f16_to_f32(self.y_bits)
    }
}

impl Encode for CompactPos {
    fn encode(&self, w: &mut BinaryWriter) {
        w.write_u16(self.x_bits);
        w.write_u16(self.y_bits);
    }
}

impl Decode for CompactPos {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            x_bits: r.read_u16()?,
            y_bits: r.read_u16()?,
        })
    }
}

// ---------------------------------------------------------------------------
// TouchFrame
// ---------------------------------------------------------------------------

/// One sampled frame of a player's touches: a timestamp plus the active
/// pointers and their positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchFrame {
    pub time: f32,
    pub points: Vec<(i8, CompactPos)>,
}

impl Encode for TouchFrame {
    fn encode(&self, w: &mut BinaryWriter) {
        w.write_f32(self.time);
        w.write_uleb(self.points.len() as u64);
        for (pointer, pos) in &self.points {
            w.write_i8(*pointer);
            pos.encode(w);
        }
    }
}

impl Decode for TouchFrame {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let time = r.read_f32()?;
        let count = r.read_uleb()?;
        let mut points = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let pointer = r.read_i8()?;
            let pos = CompactPos::decode(r)?;
            points.push((pointer, pos));
        }
        Ok(Self { time, points })
    }
}

// ---------------------------------------------------------------------------
// Judgement / JudgeEvent
// ---------------------------------------------------------------------------

/// The outcome of hitting (or missing) a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Judgement {
    Perfect = 0,
    Good = 1,
    Bad = 2,
    Miss = 3,
    HoldPerfect = 4,
    HoldGood = 5,
}

impl TryFrom<u8> for Judgement {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Perfect),
            1 => Ok(Self::Good),
            2 => Ok(Self::Bad),
            3 => Ok(Self::Miss),
            4 => Ok(Self::HoldPerfect),
            5 => Ok(Self::HoldGood),
            value => Err(ProtocolError::UnknownDiscriminant {
                kind: "Judgement",
                value,
            }),
        }
    }
}

/// One judged note hit in a player's run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeEvent {
    pub time: f32,
    pub line_id: u32,
    pub note_id: u32,
    pub judgement: Judgement,
}

impl Encode for JudgeEvent {
    fn encode(&self, w: &mut BinaryWriter) {
        w.write_f32(self.time);
        w.write_u32(self.line_id);
        w.write_u32(self.note_id);
        w.write_u8(self.judgement as u8);
    }
}

impl Decode for JudgeEvent {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            time: r.read_f32()?,
            line_id: r.read_u32()?,
            note_id: r.read_u32()?,
            judgement: Judgement::try_from(r.read_u8()?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// UserInfo
// ---------------------------------------------------------------------------

/// A user as clients see one: id, display name, monitor flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i32,
    pub name: String,
    pub monitor: bool,
}

impl Encode for UserInfo {
    fn encode(&self, w: &mut BinaryWriter) {
        w.write_i32(self.id);
        w.write_string(&self.name);
        w.write_bool(self.monitor);
    }
}

impl Decode for UserInfo {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.read_i32()?,
            name: r.read_string()?,
            monitor: r.read_bool()?,
        })
    }
}

// ---------------------------------------------------------------------------
// RoomState (client-facing)
// ---------------------------------------------------------------------------

/// The room phase as announced to clients.
///
/// Only the chart-selection phase carries data: the currently selected
/// chart, if any. The server-side state machine keeps richer per-phase
/// bookkeeping that never crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    SelectChart(Option<i32>),
    WaitingForReady,
    Playing,
}

impl Encode for RoomState {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            Self::SelectChart(chart) => {
                w.write_u8(0);
                match chart {
                    Some(id) => {
                        w.write_bool(true);
                        w.write_i32(*id);
                    }
                    None => w.write_bool(false),
                }
            }
            Self::WaitingForReady => w.write_u8(1),
            Self::Playing => w.write_u8(2),
        }
    }
}

impl Decode for RoomState {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => {
                let chart = if r.read_bool()? {
                    Some(r.read_i32()?)
                } else {
                    None
                };
                Ok(Self::SelectChart(chart))
            }
            1 => Ok(Self::WaitingForReady),
            2 => Ok(Self::Playing),
            value => Err(ProtocolError::UnknownDiscriminant {
                kind: "RoomState",
                value,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientRoomState
// ---------------------------------------------------------------------------

/// A full room snapshot, sent inside a successful `Authenticate` reply so a
/// reconnecting client can restore its in-room UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRoomState {
    pub id: RoomId,
    pub state: RoomState,
    pub live: bool,
    pub locked: bool,
    pub cycle: bool,
    pub is_host: bool,
    pub is_ready: bool,
    pub users: HashMap<i32, UserInfo>,
}

impl Encode for ClientRoomState {
    fn encode(&self, w: &mut BinaryWriter) {
        self.id.encode(w);
        self.state.encode(w);
        w.write_bool(self.live);
        w.write_bool(self.locked);
        w.write_bool(self.cycle);
        w.write_bool(self.is_host);
        w.write_bool(self.is_ready);
        w.write_uleb(self.users.len() as u64);
        for (id, info) in &self.users {
            w.write_i32(*id);
            info.encode(w);
        }
    }
}

impl Decode for ClientRoomState {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let id = RoomId::decode(r)?;
        let state = RoomState::decode(r)?;
        let live = r.read_bool()?;
        let locked = r.read_bool()?;
        let cycle = r.read_bool()?;
        let is_host = r.read_bool()?;
        let is_ready = r.read_bool()?;
        let count = r.read_uleb()?;
        let mut users = HashMap::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let id = r.read_i32()?;
            users.insert(id, UserInfo::decode(r)?);
        }
        Ok(Self {
            id,
            state,
            live,
            locked,
            cycle,
            is_host,
            is_ready,
            users,
        })
    }
}

// ---------------------------------------------------------------------------
// JoinRoomResponse
// ---------------------------------------------------------------------------

/// Payload of a successful `SJoinRoom`: the room phase, the people already
/// there, and the live flag.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRoomResponse {
    pub state: RoomState,
    pub users: Vec<UserInfo>,
    pub live: bool,
}

impl Encode for JoinRoomResponse {
    fn encode(&self, w: &mut BinaryWriter) {
        self.state.encode(w);
        w.write_uleb(self.users.len() as u64);
        for user in &self.users {
            user.encode(w);
        }
        w.write_bool(self.live);
    }
}

impl Decode for JoinRoomResponse {
    fn decode(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let state = RoomState::decode(r)?;
        let count = r.read_uleb()?;
        let mut users = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            users.push(UserInfo::decode(r)?);
        }
        let live = r.read_bool()?;
        Ok(Self { state, users, live })
    }
}

// =========================================================================
// Tests
// =========================================================================
