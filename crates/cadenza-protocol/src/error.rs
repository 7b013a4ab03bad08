//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or framing wire data.
///
/// Every variant is fatal to the connection that produced it: a payload
/// that fails to decode leaves the stream position unknown, so the session
/// is killed rather than resynchronised.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload ended before the declared data did.
    #[error("unexpected end of payload")]
    UnexpectedEof,

    /// A ULEB-128 value ran past 64 bits.
    #[error("varint too long")]
    VarintOverflow,

    /// A length-checked string declared more bytes than its field allows.
    #[error("string of {len} bytes exceeds the {max} byte cap")]
    StringTooLong { len: u64, max: usize },

    /// String bytes were not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A boolean byte was neither 0 nor 1.
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),

    /// A tagged variant carried a kind byte outside its enumeration.
    #[error("unknown {kind} discriminant {value}")]
    UnknownDiscriminant { kind: &'static str, value: u8 },

    /// A room id failed the `[A-Za-z0-9_-]{{1,20}}` shape check.
    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),

    /// A frame declared a payload larger than the transport allows.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    /// A payload decoded cleanly but left bytes behind.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// The underlying transport failed mid-frame.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
