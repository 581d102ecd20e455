//! Transport frame metadata.
//!
//! A logical message may be split into several transport frames, and a frame
//! may in turn arrive as several packets. Each delivery carries the metadata
//! below plus the bytes for `[index, index + payload.len())` of its frame:
//!
//! ```text
//! message:  |------------ frame 0 ------------|---- frame 1 (final) ----|
//! packets:  |[0, a)   |[a, b)      |[b, len)  |[0, len)                 |
//! ```

use bytes::Bytes;

/// Kind of a logical message, taken from the opcode of its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Binary => "binary",
        }
    }
}

/// Metadata for one frame delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Last frame of the logical message.
    pub final_frame: bool,
    /// Frame sequence number within the message, starting at 0.
    pub num: u32,
    /// Kind of the logical message.
    pub kind: MessageKind,
    /// Start offset of this delivery within the frame.
    pub index: u64,
    /// Declared total length of the frame.
    pub len: u64,
}

impl FrameInfo {
    /// Metadata for a message delivered whole in a single packet.
    pub fn whole(kind: MessageKind, len: usize) -> Self {
        Self {
            final_frame: true,
            num: 0,
            kind,
            index: 0,
            len: len as u64,
        }
    }

    /// Metadata for a packet of a (possibly multi-packet) frame.
    pub fn fragment(kind: MessageKind, num: u32, index: u64, len: u64, final_frame: bool) -> Self {
        Self {
            final_frame,
            num,
            kind,
            index,
            len,
        }
    }

    /// End offset of a delivery of `payload_len` bytes.
    pub fn end(&self, payload_len: usize) -> u64 {
        self.index + payload_len as u64
    }

    /// Returns true if a delivery of `payload_len` bytes is an entire message.
    pub fn is_whole_message(&self, payload_len: usize) -> bool {
        self.final_frame && self.num == 0 && self.index == 0 && self.len == payload_len as u64
    }

    /// Returns true if this delivery opens a new logical message.
    pub fn starts_message(&self) -> bool {
        self.num == 0 && self.index == 0
    }
}

/// A fully reassembled logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMessage {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl CompleteMessage {
    pub fn new(kind: MessageKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
