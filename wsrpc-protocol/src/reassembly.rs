//! Per-connection reassembly of fragmented logical messages.

use crate::error::ProtocolError;
use crate::frame::{CompleteMessage, FrameInfo, MessageKind};
use crate::DEFAULT_MAX_MESSAGE_SIZE;
use bytes::{Bytes, BytesMut};

/// Accumulates frame deliveries into complete logical messages.
///
/// Holds at most one in-progress message. The buffer is cleared, not
/// reallocated, between messages. Any sequencing error abandons the
/// in-progress message before it is returned to the caller.
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    kind: MessageKind,
    frame_num: u32,
    frame_len: u64,
    offset: u64,
    in_progress: bool,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            kind: MessageKind::Text,
            frame_num: 0,
            frame_len: 0,
            offset: 0,
            in_progress: false,
            max_message_size,
        }
    }

    /// Feeds one frame delivery.
    ///
    /// Returns `Ok(Some(message))` once a logical message is complete,
    /// `Ok(None)` while more deliveries are needed, or `Err` if the delivery
    /// broke the frame sequence (the in-progress message is dropped).
    pub fn feed(
        &mut self,
        info: &FrameInfo,
        payload: &[u8],
    ) -> Result<Option<CompleteMessage>, ProtocolError> {
        // Whole message in one delivery: no buffering at all
        if !self.in_progress && info.is_whole_message(payload.len()) {
            self.check_size(payload.len())?;
            return Ok(Some(CompleteMessage::new(
                info.kind,
                Bytes::copy_from_slice(payload),
            )));
        }

        if info.starts_message() {
            if self.in_progress {
                tracing::warn!(
                    "Abandoning incomplete {} message ({} bytes buffered)",
                    self.kind.as_str(),
                    self.buffer.len()
                );
                self.reset();
            }
            if info.is_whole_message(payload.len()) {
                self.check_size(payload.len())?;
                return Ok(Some(CompleteMessage::new(
                    info.kind,
                    Bytes::copy_from_slice(payload),
                )));
            }
            tracing::debug!("{}-message start", info.kind.as_str());
            self.begin(info);
        } else if !self.in_progress {
            return Err(ProtocolError::NoMessageInProgress);
        } else if info.index == 0 {
            self.next_frame(info)?;
        } else if info.num != self.frame_num {
            return Err(self.abandon(ProtocolError::UnexpectedFrame {
                expected: self.frame_num,
                actual: info.num,
            }));
        } else if info.index != self.offset {
            return Err(self.abandon(ProtocolError::OutOfOrder {
                expected: self.offset,
                actual: info.index,
            }));
        }

        let end = info.end(payload.len());
        if end > self.frame_len {
            return Err(self.abandon(ProtocolError::FrameOverrun {
                end,
                len: self.frame_len,
            }));
        }

        let size = self.buffer.len() + payload.len();
        if size > self.max_message_size {
            return Err(self.abandon(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            }));
        }

        self.buffer.extend_from_slice(payload);
        self.offset = end;

        if self.offset < self.frame_len {
            return Ok(None);
        }

        tracing::trace!("frame[{}] end[{}]", self.frame_num, self.frame_len);
        if !info.final_frame {
            return Ok(None);
        }

        let message = CompleteMessage::new(self.kind, Bytes::copy_from_slice(&self.buffer));
        tracing::debug!(
            "{}-message end ({} bytes)",
            message.kind.as_str(),
            message.len()
        );
        self.reset();
        Ok(Some(message))
    }

    /// Returns whether a message is partially received.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any in-progress message, keeping the buffer's capacity.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frame_num = 0;
        self.frame_len = 0;
        self.offset = 0;
        self.in_progress = false;
    }

    fn begin(&mut self, info: &FrameInfo) {
        self.buffer.clear();
        self.kind = info.kind;
        self.frame_num = 0;
        self.frame_len = info.len;
        self.offset = 0;
        self.in_progress = true;
    }

    fn next_frame(&mut self, info: &FrameInfo) -> Result<(), ProtocolError> {
        if self.offset != self.frame_len {
            return Err(self.abandon(ProtocolError::OutOfOrder {
                expected: self.offset,
                actual: info.index,
            }));
        }
        let expected = self.frame_num + 1;
        if info.num != expected {
            return Err(self.abandon(ProtocolError::UnexpectedFrame {
                expected,
                actual: info.num,
            }));
        }
        tracing::trace!("frame[{}] start[{}]", info.num, info.len);
        self.frame_num = info.num;
        self.frame_len = info.len;
        self.offset = 0;
        Ok(())
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn abandon(&mut self, err: ProtocolError) -> ProtocolError {
        self.reset();
        err
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
