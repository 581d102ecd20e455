//! # wsrpc-protocol
//!
//! Wire protocol implementation for wsrpc (JSON-RPC 2.0 over a fragmented,
//! frame-oriented message transport).
//!
//! This crate provides:
//! - Transport frame metadata and per-connection message reassembly
//! - JSON-RPC request decoding with envelope validation
//! - Response and change-notification encoding
//! - Error kinds and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod reassembly;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorKind, ProtocolError};
pub use frame::{CompleteMessage, FrameInfo, MessageKind};
pub use message::{Notification, Request, RequestId, Response, ResponseError};
pub use reassembly::Reassembler;

/// JSON-RPC protocol version literal carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name used for state-change notifications.
pub const UPDATE_METHOD: &str = "update";

/// Default maximum size of one reassembled logical message (16 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;
