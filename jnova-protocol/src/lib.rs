//! # jnova-protocol
//!
//! Wire protocol used by the jnova diagnostic harness.
//!
//! This crate provides:
//! - Delimiter and 4-byte big-endian length-prefixed framing
//! - A line buffer that turns a byte stream into JSON frames
//! - The tagged command model sent to the server
//! - Protocol error types and constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Encoder, Inbound, LineBuffer};
pub use error::ProtocolError;
pub use frame::Framing;
pub use message::{BroadcastMessage, Command, DEFAULT_SENDER};

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 7070;

/// Frame terminator for delimiter framing.
pub const DELIMITER: u8 = b'\n';

/// Size of the big-endian length field in length-prefixed framing.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
