//! # temporex-protocol
//!
//! Wire protocol for the temporex match server.
//!
//! ## Example
//!
//! ```rust
//! use temporex_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("match-7", "red-team", b"move:e4".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{error_codes, Frame, FrameType};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;
