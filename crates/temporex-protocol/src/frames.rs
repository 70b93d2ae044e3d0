//! Frame types for the temporex protocol.
//!
//! A client opens a WebSocket, identifies itself with `Connect`, then joins
//! match sessions, places itself into groups, and publishes payloads to a
//! group. The server fans each publish out as `Deliver` frames.

use serde::{Deserialize, Serialize};

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// Malformed frame or unsupported protocol version.
    pub const INVALID_FRAME: u16 = 1001;
    /// A `Connect` frame is required first.
    pub const NOT_CONNECTED: u16 = 1002;
    /// The session has reached its player limit.
    pub const SESSION_FULL: u16 = 1003;
    /// No session with the given id exists.
    pub const SESSION_NOT_FOUND: u16 = 1004;
    /// The player has not joined the session.
    pub const NOT_A_MEMBER: u16 = 1005;
    /// The inbound message exceeds the configured limit.
    pub const MESSAGE_TOO_LARGE: u16 = 1006;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Assign = 0x05,
    Publish = 0x06,
    Deliver = 0x07,
    Report = 0x08,
    Ack = 0x09,
    Error = 0x0A,
    Ping = 0x0B,
    Pong = 0x0C,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Identify the player behind this connection.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version spoken by the client.
        version: u8,
        /// Player identifier.
        player: String,
    },

    /// Connection bound to a player.
    #[serde(rename = "connected")]
    Connected {
        /// The bound player identifier.
        player: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a session, creating it if it does not exist.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Session to join.
        session: String,
    },

    /// Leave a session.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Session to leave.
        session: String,
    },

    /// Place the sending player into a group of a joined session.
    #[serde(rename = "assign")]
    Assign {
        /// Request ID for acknowledgment.
        id: u64,
        /// Session the group belongs to.
        session: String,
        /// Group to join.
        group: String,
    },

    /// Send a payload to every member of a group.
    #[serde(rename = "publish")]
    Publish {
        /// Optional request ID; when present the server answers with a `Report`.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Target session.
        session: String,
        /// Target group.
        group: String,
        /// Opaque payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// A payload routed to this connection.
    #[serde(rename = "deliver")]
    Deliver {
        /// Session the payload was published to.
        session: String,
        /// Group the payload was published to.
        group: String,
        /// Publishing player.
        from: String,
        /// Opaque payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Outcome of a publish that carried a request ID.
    #[serde(rename = "report")]
    Report {
        /// ID of the publish request.
        id: u64,
        /// Recipients written to.
        delivered: u32,
        /// Members without a live connection.
        skipped: u32,
        /// Recipients whose write failed.
        failed: u32,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Assign { .. } => FrameType::Assign,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Deliver { .. } => FrameType::Deliver,
            Frame::Report { .. } => FrameType::Report,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, player: impl Into<String>) -> Self {
        Frame::Connect {
            version,
            player: player.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(player: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            player: player.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, session: impl Into<String>) -> Self {
        Frame::Join {
            id,
            session: session.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, session: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            session: session.into(),
        }
    }

    /// Create a new Assign frame.
    #[must_use]
    pub fn assign(id: u64, session: impl Into<String>, group: impl Into<String>) -> Self {
        Frame::Assign {
            id,
            session: session.into(),
            group: group.into(),
        }
    }

    /// Create a fire-and-forget Publish frame.
    #[must_use]
    pub fn publish(
        session: impl Into<String>,
        group: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Publish {
            id: None,
            session: session.into(),
            group: group.into(),
            payload: payload.into(),
        }
    }

    /// Create a Publish frame that asks for a delivery report.
    #[must_use]
    pub fn publish_with_report(
        id: u64,
        session: impl Into<String>,
        group: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Publish {
            id: Some(id),
            session: session.into(),
            group: group.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Deliver frame.
    #[must_use]
    pub fn deliver(
        session: impl Into<String>,
        group: impl Into<String>,
        from: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Deliver {
            session: session.into(),
            group: group.into(),
            from: from.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
