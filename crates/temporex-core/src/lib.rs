//! # temporex-core
//!
//! Session registry and group message routing for the temporex match server.
//!
//! - **SessionRegistry** - create-or-join table of live match sessions
//! - **Session** - players of a match and their (overlapping) groups
//! - **ConnectionDirectory** - each player's current connection
//! - **Router** - fans a payload out to a group's connected members
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │  Connection │────▶│   Router    │────▶│ SessionRegistry │──▶ Session
//! │   handler   │     └─────────────┘     └─────────────────┘
//! └─────────────┘            │
//!                            ▼
//!                  ┌─────────────────────┐
//!                  │ ConnectionDirectory │──▶ PlayerConnection
//!                  └─────────────────────┘
//! ```

pub mod connection;
pub mod directory;
pub mod player;
pub mod registry;
pub mod router;
pub mod session;

pub use connection::{ConnectionError, ConnectionHandle, PlayerConnection};
pub use directory::{ConnectionDirectory, DirectoryError};
pub use player::{Player, PlayerId};
pub use registry::{RegistryStats, SessionRegistry};
pub use router::{DeliveryReport, Router, RouterError};
pub use session::{GroupId, Session, SessionError, SessionId};
