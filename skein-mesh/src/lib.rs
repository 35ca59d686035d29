//! # skein-mesh: peer-to-peer replication for skein documents
//!
//! Sites form a mesh with no server. Each site dials a few others, floods
//! every operation over its outbound links, and relies on the replica's
//! version vector to drop the duplicates flooding produces.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐  TransportEvent   ┌──────────────┐   Editor / PeerList
//!  │ WsTransport  │ ────────────────► │  Controller  │ ──────────────────►  UI
//!  │ (tokio-      │ ◄──────────────── │  Replica     │
//!  │  tungstenite)│  connect / send   │  Membership  │ ◄── local edits
//!  └──────────────┘                   │  Broadcast   │
//!                                     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - JSON wire messages
//! - [`membership`] - the network membership table
//! - [`broadcast`] - link state, flooding and the replay buffer
//! - [`controller`] - join, sync, gossip repair and operation handling
//! - [`transport`] / [`ws`] - the transport seam and its WebSocket implementation
//! - [`node`] - the single-task event loop hosting a controller
//! - [`config`] - TOML configuration

pub mod broadcast;
pub mod config;
pub mod controller;
pub mod editor;
pub mod error;
pub mod membership;
pub mod node;
pub mod protocol;
pub mod transport;
pub mod ws;

pub use broadcast::{Broadcast, ConnectionState};
pub use config::{ConfigError, MeshConfig};
pub use controller::Controller;
pub use editor::{Editor, Headless, PeerList};
pub use error::MeshError;
pub use membership::{Membership, NetworkMember};
pub use node::{spawn, Command, NodeHandle};
pub use protocol::{Message, PeerId, ProtocolError};
pub use transport::{Direction, Transport, TransportEvent};
pub use ws::WsTransport;
