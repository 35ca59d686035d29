use skein_crdt::CrdtError;
use thiserror::Error;

use crate::protocol::{PeerId, ProtocolError};

/// Errors surfaced to whoever drives a mesh node.
///
/// Remote input never produces one of these on the caller's side: bad
/// payloads are logged and dropped inside the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Peer id is empty")]
    EmptyPeerId,
    #[error("Cannot connect to our own peer id")]
    SelfConnection,
    #[error("Already connected to {0}")]
    AlreadyConnected(PeerId),
    #[error("No open link to {0}")]
    NotConnected(PeerId),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Node has shut down")]
    Shutdown,
}
