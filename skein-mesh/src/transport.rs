use crate::error::MeshError;
use crate::protocol::PeerId;

/// Which side opened a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We dialed; this is the link we send on.
    Outbound,
    /// They dialed; this is the link we receive on.
    Inbound,
}

/// What the transport reports back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened { peer: PeerId, direction: Direction },
    /// Also reported when a dial attempt fails.
    Closed { peer: PeerId, direction: Direction },
    Message { peer: PeerId, text: String },
}

/// Per-peer ordered, reliable links.
///
/// Every method returns immediately; outcomes arrive later as
/// [`TransportEvent`]s on whatever channel the implementation feeds.
pub trait Transport {
    /// Start dialing `peer`.
    fn connect(&mut self, peer: &PeerId);

    /// Queue `text` on the outbound link to `peer`.
    fn send(&mut self, peer: &PeerId, text: String) -> Result<(), MeshError>;

    /// Drop every link to `peer`.
    fn disconnect(&mut self, peer: &PeerId);
}
