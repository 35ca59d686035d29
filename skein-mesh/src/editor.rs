//! Collaborator interfaces: the text widget and the peer list UI.
//!
//! The controller calls these after a remote change has been applied to the
//! replica. Coordinates are editor line/column positions.

use log::info;
use skein_crdt::{LineCol, SiteId};

use crate::protocol::PeerId;

pub trait Editor {
    /// A remote insert landed. `from == to` is the insertion point.
    fn insert_text(&mut self, value: char, from: LineCol, to: LineCol, origin: SiteId);

    /// A remote delete removed `value`, which spanned `from..to`.
    fn delete_text(&mut self, value: char, from: LineCol, to: LineCol, origin: SiteId);

    /// The whole document was replaced by a sync snapshot.
    fn replace_text(&mut self, text: &str);

    fn remove_cursor(&mut self, site_id: SiteId);
}

pub trait PeerList {
    fn add_peer(&mut self, site_id: SiteId, peer_id: &PeerId);
    fn remove_peer(&mut self, peer_id: &PeerId);
}

/// Headless collaborator that only logs, for nodes with no UI attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl Editor for Headless {
    fn insert_text(&mut self, value: char, from: LineCol, _to: LineCol, origin: SiteId) {
        log::trace!("remote insert {value:?} at {}:{} by {origin}", from.line, from.ch);
    }

    fn delete_text(&mut self, value: char, from: LineCol, _to: LineCol, origin: SiteId) {
        log::trace!("remote delete {value:?} at {}:{} by {origin}", from.line, from.ch);
    }

    fn replace_text(&mut self, text: &str) {
        log::debug!("document replaced ({} chars)", text.chars().count());
    }

    fn remove_cursor(&mut self, _site_id: SiteId) {}
}

impl PeerList for Headless {
    fn add_peer(&mut self, site_id: SiteId, peer_id: &PeerId) {
        info!("peer joined: {peer_id} ({site_id})");
    }

    fn remove_peer(&mut self, peer_id: &PeerId) {
        info!("peer left: {peer_id}");
    }
}
