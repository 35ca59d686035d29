use serde::{Deserialize, Serialize};
use skein_crdt::SiteId;

use crate::protocol::PeerId;

/// One site in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMember {
    pub peer_id: PeerId,
    pub site_id: SiteId,
}

impl NetworkMember {
    pub fn new(peer_id: impl Into<PeerId>, site_id: SiteId) -> Self {
        Self {
            peer_id: peer_id.into(),
            site_id,
        }
    }
}

/// The sites this node believes are in the mesh, in join order.
///
/// Keyed by site: a site that reappears under a new peer id is ignored until
/// its old entry is removed.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    members: Vec<NetworkMember>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the site is already known.
    pub fn add(&mut self, member: NetworkMember) -> bool {
        if self.contains_site(member.site_id) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> Option<NetworkMember> {
        let idx = self.members.iter().position(|m| m.peer_id == peer_id)?;
        Some(self.members.remove(idx))
    }

    pub fn contains_site(&self, site_id: SiteId) -> bool {
        self.members.iter().any(|m| m.site_id == site_id)
    }

    pub fn contains_peer(&self, peer_id: &str) -> bool {
        self.members.iter().any(|m| m.peer_id == peer_id)
    }

    pub fn members(&self) -> &[NetworkMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
