//! JSON wire protocol between sites.
//!
//! Every frame is one JSON object tagged by `type`:
//! ```text
//! {"type":"insert","char":{...},"version":{...}}
//! {"type":"delete","char":{...},"version":{...}}
//! {"type":"syncRequest","peerId":"ws://...","siteId":"..."}
//! {"type":"syncResponse","peerId":..,"siteId":..,"network":[..],"initialStruct":[[..]],"initialVersions":[..]}
//! {"type":"syncCompleted","peerId":..}
//! {"type":"networkUpdate","peerId":..,"siteId":..}
//! {"type":"networkRemove","peerId":..}
//! ```
//!
//! Anything that does not parse into one of these variants is rejected.

use serde::{Deserialize, Serialize};
use skein_crdt::{Char, CrdtError, OpKind, Operation, SiteId, Snapshot, Version};
use thiserror::Error;

use crate::membership::NetworkMember;

/// Transport-level address of a site (a WebSocket URL for the bundled
/// transport).
pub type PeerId = String;

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    Insert {
        #[serde(rename = "char")]
        character: Char,
        version: Version,
    },
    Delete {
        #[serde(rename = "char")]
        character: Char,
        version: Version,
    },
    /// Join request: "connect back to me and send your state".
    SyncRequest { peer_id: PeerId, site_id: SiteId },
    SyncResponse {
        peer_id: PeerId,
        site_id: SiteId,
        network: Vec<NetworkMember>,
        initial_struct: Vec<Vec<Char>>,
        initial_versions: Vec<Version>,
    },
    SyncCompleted { peer_id: PeerId },
    NetworkUpdate { peer_id: PeerId, site_id: SiteId },
    NetworkRemove { peer_id: PeerId },
}

impl Message {
    pub fn sync_response(
        peer_id: PeerId,
        site_id: SiteId,
        network: Vec<NetworkMember>,
        snapshot: Snapshot,
    ) -> Self {
        Self::SyncResponse {
            peer_id,
            site_id,
            network,
            initial_struct: snapshot.lines,
            initial_versions: snapshot.versions,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a text frame. Operations are also checked for well-formedness.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if let Some(op) = msg.as_operation() {
            op.validate()?;
        }
        Ok(msg)
    }

    /// The operation carried by an insert or delete frame.
    pub fn as_operation(&self) -> Option<Operation> {
        match self {
            Self::Insert { character, version } => {
                Some(Operation::insert(character.clone(), version.clone()))
            }
            Self::Delete { character, version } => {
                Some(Operation::delete(character.clone(), version.clone()))
            }
            _ => None,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::SyncRequest { .. } => "syncRequest",
            Self::SyncResponse { .. } => "syncResponse",
            Self::SyncCompleted { .. } => "syncCompleted",
            Self::NetworkUpdate { .. } => "networkUpdate",
            Self::NetworkRemove { .. } => "networkRemove",
        }
    }
}

impl From<Operation> for Message {
    fn from(op: Operation) -> Self {
        match op.kind {
            OpKind::Insert => Self::Insert {
                character: op.character,
                version: op.version,
            },
            OpKind::Delete => Self::Delete {
                character: op.character,
                version: op.version,
            },
        }
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid payload: {0}")]
    Invalid(#[from] CrdtError),
}
