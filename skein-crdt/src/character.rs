use serde::{Deserialize, Serialize};

use crate::allocator::PositionAllocator;
use crate::error::CrdtError;
use crate::identifier::Position;
use crate::SiteId;

/// One replicated character.
///
/// `(site_id, counter)` identifies the insert that created it; `position`
/// is its sort key. Both are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Char {
    pub value: char,
    pub counter: u64,
    pub site_id: SiteId,
    pub position: Position,
}

impl Char {
    pub fn new(value: char, counter: u64, site_id: SiteId, position: Position) -> Self {
        Self {
            value,
            counter,
            site_id,
            position,
        }
    }

    pub fn is_newline(&self) -> bool {
        self.value == '\n'
    }

    /// Checks the invariants a remote peer could violate.
    pub fn validate(&self) -> Result<(), CrdtError> {
        if self.counter == 0 {
            return Err(CrdtError::MalformedChar("counter must start at 1".into()));
        }
        let path = self.position.identifiers();
        if let Some((level, id)) = path
            .iter()
            .enumerate()
            .find(|(level, id)| id.digit >= PositionAllocator::level_base(*level))
        {
            return Err(CrdtError::MalformedChar(format!(
                "digit {} exceeds base of level {level}",
                id.digit
            )));
        }
        match path.last() {
            None => Err(CrdtError::MalformedChar("empty position path".into())),
            // Allocated digits are never zero at the leaf; nothing fits below such a path.
            Some(leaf) if leaf.digit == 0 => {
                Err(CrdtError::MalformedChar("position path ends in digit 0".into()))
            }
            Some(_) => Ok(()),
        }
    }
}
