use serde::{Deserialize, Serialize};

use crate::character::Char;
use crate::error::CrdtError;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Delete,
}

/// The unit of replication: one inserted or deleted character, stamped with
/// the originating site's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OpKind,
    #[serde(rename = "char")]
    pub character: Char,
    pub version: Version,
}

impl Operation {
    pub fn insert(character: Char, version: Version) -> Self {
        Self {
            kind: OpKind::Insert,
            character,
            version,
        }
    }

    pub fn delete(character: Char, version: Version) -> Self {
        Self {
            kind: OpKind::Delete,
            character,
            version,
        }
    }

    pub fn validate(&self) -> Result<(), CrdtError> {
        self.character.validate()?;
        if self.version.counter == 0 {
            return Err(CrdtError::MalformedOperation("version counter must start at 1".into()));
        }
        if self.kind == OpKind::Insert
            && (self.version.site_id != self.character.site_id
                || self.version.counter != self.character.counter)
        {
            return Err(CrdtError::MalformedOperation(
                "insert stamp does not match its character".into(),
            ));
        }
        Ok(())
    }
}
