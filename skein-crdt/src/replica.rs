//! One site's copy of the document.
//!
//! `Replica` owns the character store, the version vector and the delete
//! buffer, and is the only way operations get into any of them. Every remote
//! operation passes the "already applied?" gate exactly once.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::allocator::PositionAllocator;
use crate::buffer::DeleteBuffer;
use crate::character::Char;
use crate::error::CrdtError;
use crate::operation::{OpKind, Operation};
use crate::store::{CharStore, LineCol};
use crate::version::{Version, VersionVector};
use crate::SiteId;

/// Largest forward jump in one site's counter accepted from the network.
/// Every skipped counter becomes a version exception.
pub const MAX_COUNTER_GAP: u64 = 1 << 20;

/// A visible change caused by a remote operation, in editor coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChange {
    Insert {
        value: char,
        at: LineCol,
        site_id: SiteId,
    },
    Delete {
        value: char,
        from: LineCol,
        to: LineCol,
        site_id: SiteId,
    },
}

/// Result of feeding a remote operation to a replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutcome {
    /// `true` if the operation was new here and should be flooded onward.
    pub fresh: bool,
    pub changes: Vec<TextChange>,
}

/// Whole-document state handed to a joining site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub lines: Vec<Vec<Char>>,
    pub versions: Vec<Version>,
}

#[derive(Debug, Clone)]
pub struct Replica {
    site_id: SiteId,
    store: CharStore,
    vector: VersionVector,
    buffer: DeleteBuffer,
}

impl Replica {
    pub fn new(site_id: SiteId) -> Self {
        Self::with_allocator(PositionAllocator::new(site_id))
    }

    /// Replica with a deterministic allocator.
    pub fn with_seed(site_id: SiteId, seed: u64) -> Self {
        Self::with_allocator(PositionAllocator::with_seed(site_id, seed))
    }

    pub fn with_allocator(allocator: PositionAllocator) -> Self {
        let site_id = allocator.site_id();
        Self {
            site_id,
            store: CharStore::new(allocator),
            vector: VersionVector::new(site_id),
            buffer: DeleteBuffer::new(),
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn store(&self) -> &CharStore {
        &self.store
    }

    pub fn vector(&self) -> &VersionVector {
        &self.vector
    }

    pub fn to_text(&self) -> String {
        self.store.to_text()
    }

    pub fn total_chars(&self) -> usize {
        self.store.total_chars()
    }

    pub fn pending_deletes(&self) -> usize {
        self.buffer.len()
    }

    // ---------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------

    /// Inserts `text` starting at `at` and returns one insert operation per
    /// character.
    pub fn local_insert(&mut self, text: &str, at: LineCol) -> Result<Vec<Operation>, CrdtError> {
        let mut cursor = at;
        let mut ops = Vec::with_capacity(text.len());

        for value in text.chars() {
            // The store only accepts the edit if `cursor` is valid, so the
            // clock advances after it succeeds.
            let counter = self.vector.local_version().counter + 1;
            let ch = self.store.handle_local_insert(value, cursor, counter)?;
            let version = self.vector.increment();
            debug_assert_eq!(version.counter, counter);

            cursor = if ch.is_newline() {
                LineCol::new(cursor.line + 1, 0)
            } else {
                LineCol::new(cursor.line, cursor.ch + 1)
            };
            ops.push(Operation::insert(ch, version));
        }
        Ok(ops)
    }

    /// Deletes `start..end` and returns one delete operation per removed
    /// character.
    pub fn local_delete(&mut self, start: LineCol, end: LineCol) -> Result<Vec<Operation>, CrdtError> {
        let removed = self.store.handle_local_delete(start, end)?;
        Ok(removed
            .into_iter()
            .map(|ch| Operation::delete(ch, self.vector.increment()))
            .collect())
    }

    // ---------------------------------------------------------------
    // Remote operations
    // ---------------------------------------------------------------

    /// Applies a remote operation, deferring deletes whose insert has not
    /// arrived yet.
    pub fn apply_remote(&mut self, op: Operation) -> Result<RemoteOutcome, CrdtError> {
        op.validate()?;
        let known = self.vector.get(&op.version.site_id).map_or(0, |v| v.counter);
        if op.version.counter > known.saturating_add(MAX_COUNTER_GAP) {
            return Err(CrdtError::MalformedOperation(format!(
                "counter {} is too far ahead of {known}",
                op.version.counter
            )));
        }

        if self.vector.has_been_applied(op.version.site_id, op.version.counter) {
            trace!("duplicate {:?} from {}:{}", op.kind, op.version.site_id, op.version.counter);
            return Ok(RemoteOutcome::default());
        }

        let mut outcome = RemoteOutcome {
            fresh: true,
            changes: Vec::new(),
        };

        match op.kind {
            OpKind::Insert => {
                trace!("insert {:?} from {}:{}", op.character.value, op.version.site_id, op.version.counter);
                self.vector.update(&op.version);
                let value = op.character.value;
                match self.store.handle_remote_insert(op.character) {
                    Some(at) => outcome.changes.push(TextChange::Insert {
                        value,
                        at,
                        site_id: op.version.site_id,
                    }),
                    None => debug!(
                        "insert {}:{} lands on an occupied position",
                        op.version.site_id, op.version.counter
                    ),
                }
            }
            OpKind::Delete => {
                if !self.buffer.push(op) {
                    outcome.fresh = false;
                }
            }
        }

        self.drain_buffer(&mut outcome.changes);
        Ok(outcome)
    }

    /// Applies buffered deletes until none is ready.
    fn drain_buffer(&mut self, changes: &mut Vec<TextChange>) {
        loop {
            let vector = &self.vector;
            let ready = self
                .buffer
                .take_ready(|op| vector.has_been_applied(op.character.site_id, op.character.counter));
            if ready.is_empty() {
                break;
            }
            for op in ready {
                self.apply_delete(op, changes);
            }
        }
        if !self.buffer.is_empty() {
            debug!("{} deletes waiting for their inserts", self.buffer.len());
        }
    }

    fn apply_delete(&mut self, op: Operation, changes: &mut Vec<TextChange>) {
        if self.vector.has_been_applied(op.version.site_id, op.version.counter) {
            return;
        }
        trace!("delete {:?} from {}:{}", op.character.value, op.version.site_id, op.version.counter);
        if let Some(from) = self.store.handle_remote_delete(&op.character) {
            let to = if op.character.is_newline() {
                LineCol::new(from.line + 1, 0)
            } else {
                LineCol::new(from.line, from.ch + 1)
            };
            changes.push(TextChange::Delete {
                value: op.character.value,
                from,
                to,
                site_id: op.version.site_id,
            });
        }
        self.vector.update(&op.version);
    }

    // ---------------------------------------------------------------
    // Sync
    // ---------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            lines: self.store.lines().to_vec(),
            versions: self.vector.snapshot(),
        }
    }

    /// Adopts `snapshot` as the starting state if this replica is empty.
    ///
    /// Returns `Ok(false)` without touching anything when there is local
    /// content; a snapshot is never merged into an existing document.
    pub fn adopt_snapshot(&mut self, snapshot: Snapshot) -> Result<bool, CrdtError> {
        if !self.store.is_empty() {
            return Ok(false);
        }

        let chars: Vec<Char> = snapshot.lines.into_iter().flatten().collect();
        for ch in &chars {
            ch.validate()?;
        }
        if let Some(i) = chars.windows(2).position(|w| w[0].position >= w[1].position) {
            return Err(CrdtError::MalformedSnapshot(format!(
                "characters {i} and {} are out of order",
                i + 1
            )));
        }

        self.store.replace_chars(chars);
        self.vector.adopt(snapshot.versions);
        // Deletes buffered before the sync may now find their targets.
        let mut ignored = Vec::new();
        self.drain_buffer(&mut ignored);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{Identifier, Position};
    use uuid::Uuid;

    fn pair() -> (Replica, Replica) {
        (
            Replica::with_seed(Uuid::from_u128(1), 1),
            Replica::with_seed(Uuid::from_u128(2), 2),
        )
    }

    #[test]
    fn test_local_insert_stamps_counters() {
        let (mut a, _) = pair();
        let ops = a.local_insert("hi\nyo", LineCol::new(0, 0)).unwrap();

        assert_eq!(ops.len(), 5);
        for (i, op) in ops.iter().enumerate() {
            assert_eq!(op.kind, OpKind::Insert);
            assert_eq!(op.version.counter, i as u64 + 1);
            assert_eq!(op.character.counter, op.version.counter);
        }
        assert_eq!(a.to_text(), "hi\nyo");
        assert_eq!(a.store().lines().len(), 2);
    }

    #[test]
    fn test_local_insert_out_of_bounds_leaves_clock() {
        let (mut a, _) = pair();
        assert!(a.local_insert("x", LineCol::new(3, 0)).is_err());
        assert_eq!(a.vector().local_version().counter, 0);
        assert_eq!(a.total_chars(), 0);
    }

    #[test]
    fn test_local_delete_stamps_each_char() {
        let (mut a, _) = pair();
        a.local_insert("abc", LineCol::new(0, 0)).unwrap();
        let ops = a.local_delete(LineCol::new(0, 0), LineCol::new(0, 2)).unwrap();

        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.kind == OpKind::Delete));
        assert_eq!(ops[0].version.counter, 4);
        assert_eq!(ops[1].version.counter, 5);
        assert_eq!(a.to_text(), "c");
    }

    #[test]
    fn test_remote_round_trip() {
        let (mut a, mut b) = pair();
        for op in a.local_insert("hello", LineCol::new(0, 0)).unwrap() {
            assert!(b.apply_remote(op).unwrap().fresh);
        }
        assert_eq!(b.to_text(), "hello");

        for op in a.local_delete(LineCol::new(0, 1), LineCol::new(0, 3)).unwrap() {
            b.apply_remote(op).unwrap();
        }
        assert_eq!(b.to_text(), "hlo");
    }

    #[test]
    fn test_duplicate_is_not_fresh() {
        let (mut a, mut b) = pair();
        let op = a.local_insert("x", LineCol::new(0, 0)).unwrap().remove(0);

        assert!(b.apply_remote(op.clone()).unwrap().fresh);
        let again = b.apply_remote(op).unwrap();
        assert!(!again.fresh);
        assert!(again.changes.is_empty());
        assert_eq!(b.to_text(), "x");
    }

    #[test]
    fn test_delete_before_insert_is_buffered() {
        let (mut a, mut b) = pair();
        let insert = a.local_insert("x", LineCol::new(0, 0)).unwrap().remove(0);
        let delete = a.local_delete(LineCol::new(0, 0), LineCol::new(0, 1)).unwrap().remove(0);

        let outcome = b.apply_remote(delete.clone()).unwrap();
        assert!(outcome.fresh);
        assert!(outcome.changes.is_empty());
        assert_eq!(b.pending_deletes(), 1);

        // The same pending delete again is not new.
        assert!(!b.apply_remote(delete).unwrap().fresh);

        let outcome = b.apply_remote(insert).unwrap();
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(b.to_text(), "");
        assert_eq!(b.pending_deletes(), 0);
    }

    #[test]
    fn test_remote_changes_report_editor_coordinates() {
        let (mut a, mut b) = pair();
        for op in a.local_insert("ab\ncd", LineCol::new(0, 0)).unwrap() {
            b.apply_remote(op).unwrap();
        }
        let delete = a.local_delete(LineCol::new(0, 2), LineCol::new(1, 0)).unwrap().remove(0);
        let outcome = b.apply_remote(delete).unwrap();

        assert_eq!(
            outcome.changes,
            vec![TextChange::Delete {
                value: '\n',
                from: LineCol::new(0, 2),
                to: LineCol::new(1, 0),
                site_id: a.site_id(),
            }]
        );
        assert_eq!(b.to_text(), "abcd");
    }

    #[test]
    fn test_malformed_operation_rejected() {
        let (mut a, mut b) = pair();
        let mut op = a.local_insert("x", LineCol::new(0, 0)).unwrap().remove(0);
        op.character.counter = 0;
        assert!(b.apply_remote(op).is_err());
        assert_eq!(b.total_chars(), 0);
    }

    #[test]
    fn test_runaway_counter_rejected() {
        let (mut a, mut b) = pair();
        let mut op = a.local_insert("x", LineCol::new(0, 0)).unwrap().remove(0);
        op.version.counter = u64::MAX;
        op.character.counter = u64::MAX;

        assert!(matches!(b.apply_remote(op), Err(CrdtError::MalformedOperation(_))));
        assert!(b.vector().get(&a.site_id()).is_none());
    }

    #[test]
    fn test_retyping_one_spot_reorders_safely() {
        let (mut a, mut b) = pair();
        let mut ops = Vec::new();
        for round in 0..40 {
            let value = if round % 2 == 0 { "x" } else { "y" };
            ops.extend(a.local_insert(value, LineCol::new(0, 0)).unwrap());
            ops.extend(a.local_delete(LineCol::new(0, 0), LineCol::new(0, 1)).unwrap());
        }
        let kept = a.local_insert("y", LineCol::new(0, 0)).unwrap();

        let positions: std::collections::HashSet<_> = ops
            .iter()
            .chain(&kept)
            .filter(|op| op.kind == OpKind::Insert)
            .map(|op| op.character.position.clone())
            .collect();
        assert_eq!(positions.len(), 41);

        // Newest insert first, then every earlier delete ahead of its insert.
        for op in kept.into_iter().chain(ops.into_iter().rev()) {
            b.apply_remote(op).unwrap();
        }
        assert_eq!(a.to_text(), "y");
        assert_eq!(b.to_text(), "y");
        assert_eq!(b.pending_deletes(), 0);
    }

    #[test]
    fn test_oversized_digit_rejected() {
        let (mut a, mut b) = pair();
        let typed = a.local_insert("r", LineCol::new(0, 0)).unwrap().remove(0);
        b.apply_remote(typed.clone()).unwrap();

        let mut forged = typed;
        forged.version.counter = 2;
        forged.character.counter = 2;
        forged.character.position = Position::from(vec![Identifier::new(u64::MAX, a.site_id())]);
        assert!(matches!(b.apply_remote(forged), Err(CrdtError::MalformedChar(_))));
        assert_eq!(b.to_text(), "r");

        let reply = b.local_insert("z", LineCol::new(0, 1)).unwrap().remove(0);
        assert!(reply.validate().is_ok());
        a.apply_remote(reply).unwrap();
        assert_eq!(a.to_text(), "rz");
        assert_eq!(b.to_text(), "rz");
    }

    #[test]
    fn test_snapshot_adopted_only_when_empty() {
        let (mut a, mut b) = pair();
        a.local_insert("shared", LineCol::new(0, 0)).unwrap();

        assert!(b.adopt_snapshot(a.snapshot()).unwrap());
        assert_eq!(b.to_text(), "shared");
        assert!(b.vector().has_been_applied(a.site_id(), 6));

        let mut c = Replica::with_seed(Uuid::from_u128(3), 3);
        c.local_insert("mine", LineCol::new(0, 0)).unwrap();
        assert!(!c.adopt_snapshot(a.snapshot()).unwrap());
        assert_eq!(c.to_text(), "mine");
    }

    #[test]
    fn test_snapshot_rejects_unordered_chars() {
        let (mut a, mut b) = pair();
        a.local_insert("ab", LineCol::new(0, 0)).unwrap();
        let mut snapshot = a.snapshot();
        snapshot.lines[0].reverse();

        assert!(matches!(
            b.adopt_snapshot(snapshot),
            Err(CrdtError::MalformedSnapshot(_))
        ));
        assert_eq!(b.total_chars(), 0);
    }

    #[test]
    fn test_edits_after_sync_reach_source() {
        let (mut a, mut b) = pair();
        a.local_insert("ac", LineCol::new(0, 0)).unwrap();
        b.adopt_snapshot(a.snapshot()).unwrap();

        for op in b.local_insert("b", LineCol::new(0, 1)).unwrap() {
            a.apply_remote(op).unwrap();
        }
        assert_eq!(a.to_text(), "abc");
        assert_eq!(b.to_text(), "abc");
    }
}
