use crate::operation::Operation;

/// Deletes that arrived before the insert they target.
///
/// Entries leave only by being handed back through [`take_ready`]; a delete
/// whose insert never arrives stays here for the life of the replica.
///
/// [`take_ready`]: DeleteBuffer::take_ready
#[derive(Debug, Clone, Default)]
pub struct DeleteBuffer {
    pending: Vec<Operation>,
}

impl DeleteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `op`. Returns `false` if a delete with the same stamp is
    /// already waiting.
    pub fn push(&mut self, op: Operation) -> bool {
        let stamp = (op.version.site_id, op.version.counter);
        if self
            .pending
            .iter()
            .any(|p| (p.version.site_id, p.version.counter) == stamp)
        {
            return false;
        }
        self.pending.push(op);
        true
    }

    /// Removes and returns every pending delete for which `ready` holds,
    /// preserving arrival order.
    pub fn take_ready(&mut self, mut ready: impl FnMut(&Operation) -> bool) -> Vec<Operation> {
        let (now, later): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|op| ready(op));
        self.pending = later;
        now
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
