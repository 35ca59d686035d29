//! Character-level CRDT for collaborative plain-text editing.
//!
//! Every character carries a position path that sorts it among all others,
//! so concurrent inserts commute. A version vector with exceptions gates
//! remote operations so each is applied exactly once, in any delivery
//! order, and deletes that overtake their insert wait in a buffer.
//!
//! ```text
//!   local edit ──► CharStore ──► VersionVector::increment ──► Operation ──► mesh
//!
//!   mesh ──► Operation ──► has_been_applied? ──┬─ insert ──► CharStore
//!                                              └─ delete ──► DeleteBuffer ──► CharStore
//! ```

pub mod allocator;
pub mod buffer;
pub mod character;
pub mod error;
pub mod identifier;
pub mod operation;
pub mod replica;
pub mod store;
pub mod version;

/// Identity of one editing site.
pub type SiteId = uuid::Uuid;

pub use allocator::PositionAllocator;
pub use buffer::DeleteBuffer;
pub use character::Char;
pub use error::CrdtError;
pub use identifier::{Identifier, Position};
pub use operation::{OpKind, Operation};
pub use replica::{RemoteOutcome, Replica, Snapshot, TextChange, MAX_COUNTER_GAP};
pub use store::{CharStore, LineCol};
pub use version::{Version, VersionVector};

/// Fresh random site identity.
pub fn new_site_id() -> SiteId {
    uuid::Uuid::new_v4()
}
