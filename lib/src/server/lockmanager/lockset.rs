use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use keel_proto::nfs4_proto::{NfsFh4, NFS4_UINT64_MAX};

use super::stateid::{NfsState, StateIdRegistry};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockKind {
    Read,
    Write,
}

/// A byte range in internal form: `length == 0` means "to the end of file".
/// The wire form spells that as a length of `NFS4_UINT64_MAX`; conversion
/// happens at the protocol boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LockSpan {
    pub offset: u64,
    pub length: u64,
}

impl LockSpan {
    pub fn new(offset: u64, length: u64) -> Self {
        LockSpan { offset, length }
    }

    pub fn from_wire(offset: u64, length: u64) -> Self {
        if length == NFS4_UINT64_MAX {
            LockSpan { offset, length: 0 }
        } else {
            LockSpan { offset, length }
        }
    }

    pub fn wire_length(&self) -> u64 {
        if self.length == 0 {
            NFS4_UINT64_MAX
        } else {
            self.length
        }
    }

    // first byte past the range; u128 so offset + length cannot wrap
    fn past_end(&self) -> u128 {
        if self.length == 0 {
            1u128 << 64
        } else {
            self.offset as u128 + self.length as u128
        }
    }

    pub fn overlaps(&self, other: &LockSpan) -> bool {
        (self.offset as u128) < other.past_end() && (other.offset as u128) < self.past_end()
    }

    // overlapping or immediately adjacent
    fn touches(&self, other: &LockSpan) -> bool {
        (self.offset as u128) <= other.past_end() && (other.offset as u128) <= self.past_end()
    }

    fn from_bounds(offset: u128, past_end: u128) -> LockSpan {
        if past_end == 1u128 << 64 {
            LockSpan {
                offset: offset as u64,
                length: 0,
            }
        } else {
            LockSpan {
                offset: offset as u64,
                length: (past_end - offset) as u64,
            }
        }
    }

    fn merge(&self, other: &LockSpan) -> LockSpan {
        Self::from_bounds(
            (self.offset as u128).min(other.offset as u128),
            self.past_end().max(other.past_end()),
        )
    }

    // what is left of `self` once `cut` is taken out of it
    fn subtract(&self, cut: &LockSpan) -> Vec<LockSpan> {
        let mut pieces = Vec::new();
        if (self.offset as u128) < (cut.offset as u128) {
            pieces.push(Self::from_bounds(
                self.offset as u128,
                self.past_end().min(cut.offset as u128),
            ));
        }
        if cut.past_end() < self.past_end() {
            pieces.push(Self::from_bounds(
                cut.past_end().max(self.offset as u128),
                self.past_end(),
            ));
        }
        pieces
    }
}

/// One accepted byte-range lock on a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileLock {
    pub owner: u64,
    pub kind: LockKind,
    pub span: LockSpan,
}

/// The denial witness: the first conflicting lock in offset order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConflictingLock {
    pub owner: u64,
    pub kind: LockKind,
    pub span: LockSpan,
}

/// Accepted locks per file, ordered by offset, behind a per-file
/// reader-writer lock. Queries take the read side; `insert`/`remove` take
/// the write side and `insert` re-verifies conflicts after reacquisition,
/// since another request may have committed in between.
#[derive(Debug)]
pub struct FileLockSet {
    states: Arc<StateIdRegistry>,
    files: RwLock<HashMap<NfsFh4, Arc<RwLock<Vec<FileLock>>>>>,
}

impl FileLockSet {
    pub fn new(states: Arc<StateIdRegistry>) -> Self {
        FileLockSet {
            states,
            files: RwLock::new(HashMap::new()),
        }
    }

    /// The file's state objects, for the share-reservation scan.
    pub async fn iter_states(&self, filehandle_id: &NfsFh4) -> Vec<Arc<NfsState>> {
        self.states.states_for_file(filehandle_id).await
    }

    async fn entry(&self, filehandle_id: &NfsFh4) -> Arc<RwLock<Vec<FileLock>>> {
        if let Some(entry) = self.files.read().await.get(filehandle_id) {
            return entry.clone();
        }
        let mut files = self.files.write().await;
        files
            .entry(filehandle_id.clone())
            .or_insert_with(Default::default)
            .clone()
    }

    fn scan(
        locks: &[FileLock],
        span: &LockSpan,
        kind: LockKind,
        requesting_owner: Option<u64>,
    ) -> Option<ConflictingLock> {
        locks
            .iter()
            .find(|lock| {
                requesting_owner != Some(lock.owner)
                    && lock.span.overlaps(span)
                    && (kind == LockKind::Write || lock.kind == LockKind::Write)
            })
            .map(|lock| ConflictingLock {
                owner: lock.owner,
                kind: lock.kind,
                span: lock.span,
            })
    }

    /// First lock in offset order that denies the request, if any. A request
    /// without an owner (anonymous stateid) conflicts with every holder.
    pub async fn find_conflict(
        &self,
        filehandle_id: &NfsFh4,
        span: &LockSpan,
        kind: LockKind,
        requesting_owner: Option<u64>,
    ) -> Option<ConflictingLock> {
        let entry = match self.files.read().await.get(filehandle_id) {
            Some(entry) => entry.clone(),
            None => return None,
        };
        let locks = entry.read().await;
        Self::scan(&locks, span, kind, requesting_owner)
    }

    /// Record an accepted lock. The span displaces the owner's overlapping
    /// ranges of the other kind and coalesces with touching ranges of the
    /// same kind, so an owner's ranges never overlap each other.
    pub async fn insert(
        &self,
        filehandle_id: &NfsFh4,
        owner: u64,
        span: LockSpan,
        kind: LockKind,
    ) -> Result<(), ConflictingLock> {
        let entry = self.entry(filehandle_id).await;
        let mut locks = entry.write().await;
        if let Some(conflict) = Self::scan(&locks, &span, kind, Some(owner)) {
            return Err(conflict);
        }

        let mut merged = span;
        let mut kept = Vec::with_capacity(locks.len() + 1);
        for lock in locks.drain(..) {
            if lock.owner != owner {
                kept.push(lock);
            } else if lock.kind == kind && lock.span.touches(&span) {
                merged = merged.merge(&lock.span);
            } else if lock.kind != kind && lock.span.overlaps(&span) {
                for piece in lock.span.subtract(&span) {
                    kept.push(FileLock {
                        owner,
                        kind: lock.kind,
                        span: piece,
                    });
                }
            } else {
                kept.push(lock);
            }
        }
        kept.push(FileLock {
            owner,
            kind,
            span: merged,
        });
        kept.sort_by_key(|lock| lock.span.offset);
        *locks = kept;
        Ok(())
    }

    /// Release the span from the owner's ranges, splitting around holes.
    /// Reports whether the owner still holds any range on the file.
    pub async fn remove(&self, filehandle_id: &NfsFh4, owner: u64, span: LockSpan) -> bool {
        let entry = self.entry(filehandle_id).await;
        let mut locks = entry.write().await;
        let mut kept = Vec::with_capacity(locks.len());
        for lock in locks.drain(..) {
            if lock.owner != owner || !lock.span.overlaps(&span) {
                kept.push(lock);
            } else {
                for piece in lock.span.subtract(&span) {
                    kept.push(FileLock {
                        owner,
                        kind: lock.kind,
                        span: piece,
                    });
                }
            }
        }
        kept.sort_by_key(|lock| lock.span.offset);
        *locks = kept;
        locks.iter().any(|lock| lock.owner == owner)
    }

    /// The owner's current ranges on a file, in offset order.
    pub async fn ranges_of(&self, filehandle_id: &NfsFh4, owner: u64) -> Vec<(LockSpan, LockKind)> {
        let entry = match self.files.read().await.get(filehandle_id) {
            Some(entry) => entry.clone(),
            None => return Vec::new(),
        };
        let locks = entry.read().await;
        locks
            .iter()
            .filter(|lock| lock.owner == owner)
            .map(|lock| (lock.span, lock.kind))
            .collect()
    }
}
