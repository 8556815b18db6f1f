use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use keel_proto::nfs4_proto::{LockOwner4, NFS4_OPAQUE_LIMIT};

use super::stateid::StateidOther;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OwnerKind {
    Open,
    Lock,
}

/// Canonical form of a wire owner.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct OwnerName {
    pub clientid: u64,
    pub owner: Vec<u8>,
}

/// Canonicalize the owner carried in a LOCK/LOCKT argument. `None` means the
/// wire encoding is unusable and the operation must fail with SERVERFAULT.
pub fn convert_nfs4_owner(wire_owner: &LockOwner4) -> Option<OwnerName> {
    if wire_owner.owner.is_empty() || wire_owner.owner.len() > NFS4_OPAQUE_LIMIT as usize {
        return None;
    }
    Some(OwnerName {
        clientid: wire_owner.clientid,
        owner: wire_owner.owner.clone(),
    })
}

/// An open owner or lock owner. `so_seqid` sits behind its own mutex; when
/// both a lock owner and its related open owner advance, the lock owner's
/// mutex is taken first.
#[derive(Debug)]
pub struct StateOwner {
    pub key: u64,
    pub kind: OwnerKind,
    pub clientid: u64,
    pub owner: Vec<u8>,
    pub so_seqid: Mutex<u32>,
    // for lock owners, the open owner they were derived from
    pub related_open_owner: Option<u64>,
    // stateids currently held under this owner
    pub so_states: Mutex<HashSet<StateidOther>>,
}

impl StateOwner {
    pub async fn current_seqid(&self) -> u32 {
        *self.so_seqid.lock().await
    }

    pub async fn bump_seqid(&self) -> u32 {
        let mut seqid = self.so_seqid.lock().await;
        *seqid += 1;
        *seqid
    }
}

#[derive(Debug, Default)]
struct OwnerDb {
    by_name: HashMap<(OwnerKind, u64, Vec<u8>), u64>,
    owners: HashMap<u64, Arc<StateOwner>>,
    next_key: u64,
}

/// Canonical set of owners. Two owners are the same owner iff their
/// `(clientid, owner bytes)` agree within their kind; open owners and lock
/// owners with identical names are distinct protocol principals.
#[derive(Debug)]
pub struct OwnerTable {
    inner: RwLock<OwnerDb>,
}

impl OwnerTable {
    pub fn new() -> Self {
        OwnerTable {
            inner: RwLock::new(OwnerDb {
                by_name: HashMap::new(),
                owners: HashMap::new(),
                next_key: 1,
            }),
        }
    }

    async fn lookup_or_create(
        &self,
        kind: OwnerKind,
        clientid: u64,
        owner: &[u8],
        related_open_owner: Option<u64>,
    ) -> u64 {
        let name = (kind, clientid, owner.to_vec());
        if let Some(key) = self.inner.read().await.by_name.get(&name) {
            return *key;
        }
        let mut db = self.inner.write().await;
        // another request may have raced the creation
        if let Some(key) = db.by_name.get(&name) {
            return *key;
        }
        let key = db.next_key;
        db.next_key += 1;
        let state_owner = Arc::new(StateOwner {
            key,
            kind,
            clientid,
            owner: owner.to_vec(),
            so_seqid: Mutex::new(0),
            related_open_owner,
            so_states: Mutex::new(HashSet::new()),
        });
        db.by_name.insert(name, key);
        db.owners.insert(key, state_owner);
        key
    }

    pub async fn lookup_or_create_open(&self, clientid: u64, owner: &[u8]) -> u64 {
        self.lookup_or_create(OwnerKind::Open, clientid, owner, None)
            .await
    }

    pub async fn lookup_or_create_lock(
        &self,
        clientid: u64,
        owner: &[u8],
        related_open_owner: u64,
    ) -> u64 {
        self.lookup_or_create(OwnerKind::Lock, clientid, owner, Some(related_open_owner))
            .await
    }

    /// Resolve a lock owner without creating it (LOCKT has no state to hang
    /// a new owner off).
    pub async fn lookup_lock(&self, clientid: u64, owner: &[u8]) -> Option<u64> {
        self.inner
            .read()
            .await
            .by_name
            .get(&(OwnerKind::Lock, clientid, owner.to_vec()))
            .copied()
    }

    pub async fn get(&self, key: u64) -> Option<Arc<StateOwner>> {
        self.inner.read().await.owners.get(&key).cloned()
    }

    pub async fn current_seqid(&self, key: u64) -> Option<u32> {
        match self.get(key).await {
            Some(owner) => Some(owner.current_seqid().await),
            None => None,
        }
    }

    pub async fn bump_seqid(&self, key: u64) -> Option<u32> {
        match self.get(key).await {
            Some(owner) => Some(owner.bump_seqid().await),
            None => None,
        }
    }

    pub async fn attach_state(&self, key: u64, other: StateidOther) {
        if let Some(owner) = self.get(key).await {
            owner.so_states.lock().await.insert(other);
        }
    }

    pub async fn detach_state(&self, key: u64, other: &StateidOther) {
        if let Some(owner) = self.get(key).await {
            owner.so_states.lock().await.remove(other);
        }
    }
}

impl Default for OwnerTable {
    fn default() -> Self {
        Self::new()
    }
}
