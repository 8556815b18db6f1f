use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use multi_index_map::MultiIndexMap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use keel_proto::nfs4_proto::{NfsFh4, NFS4_OTHER_SIZE};

/// The opaque 12-byte body of a stateid.
pub type StateidOther = [u8; NFS4_OTHER_SIZE as usize];

/// Payload of a server-side state object.
#[derive(Debug)]
pub enum StateData {
    /// Share reservation established by OPEN.
    Share {
        share_access: u32,
        share_deny: u32,
        // number of lock states hanging off this reservation
        lockheld: u32,
    },
    /// Byte-range lock state; `open_stateid` names the share reservation the
    /// lock owner was derived from.
    Lock { open_stateid: StateidOther },
}

/// One granted stateid and the state behind it.
///
/// `seqid` advances by one per confirmed mutation of this state and is
/// guarded on its own so it can move independently of the registry.
#[derive(Debug)]
pub struct NfsState {
    pub other: StateidOther,
    pub filehandle_id: NfsFh4,
    // key into the owner table
    pub owner: u64,
    pub seqid: Mutex<u32>,
    pub data: Mutex<StateData>,
}

impl NfsState {
    pub async fn current_seqid(&self) -> u32 {
        *self.seqid.lock().await
    }

    pub async fn bump_seqid(&self) -> u32 {
        let mut seqid = self.seqid.lock().await;
        *seqid += 1;
        *seqid
    }

    pub async fn is_share(&self) -> bool {
        matches!(*self.data.lock().await, StateData::Share { .. })
    }

    pub async fn is_lock(&self) -> bool {
        matches!(*self.data.lock().await, StateData::Lock { .. })
    }

    /// Access and deny bits, for share reservations.
    pub async fn share_flags(&self) -> Option<(u32, u32)> {
        match *self.data.lock().await {
            StateData::Share {
                share_access,
                share_deny,
                ..
            } => Some((share_access, share_deny)),
            StateData::Lock { .. } => None,
        }
    }

    /// The share reservation a lock state hangs off.
    pub async fn open_ref(&self) -> Option<StateidOther> {
        match *self.data.lock().await {
            StateData::Lock { open_stateid } => Some(open_stateid),
            StateData::Share { .. } => None,
        }
    }

    pub async fn lockheld(&self) -> u32 {
        match *self.data.lock().await {
            StateData::Share { lockheld, .. } => lockheld,
            StateData::Lock { .. } => 0,
        }
    }

    pub async fn incr_lockheld(&self) {
        if let StateData::Share { lockheld, .. } = &mut *self.data.lock().await {
            *lockheld += 1;
        }
    }

    pub async fn decr_lockheld(&self) {
        if let StateData::Share { lockheld, .. } = &mut *self.data.lock().await {
            if *lockheld > 0 {
                *lockheld -= 1;
            }
        }
    }
}

#[derive(MultiIndexMap, Debug, Clone)]
#[multi_index_derive(Debug, Clone)]
pub struct StateRecord {
    #[multi_index(hashed_unique)]
    pub other: StateidOther,
    #[multi_index(hashed_non_unique)]
    pub filehandle_id: NfsFh4,
    #[multi_index(hashed_non_unique)]
    pub owner: u64,
    pub state: Arc<NfsState>,
}

type StateDb = MultiIndexStateRecordMap;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    #[error("stateid is not known to this server")]
    NotFound,
    #[error("malformed stateid")]
    Invalid,
}

/// Process-wide mapping from the opaque stateid body to the state object.
///
/// Minted identifiers are a boot-time prefix plus a sequence number, so they
/// are unique for the life of the process and the special all-zero and
/// all-ones forms can never collide with a granted stateid.
#[derive(Debug)]
pub struct StateIdRegistry {
    boot_time: u64,
    next_stateid_id: AtomicU64,
    db: RwLock<StateDb>,
}

impl StateIdRegistry {
    pub fn new() -> Self {
        let boot_time = std::time::UNIX_EPOCH.elapsed().unwrap().as_secs();
        StateIdRegistry {
            boot_time,
            next_stateid_id: AtomicU64::new(100),
            db: RwLock::new(StateDb::default()),
        }
    }

    fn mint_other(&self) -> StateidOther {
        let mut id = Vec::with_capacity(NFS4_OTHER_SIZE as usize);
        id.extend((self.boot_time as u32).to_be_bytes().to_vec());
        id.extend(
            self.next_stateid_id
                .fetch_add(1, Ordering::Relaxed)
                .to_be_bytes()
                .to_vec(),
        );
        id.try_into().unwrap()
    }

    /// Create a state with a fresh stateid, `seqid` starting at zero.
    pub async fn mint(&self, filehandle_id: &NfsFh4, owner: u64, data: StateData) -> Arc<NfsState> {
        let other = self.mint_other();
        let state = Arc::new(NfsState {
            other,
            filehandle_id: filehandle_id.clone(),
            owner,
            seqid: Mutex::new(0),
            data: Mutex::new(data),
        });
        self.db.write().await.insert(StateRecord {
            other,
            filehandle_id: filehandle_id.clone(),
            owner,
            state: state.clone(),
        });
        state
    }

    pub async fn resolve(&self, other: &[u8]) -> Result<Arc<NfsState>, ResolveError> {
        let other: StateidOther = other.try_into().map_err(|_| ResolveError::Invalid)?;
        self.db
            .read()
            .await
            .get_by_other(&other)
            .map(|record| record.state.clone())
            .ok_or(ResolveError::NotFound)
    }

    pub async fn remove(&self, other: &StateidOther) -> Option<Arc<NfsState>> {
        self.db
            .write()
            .await
            .remove_by_other(other)
            .map(|record| record.state)
    }

    /// All states granted on a file, in no particular order.
    pub async fn states_for_file(&self, filehandle_id: &NfsFh4) -> Vec<Arc<NfsState>> {
        self.db
            .read()
            .await
            .get_by_filehandle_id(filehandle_id)
            .into_iter()
            .map(|record| record.state.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.db.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for StateIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
