use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use keel_proto::nfs4_proto::{NfsFh4, NfsStat4};

use super::lockset::{ConflictingLock, FileLockSet, LockKind, LockSpan};
use super::stateid::{NfsState, ResolveError, StateData, StateIdRegistry};

/// Whether a denied request wants a callback-driven retry. NFSv4 blocking
/// never parks a server thread; it only makes the denial eligible for the
/// waiter list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Blocking {
    NonBlocking,
    NfsV4Blocking,
}

/// Status codes crossing the state abstraction boundary.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum StateStatus {
    #[error("state not found")]
    NotFound,
    #[error("state error")]
    StateError,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("lock conflict")]
    LockConflict,
    #[error("allocation failed")]
    AllocFailed,
}

/// Translate a state status into the protocol status the compound reports.
pub fn nfs4_errno_state(status: StateStatus) -> NfsStat4 {
    match status {
        StateStatus::NotFound => NfsStat4::Nfs4errStaleStateid,
        StateStatus::InvalidArgument => NfsStat4::Nfs4errInval,
        StateStatus::LockConflict => NfsStat4::Nfs4errDenied,
        StateStatus::StateError | StateStatus::AllocFailed => NfsStat4::Nfs4errServerfault,
    }
}

/// How `state_lock` refuses a request.
#[derive(Debug, Error)]
pub enum StateLockError {
    #[error("conflicting lock held by owner {}", .0.owner)]
    Conflict(ConflictingLock),
    #[error(transparent)]
    Status(StateStatus),
}

/// The storage abstraction layer as the lock engine consumes it: state
/// lookup and lifetime, plus the lock and unlock pushes that end up at the
/// file system. Accepted ranges are mirrored into the engine's per-file
/// lock set only after these calls succeed.
#[async_trait]
pub trait SalAdapter: Debug + Send + Sync {
    async fn state_get(&self, other: &[u8]) -> Result<Arc<NfsState>, StateStatus>;

    async fn state_add(
        &self,
        filehandle_id: &NfsFh4,
        data: StateData,
        owner: u64,
    ) -> Result<Arc<NfsState>, StateStatus>;

    async fn state_del(&self, state: &NfsState) -> Result<(), StateStatus>;

    async fn state_lock(
        &self,
        filehandle_id: &NfsFh4,
        owner: Option<u64>,
        state: Option<&NfsState>,
        blocking: Blocking,
        span: LockSpan,
        kind: LockKind,
    ) -> Result<(), StateLockError>;

    async fn state_unlock(
        &self,
        filehandle_id: &NfsFh4,
        owner: u64,
        state: &NfsState,
        span: LockSpan,
    ) -> Result<(), StateStatus>;

    async fn state_iterate(&self, filehandle_id: &NfsFh4)
        -> Result<Vec<Arc<NfsState>>, StateStatus>;
}

#[derive(Debug)]
struct LockWaiter {
    filehandle_id: NfsFh4,
    owner: Option<u64>,
    span: LockSpan,
    kind: LockKind,
}

/// In-process SAL over the shared stateid registry and lock set. Blocked
/// NFSv4 requests are remembered per `(file, range)` so a callback layer can
/// prod the client once the conflicting range is released.
#[derive(Debug)]
pub struct MemorySal {
    states: Arc<StateIdRegistry>,
    locks: Arc<FileLockSet>,
    waiters: Mutex<Vec<LockWaiter>>,
}

impl MemorySal {
    pub fn new(states: Arc<StateIdRegistry>, locks: Arc<FileLockSet>) -> Self {
        MemorySal {
            states,
            locks,
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub async fn waiter_count(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

#[async_trait]
impl SalAdapter for MemorySal {
    async fn state_get(&self, other: &[u8]) -> Result<Arc<NfsState>, StateStatus> {
        self.states.resolve(other).await.map_err(|e| match e {
            ResolveError::NotFound => StateStatus::NotFound,
            ResolveError::Invalid => StateStatus::InvalidArgument,
        })
    }

    async fn state_add(
        &self,
        filehandle_id: &NfsFh4,
        data: StateData,
        owner: u64,
    ) -> Result<Arc<NfsState>, StateStatus> {
        Ok(self.states.mint(filehandle_id, owner, data).await)
    }

    async fn state_del(&self, state: &NfsState) -> Result<(), StateStatus> {
        match self.states.remove(&state.other).await {
            Some(_) => Ok(()),
            None => Err(StateStatus::NotFound),
        }
    }

    async fn state_lock(
        &self,
        filehandle_id: &NfsFh4,
        owner: Option<u64>,
        _state: Option<&NfsState>,
        blocking: Blocking,
        span: LockSpan,
        kind: LockKind,
    ) -> Result<(), StateLockError> {
        if let Some(conflict) = self
            .locks
            .find_conflict(filehandle_id, &span, kind, owner)
            .await
        {
            if blocking == Blocking::NfsV4Blocking {
                debug!(?span, "parking blocked lock request for retry");
                self.waiters.lock().await.push(LockWaiter {
                    filehandle_id: filehandle_id.clone(),
                    owner,
                    span,
                    kind,
                });
            }
            return Err(StateLockError::Conflict(conflict));
        }
        // the accepted range is recorded by the caller; a remote SAL pushes
        // it down to the FSAL here
        Ok(())
    }

    async fn state_unlock(
        &self,
        filehandle_id: &NfsFh4,
        _owner: u64,
        _state: &NfsState,
        span: LockSpan,
    ) -> Result<(), StateStatus> {
        let mut waiters = self.waiters.lock().await;
        let before = waiters.len();
        waiters.retain(|waiter| {
            !(waiter.filehandle_id == *filehandle_id && waiter.span.overlaps(&span))
        });
        if before != waiters.len() {
            debug!(
                released = before - waiters.len(),
                "unlock freed ranges with parked waiters"
            );
        }
        Ok(())
    }

    async fn state_iterate(
        &self,
        filehandle_id: &NfsFh4,
    ) -> Result<Vec<Arc<NfsState>>, StateStatus> {
        Ok(self.states.states_for_file(filehandle_id).await)
    }
}
