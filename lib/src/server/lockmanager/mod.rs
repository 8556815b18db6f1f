use std::sync::Arc;

use tracing::{debug, error};

use keel_proto::nfs4_proto::{
    ExistLockOwner4, Lock4args, Lock4denied, Lock4resok, LockOwner4, Locker4, Lockt4args,
    Locku4args, NfsFh4, NfsLockType4, NfsStat4, OpenToLockOwner4, Stateid4, NFS4_UINT64_MAX,
    OPEN4_SHARE_ACCESS_WRITE, OPEN4_SHARE_DENY_WRITE,
};

pub mod lockset;
pub mod owner;
pub mod sal;
pub mod stateid;

use lockset::{ConflictingLock, FileLockSet, LockKind, LockSpan};
use owner::{convert_nfs4_owner, OwnerTable};
use sal::{nfs4_errno_state, Blocking, MemorySal, SalAdapter, StateLockError, StateStatus};
use stateid::{NfsState, ResolveError, StateData, StateIdRegistry};

use super::session::{ClientSession, RegistrySession};

/// How a record-lock request was refused: a structured DENIED body naming
/// the conflicting lock, or a bare protocol status.
#[derive(Debug)]
pub enum LockError {
    Denied(Lock4denied),
    Status(NfsStat4),
}

/// The lock state engine: validates LOCK/LOCKT/LOCKU requests against the
/// open and lock state on the file, mints and retires lock stateids, keeps
/// the sequence counters moving, and pushes accepted transitions through the
/// storage abstraction layer.
#[derive(Debug)]
pub struct LockManager {
    states: Arc<StateIdRegistry>,
    owners: Arc<OwnerTable>,
    locks: Arc<FileLockSet>,
    sal: Arc<dyn SalAdapter>,
    session: Arc<dyn ClientSession>,
}

impl LockManager {
    /// A lock manager with the in-process SAL and session checks.
    pub fn new() -> Arc<Self> {
        let states = Arc::new(StateIdRegistry::new());
        let owners = Arc::new(OwnerTable::new());
        let locks = Arc::new(FileLockSet::new(states.clone()));
        let sal = Arc::new(MemorySal::new(states.clone(), locks.clone()));
        let session = Arc::new(RegistrySession::new(states.clone(), owners.clone()));
        Self::from_parts(states, owners, locks, sal, session)
    }

    /// Assemble a lock manager around externally owned collaborators.
    pub fn from_parts(
        states: Arc<StateIdRegistry>,
        owners: Arc<OwnerTable>,
        locks: Arc<FileLockSet>,
        sal: Arc<dyn SalAdapter>,
        session: Arc<dyn ClientSession>,
    ) -> Arc<Self> {
        Arc::new(LockManager {
            states,
            owners,
            locks,
            sal,
            session,
        })
    }

    pub fn states(&self) -> Arc<StateIdRegistry> {
        self.states.clone()
    }

    pub fn owners(&self) -> Arc<OwnerTable> {
        self.owners.clone()
    }

    pub fn locks(&self) -> Arc<FileLockSet> {
        self.locks.clone()
    }

    /// The engine-side half of OPEN: record a share reservation and hand out
    /// its stateid. The embedding server's OPEN handler drives this.
    pub async fn register_open(
        &self,
        filehandle_id: &NfsFh4,
        clientid: u64,
        owner: &[u8],
        share_access: u32,
        share_deny: u32,
    ) -> Result<Stateid4, NfsStat4> {
        let open_owner = self.owners.lookup_or_create_open(clientid, owner).await;
        let state = self
            .sal
            .state_add(
                filehandle_id,
                StateData::Share {
                    share_access,
                    share_deny,
                    lockheld: 0,
                },
                open_owner,
            )
            .await
            .map_err(nfs4_errno_state)?;
        self.owners.attach_state(open_owner, state.other).await;
        // the first grant goes out with seqid 1
        let seqid = state.bump_seqid().await;
        Ok(Stateid4 {
            seqid,
            other: state.other,
        })
    }

    /// The engine-side half of CLOSE: retire a share reservation.
    pub async fn release_open(&self, stateid: &Stateid4) -> Result<(), NfsStat4> {
        let state = match self.states.resolve(&stateid.other).await {
            Ok(state) => state,
            Err(ResolveError::NotFound) => return Err(NfsStat4::Nfs4errStaleStateid),
            Err(ResolveError::Invalid) => return Err(NfsStat4::Nfs4errInval),
        };
        if !state.is_share().await {
            return Err(NfsStat4::Nfs4errBadStateid);
        }
        self.sal.state_del(&state).await.map_err(nfs4_errno_state)?;
        self.owners.detach_state(state.owner, &state.other).await;
        Ok(())
    }

    /// LOCK: acquire a byte-range lock on the current file.
    pub async fn lock(
        &self,
        filehandle_id: &NfsFh4,
        clientid: u64,
        args: &Lock4args,
    ) -> Result<Lock4resok, LockError> {
        // lock length should not be 0
        if args.length == 0 {
            error!("LOCK with zero length");
            return Err(LockError::Status(NfsStat4::Nfs4errInval));
        }

        let (kind, blocking) = match args.locktype {
            NfsLockType4::ReadLt => (LockKind::Read, Blocking::NonBlocking),
            NfsLockType4::WriteLt => (LockKind::Write, Blocking::NonBlocking),
            NfsLockType4::ReadwLt => (LockKind::Read, Blocking::NfsV4Blocking),
            NfsLockType4::WritewLt => (LockKind::Write, Blocking::NfsV4Blocking),
        };

        // comparing beyond 2^64 is not possible in 64 bit precision, but
        // off + len > 2^64 - 1 is equivalent to len > 2^64 - 1 - off
        let span = LockSpan::from_wire(args.offset, args.length);
        if span.length > NFS4_UINT64_MAX - span.offset {
            error!(offset = args.offset, length = args.length, "LOCK range overflow");
            return Err(LockError::Status(NfsStat4::Nfs4errInval));
        }

        // a write lock is not allowed on a file opened deny-write without
        // write access
        for state in self.locks.iter_states(filehandle_id).await {
            if let Some((share_access, share_deny)) = state.share_flags().await {
                if share_deny & OPEN4_SHARE_DENY_WRITE != 0
                    && share_access & OPEN4_SHARE_ACCESS_WRITE == 0
                    && args.locktype == NfsLockType4::WriteLt
                {
                    error!("LOCK write request against a read-mode open");
                    return Err(LockError::Status(NfsStat4::Nfs4errOpenmode));
                }
            }
        }

        match &args.locker {
            Locker4::OpenOwner(open_to_lock) => {
                self.lock_new_owner(filehandle_id, clientid, open_to_lock, span, kind, blocking)
                    .await
            }
            Locker4::LockOwner(exist) => {
                self.lock_existing_owner(filehandle_id, exist, span, kind, blocking)
                    .await
            }
        }
    }

    /// First LOCK by this lock owner: derive it from the open state, mint a
    /// lock stateid, then push the range into the SAL.
    async fn lock_new_owner(
        &self,
        filehandle_id: &NfsFh4,
        clientid: u64,
        arg: &OpenToLockOwner4,
        span: LockSpan,
        kind: LockKind,
        blocking: Blocking,
    ) -> Result<Lock4resok, LockError> {
        let open_state = match self.states.resolve(&arg.open_stateid.other).await {
            Ok(state) => state,
            Err(ResolveError::NotFound) => {
                return Err(LockError::Status(NfsStat4::Nfs4errStaleStateid))
            }
            Err(ResolveError::Invalid) => return Err(LockError::Status(NfsStat4::Nfs4errInval)),
        };
        // an open state has been found, check its type and file
        if !open_state.is_share().await {
            return Err(LockError::Status(NfsStat4::Nfs4errBadStateid));
        }
        if open_state.filehandle_id != *filehandle_id {
            return Err(LockError::Status(NfsStat4::Nfs4errBadStateid));
        }
        let rc = self
            .session
            .check_stateid(&arg.open_stateid, filehandle_id, clientid)
            .await;
        if rc != NfsStat4::Nfs4Ok {
            return Err(LockError::Status(rc));
        }

        let owner_name = match convert_nfs4_owner(&arg.lock_owner) {
            Some(name) => name,
            None => return Err(LockError::Status(NfsStat4::Nfs4errServerfault)),
        };
        let open_owner = open_state.owner;
        let lock_owner = self
            .owners
            .lookup_or_create_lock(owner_name.clientid, &owner_name.owner, open_owner)
            .await;

        let lock_state = match self
            .sal
            .state_add(
                filehandle_id,
                StateData::Lock {
                    open_stateid: open_state.other,
                },
                lock_owner,
            )
            .await
        {
            Ok(state) => state,
            // add failures surface as a stale stateid on the wire
            Err(_) => return Err(LockError::Status(NfsStat4::Nfs4errStaleStateid)),
        };
        self.owners.attach_state(lock_owner, lock_state.other).await;
        open_state.incr_lockheld().await;

        if let Err(refusal) = self.push_lock(filehandle_id, lock_owner, &lock_state, blocking, span, kind).await {
            // no partial state: back out the stateid minted above
            let _ = self.sal.state_del(&lock_state).await;
            self.owners.detach_state(lock_owner, &lock_state.other).await;
            open_state.decr_lockheld().await;
            return Err(refusal);
        }

        // the new lock owner and its open owner both advance
        self.owners.bump_seqid(lock_owner).await;
        self.owners.bump_seqid(open_owner).await;

        Ok(Lock4resok {
            lock_stateid: Stateid4 {
                seqid: 0,
                other: lock_state.other,
            },
        })
    }

    /// Subsequent LOCK under an existing lock stateid, or the anonymous
    /// stateid form, which carries no state at all.
    async fn lock_existing_owner(
        &self,
        filehandle_id: &NfsFh4,
        arg: &ExistLockOwner4,
        span: LockSpan,
        kind: LockKind,
        blocking: Blocking,
    ) -> Result<Lock4resok, LockError> {
        let lock_state = match self.states.resolve(&arg.lock_stateid.other).await {
            Ok(state) => Some(state),
            Err(_) if arg.lock_stateid.is_anonymous() => None,
            Err(ResolveError::NotFound) => {
                return Err(LockError::Status(NfsStat4::Nfs4errStaleStateid))
            }
            Err(ResolveError::Invalid) => return Err(LockError::Status(NfsStat4::Nfs4errInval)),
        };

        match lock_state {
            Some(state) => {
                // a lock state has been found, check its type and file
                if !state.is_lock().await {
                    return Err(LockError::Status(NfsStat4::Nfs4errBadStateid));
                }
                if state.filehandle_id != *filehandle_id {
                    return Err(LockError::Status(NfsStat4::Nfs4errBadStateid));
                }
                self.push_lock(filehandle_id, state.owner, &state, blocking, span, kind)
                    .await?;
                let seqid = state.bump_seqid().await;
                Ok(Lock4resok {
                    lock_stateid: Stateid4 {
                        seqid,
                        other: state.other,
                    },
                })
            }
            None => {
                // anonymous form: no owner, no state to advance
                if let Err(e) = self
                    .sal
                    .state_lock(filehandle_id, None, None, blocking, span, kind)
                    .await
                {
                    return Err(self.refusal(e).await);
                }
                Ok(Lock4resok {
                    lock_stateid: Stateid4::anonymous(),
                })
            }
        }
    }

    // SAL push plus the lock-set commit, sharing the rollback sites
    async fn push_lock(
        &self,
        filehandle_id: &NfsFh4,
        lock_owner: u64,
        lock_state: &NfsState,
        blocking: Blocking,
        span: LockSpan,
        kind: LockKind,
    ) -> Result<(), LockError> {
        if let Err(e) = self
            .sal
            .state_lock(
                filehandle_id,
                Some(lock_owner),
                Some(lock_state),
                blocking,
                span,
                kind,
            )
            .await
        {
            return Err(self.refusal(e).await);
        }
        if let Err(conflict) = self.locks.insert(filehandle_id, lock_owner, span, kind).await {
            return Err(self.denied(conflict).await);
        }
        Ok(())
    }

    /// LOCKU: release a byte range held under a lock stateid.
    pub async fn unlock(
        &self,
        filehandle_id: &NfsFh4,
        args: &Locku4args,
    ) -> Result<Stateid4, NfsStat4> {
        // lock length should not be 0
        if args.length == 0 {
            error!("LOCKU with zero length");
            return Err(NfsStat4::Nfs4errInval);
        }
        let span = LockSpan::from_wire(args.offset, args.length);
        if span.length > NFS4_UINT64_MAX - span.offset {
            error!(offset = args.offset, length = args.length, "LOCKU range overflow");
            return Err(NfsStat4::Nfs4errInval);
        }

        let rc = self
            .session
            .check_stateid(&args.lock_stateid, filehandle_id, 0)
            .await;
        if rc != NfsStat4::Nfs4Ok {
            return Err(rc);
        }

        let state = match self.states.resolve(&args.lock_stateid.other).await {
            Ok(state) => state,
            // an unlock of a range that was never granted here
            Err(ResolveError::NotFound) => return Err(NfsStat4::Nfs4errLockRange),
            Err(ResolveError::Invalid) => {
                return Err(nfs4_errno_state(StateStatus::InvalidArgument))
            }
        };

        let owner = match self.owners.get(state.owner).await {
            Some(owner) => owner,
            None => return Err(NfsStat4::Nfs4errServerfault),
        };
        let so_seqid = owner.current_seqid().await;
        let state_seqid = state.current_seqid().await;
        debug!(
            seqid = args.seqid,
            so_seqid,
            stateid_seqid = args.lock_stateid.seqid,
            state_seqid,
            "LOCKU seqid check"
        );
        // one replay is tolerated; exact-once lives in the session layer
        if args.seqid != so_seqid && args.seqid != so_seqid + 1 {
            return Err(NfsStat4::Nfs4errBadSeqid);
        }
        if args.lock_stateid.seqid != state_seqid && args.lock_stateid.seqid != state_seqid + 1 {
            return Err(NfsStat4::Nfs4errBadSeqid);
        }

        self.sal
            .state_unlock(filehandle_id, state.owner, &state, span)
            .await
            .map_err(nfs4_errno_state)?;
        self.locks.remove(filehandle_id, state.owner, span).await;

        // seqids move only once the unlock has landed: the state itself,
        // the lock owner, its open owner, then the open state
        let new_seqid = state.bump_seqid().await;
        owner.bump_seqid().await;
        if let Some(related) = owner.related_open_owner {
            self.owners.bump_seqid(related).await;
        }
        if let Some(open_other) = state.open_ref().await {
            if let Ok(open_state) = self.states.resolve(&open_other).await {
                open_state.bump_seqid().await;
                open_state.decr_lockheld().await;
            }
        }

        let lock_stateid = Stateid4 {
            seqid: new_seqid,
            other: state.other,
        };

        // the state is retired as soon as the unlock lands; the stateid
        // handed back above already names a dropped entry
        self.sal.state_del(&state).await.map_err(nfs4_errno_state)?;
        self.owners.detach_state(state.owner, &state.other).await;

        Ok(lock_stateid)
    }

    /// LOCKT: would this lock be granted? Nothing is created either way.
    pub async fn test_lock(
        &self,
        filehandle_id: &NfsFh4,
        args: &Lockt4args,
    ) -> Result<(), LockError> {
        if args.length == 0 {
            error!("LOCKT with zero length");
            return Err(LockError::Status(NfsStat4::Nfs4errInval));
        }
        let kind = match args.locktype {
            NfsLockType4::ReadLt | NfsLockType4::ReadwLt => LockKind::Read,
            NfsLockType4::WriteLt | NfsLockType4::WritewLt => LockKind::Write,
        };
        let span = LockSpan::from_wire(args.offset, args.length);
        if span.length > NFS4_UINT64_MAX - span.offset {
            error!(offset = args.offset, length = args.length, "LOCKT range overflow");
            return Err(LockError::Status(NfsStat4::Nfs4errInval));
        }

        let owner_name = match convert_nfs4_owner(&args.owner) {
            Some(name) => name,
            None => return Err(LockError::Status(NfsStat4::Nfs4errServerfault)),
        };
        let requesting_owner = self
            .owners
            .lookup_lock(owner_name.clientid, &owner_name.owner)
            .await;

        match self
            .locks
            .find_conflict(filehandle_id, &span, kind, requesting_owner)
            .await
        {
            Some(conflict) => Err(self.denied(conflict).await),
            None => Ok(()),
        }
    }

    async fn refusal(&self, err: StateLockError) -> LockError {
        match err {
            StateLockError::Conflict(conflict) => self.denied(conflict).await,
            StateLockError::Status(status) => LockError::Status(nfs4_errno_state(status)),
        }
    }

    /// Build the DENIED body from the conflict witness. Owner bytes are
    /// copied verbatim; a holder that is not an NFSv4 owner reports
    /// clientid 0.
    async fn denied(&self, conflict: ConflictingLock) -> LockError {
        let (clientid, owner) = match self.owners.get(conflict.owner).await {
            Some(holder) => (holder.clientid, holder.owner.clone()),
            None => (0, Vec::new()),
        };
        LockError::Denied(Lock4denied {
            offset: conflict.span.offset,
            length: conflict.span.wire_length(),
            locktype: match conflict.kind {
                LockKind::Read => NfsLockType4::ReadLt,
                LockKind::Write => NfsLockType4::WriteLt,
            },
            owner: LockOwner4 { clientid, owner },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_proto::nfs4_proto::{
        ExistLockOwner4, OpenToLockOwner4, OPEN4_SHARE_ACCESS_BOTH, OPEN4_SHARE_ACCESS_READ,
        OPEN4_SHARE_DENY_NONE,
    };
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    use tracing_test::traced_test;

    fn fh() -> NfsFh4 {
        vec![128, 7]
    }

    fn random_owner() -> Vec<u8> {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .collect()
    }

    async fn manager_with_sal() -> (Arc<LockManager>, Arc<MemorySal>) {
        let states = Arc::new(StateIdRegistry::new());
        let owners = Arc::new(OwnerTable::new());
        let locks = Arc::new(FileLockSet::new(states.clone()));
        let sal = Arc::new(MemorySal::new(states.clone(), locks.clone()));
        let session = Arc::new(RegistrySession::new(states.clone(), owners.clone()));
        let manager = LockManager::from_parts(states, owners, locks, sal.clone(), session);
        (manager, sal)
    }

    async fn open_both(manager: &LockManager, clientid: u64, owner: &[u8]) -> Stateid4 {
        manager
            .register_open(
                &fh(),
                clientid,
                owner,
                OPEN4_SHARE_ACCESS_BOTH,
                OPEN4_SHARE_DENY_NONE,
            )
            .await
            .unwrap()
    }

    fn new_owner_lock(
        open_stateid: Stateid4,
        clientid: u64,
        owner: &[u8],
        locktype: NfsLockType4,
        offset: u64,
        length: u64,
    ) -> Lock4args {
        Lock4args {
            locktype,
            reclaim: false,
            offset,
            length,
            locker: Locker4::OpenOwner(OpenToLockOwner4 {
                open_seqid: 1,
                open_stateid,
                lock_seqid: 0,
                lock_owner: LockOwner4 {
                    clientid,
                    owner: owner.to_vec(),
                },
            }),
        }
    }

    fn existing_owner_lock(
        lock_stateid: Stateid4,
        locktype: NfsLockType4,
        offset: u64,
        length: u64,
    ) -> Lock4args {
        Lock4args {
            locktype,
            reclaim: false,
            offset,
            length,
            locker: Locker4::LockOwner(ExistLockOwner4 {
                lock_stateid,
                lock_seqid: 0,
            }),
        }
    }

    fn unlock_args(seqid: u32, lock_stateid: Stateid4, offset: u64, length: u64) -> Locku4args {
        Locku4args {
            locktype: NfsLockType4::WriteLt,
            seqid,
            lock_stateid,
            offset,
            length,
        }
    }

    #[tokio::test]
    async fn first_lock_on_a_new_owner() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 42, b"open-owner").await;

        let resok = manager
            .lock(
                &fh(),
                42,
                &new_owner_lock(open_stateid.clone(), 42, b"lock-owner", NfsLockType4::WriteLt, 0, 100),
            )
            .await
            .unwrap();

        // fresh lock stateids go out with seqid 0 and resolve to the state
        // that was just created
        assert_eq!(resok.lock_stateid.seqid, 0);
        let state = manager
            .states()
            .resolve(&resok.lock_stateid.other)
            .await
            .unwrap();
        assert!(state.is_lock().await);

        let open_state = manager.states().resolve(&open_stateid.other).await.unwrap();
        assert_eq!(open_state.lockheld().await, 1);

        let lock_owner = manager.owners().get(state.owner).await.unwrap();
        assert_eq!(lock_owner.current_seqid().await, 1);
        let open_owner = manager
            .owners()
            .get(lock_owner.related_open_owner.unwrap())
            .await
            .unwrap();
        assert_eq!(open_owner.current_seqid().await, 1);
    }

    #[tokio::test]
    async fn conflicting_write_from_a_different_owner_is_denied() {
        let (manager, _) = manager_with_sal().await;
        let open_a = open_both(&manager, 1, b"open-a").await;
        let open_b = open_both(&manager, 2, b"open-b").await;

        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_a, 1, b"lock-a", NfsLockType4::WriteLt, 0, 100),
            )
            .await
            .unwrap();
        let states_before = manager.states().len().await;

        let err = manager
            .lock(
                &fh(),
                2,
                &new_owner_lock(open_b, 2, b"lock-b", NfsLockType4::WriteLt, 50, 100),
            )
            .await
            .unwrap_err();

        match err {
            LockError::Denied(denied) => {
                assert_eq!(denied.offset, 0);
                assert_eq!(denied.length, 100);
                assert_eq!(denied.locktype, NfsLockType4::WriteLt);
                assert_eq!(denied.owner.clientid, 1);
                assert_eq!(denied.owner.owner, b"lock-a".to_vec());
            }
            other => panic!("expected DENIED, got {:?}", other),
        }
        // the failed request left no state behind
        assert_eq!(manager.states().len().await, states_before);
        let loser = manager.owners().lookup_lock(2, b"lock-b").await.unwrap();
        assert_eq!(manager.locks().ranges_of(&fh(), loser).await, Vec::new());
    }

    #[tokio::test]
    async fn read_locks_coexist_across_owners() {
        let (manager, _) = manager_with_sal().await;
        let open_a = open_both(&manager, 1, b"open-a").await;
        let open_b = open_both(&manager, 2, b"open-b").await;

        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_a, 1, b"lock-a", NfsLockType4::ReadLt, 0, 100),
            )
            .await
            .unwrap();
        manager
            .lock(
                &fh(),
                2,
                &new_owner_lock(open_b, 2, b"lock-b", NfsLockType4::ReadLt, 50, 100),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn share_mode_rejects_write_locks_on_read_only_opens() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = manager
            .register_open(
                &fh(),
                7,
                b"open-owner",
                OPEN4_SHARE_ACCESS_READ,
                OPEN4_SHARE_DENY_WRITE,
            )
            .await
            .unwrap();

        let err = manager
            .lock(
                &fh(),
                7,
                &new_owner_lock(open_stateid, 7, b"lock-owner", NfsLockType4::WriteLt, 0, 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LockError::Status(NfsStat4::Nfs4errOpenmode)
        ));
    }

    #[tokio::test]
    async fn lock_with_an_unknown_open_stateid_is_stale() {
        let (manager, _) = manager_with_sal().await;
        let never_minted = Stateid4 {
            seqid: 1,
            other: [9; 12],
        };
        let err = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(never_minted, 1, b"lock-owner", NfsLockType4::WriteLt, 0, 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LockError::Status(NfsStat4::Nfs4errStaleStateid)
        ));
    }

    #[tokio::test]
    async fn locku_with_an_unknown_stateid_is_out_of_range() {
        let (manager, _) = manager_with_sal().await;
        let never_minted = Stateid4 {
            seqid: 1,
            other: [9; 12],
        };
        let err = manager
            .unlock(&fh(), &unlock_args(0, never_minted, 0, 10))
            .await
            .unwrap_err();
        assert_eq!(err, NfsStat4::Nfs4errLockRange);
    }

    #[tokio::test]
    async fn range_overflow_is_rejected_at_the_boundary() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;

        // the very last byte is lockable
        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(
                    open_stateid.clone(),
                    1,
                    b"lock-owner",
                    NfsLockType4::WriteLt,
                    NFS4_UINT64_MAX - 1,
                    1,
                ),
            )
            .await
            .unwrap();

        // one more wraps past 2^64
        let err = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(
                    open_stateid,
                    1,
                    b"other-owner",
                    NfsLockType4::WriteLt,
                    NFS4_UINT64_MAX - 1,
                    2,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Status(NfsStat4::Nfs4errInval)));
    }

    #[tokio::test]
    async fn zero_length_and_eof_length_are_distinct() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;

        let err = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(
                    open_stateid.clone(),
                    1,
                    b"lock-owner",
                    NfsLockType4::WriteLt,
                    0,
                    0,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Status(NfsStat4::Nfs4errInval)));

        // all-ones means "to the end of file"
        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(
                    open_stateid,
                    1,
                    b"lock-owner",
                    NfsLockType4::WriteLt,
                    0,
                    NFS4_UINT64_MAX,
                ),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn existing_owner_accumulates_ranges_and_seqids() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;

        let first = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_stateid, 1, b"lock-owner", NfsLockType4::WriteLt, 0, 10),
            )
            .await
            .unwrap();
        assert_eq!(first.lock_stateid.seqid, 0);

        let second = manager
            .lock(
                &fh(),
                1,
                &existing_owner_lock(first.lock_stateid.clone(), NfsLockType4::WriteLt, 20, 10),
            )
            .await
            .unwrap();
        // the state advanced by one per accepted mutation
        assert_eq!(second.lock_stateid.other, first.lock_stateid.other);
        assert_eq!(second.lock_stateid.seqid, 1);

        let state = manager
            .states()
            .resolve(&second.lock_stateid.other)
            .await
            .unwrap();
        let ranges = manager.locks().ranges_of(&fh(), state.owner).await;
        assert_eq!(
            ranges,
            vec![
                (LockSpan::new(0, 10), LockKind::Write),
                (LockSpan::new(20, 10), LockKind::Write),
            ]
        );
    }

    #[tokio::test]
    async fn anonymous_stateid_locks_without_creating_state() {
        let (manager, _) = manager_with_sal().await;
        let states_before = manager.states().len().await;

        let resok = manager
            .lock(
                &fh(),
                1,
                &existing_owner_lock(Stateid4::anonymous(), NfsLockType4::WriteLt, 0, 10),
            )
            .await
            .unwrap();
        assert!(resok.lock_stateid.is_anonymous());
        assert_eq!(manager.states().len().await, states_before);
    }

    #[tokio::test]
    async fn anonymous_requests_conflict_with_every_holder() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;
        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_stateid, 1, b"lock-owner", NfsLockType4::ReadLt, 0, 100),
            )
            .await
            .unwrap();

        let err = manager
            .lock(
                &fh(),
                1,
                &existing_owner_lock(Stateid4::anonymous(), NfsLockType4::WriteLt, 50, 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Denied(_)));
    }

    #[traced_test]
    #[tokio::test]
    async fn locku_advances_every_counter_once() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;

        let resok = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(
                    open_stateid.clone(),
                    1,
                    b"lock-owner",
                    NfsLockType4::WriteLt,
                    0,
                    100,
                ),
            )
            .await
            .unwrap();
        let lock_state = manager
            .states()
            .resolve(&resok.lock_stateid.other)
            .await
            .unwrap();
        let lock_owner = manager.owners().get(lock_state.owner).await.unwrap();
        let open_owner_key = lock_owner.related_open_owner.unwrap();
        let so_before = lock_owner.current_seqid().await;
        let oo_before = manager.owners().current_seqid(open_owner_key).await.unwrap();
        let state_before = lock_state.current_seqid().await;

        let result = manager
            .unlock(
                &fh(),
                &unlock_args(so_before + 1, resok.lock_stateid.clone(), 0, 100),
            )
            .await
            .unwrap();

        assert_eq!(result.other, resok.lock_stateid.other);
        assert_eq!(result.seqid, state_before + 1);
        assert_eq!(lock_owner.current_seqid().await, so_before + 1);
        assert_eq!(
            manager.owners().current_seqid(open_owner_key).await,
            Some(oo_before + 1)
        );
        // the open state advanced too and dropped its lock count
        let open_state = manager.states().resolve(&open_stateid.other).await.unwrap();
        assert_eq!(open_state.lockheld().await, 0);

        // the stateid handed back was retired with the state: the next
        // unlock through it reports an unknown range
        let err = manager
            .unlock(&fh(), &unlock_args(so_before + 2, result, 0, 100))
            .await
            .unwrap_err();
        assert_eq!(err, NfsStat4::Nfs4errLockRange);
    }

    #[tokio::test]
    async fn locku_accepts_a_replayed_owner_seqid() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;
        let resok = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_stateid, 1, b"lock-owner", NfsLockType4::WriteLt, 0, 100),
            )
            .await
            .unwrap();
        let lock_state = manager
            .states()
            .resolve(&resok.lock_stateid.other)
            .await
            .unwrap();
        let so_seqid = manager
            .owners()
            .get(lock_state.owner)
            .await
            .unwrap()
            .current_seqid()
            .await;

        // equal seqid is the replay window, O+1 the fresh request
        manager
            .unlock(&fh(), &unlock_args(so_seqid, resok.lock_stateid, 0, 100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn locku_outside_the_seqid_window_is_rejected() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;
        let resok = manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_stateid, 1, b"lock-owner", NfsLockType4::WriteLt, 0, 100),
            )
            .await
            .unwrap();

        let err = manager
            .unlock(&fh(), &unlock_args(17, resok.lock_stateid.clone(), 0, 100))
            .await
            .unwrap_err();
        assert_eq!(err, NfsStat4::Nfs4errBadSeqid);

        // owner seqid in range, stateid seqid off
        let so_seqid = 1;
        let stale = Stateid4 {
            seqid: 9,
            other: resok.lock_stateid.other,
        };
        let err = manager
            .unlock(&fh(), &unlock_args(so_seqid, stale, 0, 100))
            .await
            .unwrap_err();
        assert_eq!(err, NfsStat4::Nfs4errBadSeqid);
    }

    #[tokio::test]
    async fn blocking_denials_are_parked_in_the_sal() {
        let (manager, sal) = manager_with_sal().await;
        let open_a = open_both(&manager, 1, b"open-a").await;
        let open_b = open_both(&manager, 2, b"open-b").await;

        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_a, 1, b"lock-a", NfsLockType4::WriteLt, 0, 100),
            )
            .await
            .unwrap();

        let err = manager
            .lock(
                &fh(),
                2,
                &new_owner_lock(open_b, 2, b"lock-b", NfsLockType4::WritewLt, 10, 10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Denied(_)));
        assert_eq!(sal.waiter_count().await, 1);
    }

    #[tokio::test]
    async fn writew_does_not_trip_the_share_mode_check() {
        // the share scan tests the wire locktype exactly; only WRITE_LT is
        // refused against a read-mode open
        let (manager, _) = manager_with_sal().await;
        let open_stateid = manager
            .register_open(
                &fh(),
                7,
                b"open-owner",
                OPEN4_SHARE_ACCESS_READ,
                OPEN4_SHARE_DENY_WRITE,
            )
            .await
            .unwrap();

        manager
            .lock(
                &fh(),
                7,
                &new_owner_lock(open_stateid, 7, b"lock-owner", NfsLockType4::WritewLt, 0, 10),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn denied_ranges_lie_within_the_holders_lock() {
        let (manager, _) = manager_with_sal().await;
        let open_a = open_both(&manager, 1, &random_owner()).await;
        let open_b = open_both(&manager, 2, &random_owner()).await;

        let holder = random_owner();
        manager
            .lock(
                &fh(),
                1,
                &new_owner_lock(open_a, 1, &holder, NfsLockType4::WriteLt, 10, 30),
            )
            .await
            .unwrap();

        let err = manager
            .lock(
                &fh(),
                2,
                &new_owner_lock(open_b, 2, &random_owner(), NfsLockType4::ReadLt, 0, 100),
            )
            .await
            .unwrap_err();
        let denied = match err {
            LockError::Denied(denied) => denied,
            other => panic!("expected DENIED, got {:?}", other),
        };
        assert_eq!(denied.owner.owner, holder);
        assert_eq!(denied.offset, 10);
        assert_eq!(denied.length, 30);

        // the witness names a range the holder really has, with a kind that
        // conflicts with the request
        let holder_key = manager.owners().lookup_lock(1, &holder).await.unwrap();
        let held = manager.locks().ranges_of(&fh(), holder_key).await;
        assert!(held.contains(&(LockSpan::new(10, 30), LockKind::Write)));
    }

    #[tokio::test]
    async fn release_open_retires_the_share_state() {
        let (manager, _) = manager_with_sal().await;
        let open_stateid = open_both(&manager, 1, b"open-owner").await;

        manager.release_open(&open_stateid).await.unwrap();
        assert_eq!(
            manager.release_open(&open_stateid).await.unwrap_err(),
            NfsStat4::Nfs4errStaleStateid
        );
    }
}
