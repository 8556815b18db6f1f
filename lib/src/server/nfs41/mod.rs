mod op_lock;
mod op_lockt;
mod op_locku;

#[cfg(feature = "nfsv4-locks")]
use keel_proto::nfs4_proto::{NfsFh4, NfsFtype4, NfsStat4};

#[cfg(feature = "nfsv4-locks")]
use super::request::NfsRequest;

/// The current-filehandle preflight shared by the record-lock operations:
/// the handle must be present, well-formed, unexpired, and name a regular
/// file. The first failed check decides the status.
#[cfg(feature = "nfsv4-locks")]
pub(crate) fn current_regular_file(request: &NfsRequest) -> Result<NfsFh4, NfsStat4> {
    let validator = request.fh_validator();
    let filehandle = request.current_filehandle();
    let filehandle = match filehandle {
        Some(fh) if !validator.is_empty(Some(&fh)) => fh,
        _ => return Err(NfsStat4::Nfs4errNofilehandle),
    };
    if validator.is_invalid(&filehandle) {
        return Err(NfsStat4::Nfs4errBadhandle);
    }
    if validator.is_expired(&filehandle) {
        return Err(NfsStat4::Nfs4errFhexpired);
    }
    match validator.current_filetype(&filehandle) {
        NfsFtype4::Nf4reg => Ok(filehandle),
        NfsFtype4::Nf4dir => Err(NfsStat4::Nfs4errIsdir),
        _ => Err(NfsStat4::Nfs4errInval),
    }
}

#[cfg(all(test, feature = "nfsv4-locks"))]
mod tests {
    use std::sync::Arc;

    use keel_proto::nfs4_proto::{
        ExistLockOwner4, Lock4args, Lock4res, LockOwner4, Locker4, Lockt4args, Lockt4res,
        Locku4args, Locku4res, NfsFtype4, NfsLockType4, NfsResOp4, NfsStat4, OpenToLockOwner4,
        Stateid4, OPEN4_SHARE_ACCESS_BOTH, OPEN4_SHARE_DENY_NONE,
    };

    use crate::server::fh::VolatileFhValidator;
    use crate::server::lockmanager::LockManager;
    use crate::server::operation::NfsOperation;
    use crate::server::request::NfsRequest;

    struct Harness {
        manager: Arc<LockManager>,
        validator: Arc<VolatileFhValidator>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                manager: LockManager::new(),
                validator: Arc::new(VolatileFhValidator::new()),
            }
        }

        fn request(&self, filehandle: Option<Vec<u8>>) -> NfsRequest {
            let mut request = NfsRequest::new(
                "127.0.0.1:1047".to_string(),
                42,
                self.manager.clone(),
                self.validator.clone(),
            );
            if let Some(fh) = filehandle {
                request.set_filehandle(fh);
            }
            request
        }
    }

    fn lock_args(open_stateid: Stateid4, offset: u64, length: u64) -> Lock4args {
        Lock4args {
            locktype: NfsLockType4::WriteLt,
            reclaim: false,
            offset,
            length,
            locker: Locker4::OpenOwner(OpenToLockOwner4 {
                open_seqid: 1,
                open_stateid,
                lock_seqid: 0,
                lock_owner: LockOwner4 {
                    clientid: 42,
                    owner: b"lock-owner".to_vec(),
                },
            }),
        }
    }

    #[tokio::test]
    async fn lock_and_unlock_round_trip_through_the_operations() {
        let harness = Harness::new();
        let fh = harness.validator.issue(NfsFtype4::Nf4reg);
        let open_stateid = harness
            .manager
            .register_open(
                &fh,
                42,
                b"open-owner",
                OPEN4_SHARE_ACCESS_BOTH,
                OPEN4_SHARE_DENY_NONE,
            )
            .await
            .unwrap();

        let response = lock_args(open_stateid, 0, 100)
            .execute(harness.request(Some(fh.clone())))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4Ok);
        let lock_stateid = match response.result {
            Some(NfsResOp4::Oplock(Lock4res::Resok4(resok))) => resok.lock_stateid,
            other => panic!("expected LOCK resok, got {:?}", other),
        };

        let unlock = Locku4args {
            locktype: NfsLockType4::WriteLt,
            seqid: 2,
            lock_stateid,
            offset: 0,
            length: 100,
        };
        let response = unlock.execute(harness.request(Some(fh))).await;
        assert_eq!(response.status, NfsStat4::Nfs4Ok);
        match response.result {
            Some(NfsResOp4::Oplocku(Locku4res::LockStateid(stateid))) => {
                assert_eq!(stateid.seqid, 1);
            }
            other => panic!("expected LOCKU stateid, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lock_without_a_filehandle_fails_the_preflight() {
        let harness = Harness::new();
        let response = lock_args(Stateid4::anonymous(), 0, 10)
            .execute(harness.request(None))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4errNofilehandle);
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn lock_on_a_directory_is_refused() {
        let harness = Harness::new();
        let dir = harness.validator.issue(NfsFtype4::Nf4dir);
        let response = lock_args(Stateid4::anonymous(), 0, 10)
            .execute(harness.request(Some(dir)))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4errIsdir);
    }

    #[tokio::test]
    async fn lock_on_other_non_regular_files_is_invalid() {
        let harness = Harness::new();
        let device = harness.validator.issue(NfsFtype4::Nf4blk);
        let response = lock_args(Stateid4::anonymous(), 0, 10)
            .execute(harness.request(Some(device)))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4errInval);
    }

    #[tokio::test]
    async fn lock_with_a_garbage_handle_is_refused() {
        let harness = Harness::new();
        let response = lock_args(Stateid4::anonymous(), 0, 10)
            .execute(harness.request(Some(vec![1, 2, 3])))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4errBadhandle);
    }

    #[tokio::test]
    async fn lock_with_a_handle_from_an_earlier_boot_is_expired() {
        let old_validator = VolatileFhValidator::with_boot_time(1_000);
        let stale_fh = old_validator.issue(NfsFtype4::Nf4reg);

        let harness = Harness::new();
        let response = lock_args(Stateid4::anonymous(), 0, 10)
            .execute(harness.request(Some(stale_fh)))
            .await;
        assert_eq!(response.status, NfsStat4::Nfs4errFhexpired);
    }

    #[tokio::test]
    async fn lockt_reports_would_be_conflicts() {
        let harness = Harness::new();
        let fh = harness.validator.issue(NfsFtype4::Nf4reg);
        let open_stateid = harness
            .manager
            .register_open(
                &fh,
                42,
                b"open-owner",
                OPEN4_SHARE_ACCESS_BOTH,
                OPEN4_SHARE_DENY_NONE,
            )
            .await
            .unwrap();
        lock_args(open_stateid, 0, 100)
            .execute(harness.request(Some(fh.clone())))
            .await;

        let probe = Lockt4args {
            locktype: NfsLockType4::WriteLt,
            offset: 50,
            length: 10,
            owner: LockOwner4 {
                clientid: 7,
                owner: b"prober".to_vec(),
            },
        };
        let response = probe.execute(harness.request(Some(fh.clone()))).await;
        assert_eq!(response.status, NfsStat4::Nfs4errDenied);
        match response.result {
            Some(NfsResOp4::Oplockt(Lockt4res::Denied(denied))) => {
                assert_eq!(denied.offset, 0);
                assert_eq!(denied.length, 100);
            }
            other => panic!("expected LOCKT denial, got {:?}", other),
        }

        let free = Lockt4args {
            locktype: NfsLockType4::WriteLt,
            offset: 200,
            length: 10,
            owner: LockOwner4 {
                clientid: 7,
                owner: b"prober".to_vec(),
            },
        };
        let response = free.execute(harness.request(Some(fh))).await;
        assert_eq!(response.status, NfsStat4::Nfs4Ok);
        assert!(matches!(
            response.result,
            Some(NfsResOp4::Oplockt(Lockt4res::Resok4(())))
        ));
    }

    #[tokio::test]
    async fn existing_owner_path_works_through_the_operation() {
        let harness = Harness::new();
        let fh = harness.validator.issue(NfsFtype4::Nf4reg);
        let open_stateid = harness
            .manager
            .register_open(
                &fh,
                42,
                b"open-owner",
                OPEN4_SHARE_ACCESS_BOTH,
                OPEN4_SHARE_DENY_NONE,
            )
            .await
            .unwrap();

        let response = lock_args(open_stateid, 0, 10)
            .execute(harness.request(Some(fh.clone())))
            .await;
        let lock_stateid = match response.result {
            Some(NfsResOp4::Oplock(Lock4res::Resok4(resok))) => resok.lock_stateid,
            other => panic!("expected LOCK resok, got {:?}", other),
        };

        let more = Lock4args {
            locktype: NfsLockType4::WriteLt,
            reclaim: false,
            offset: 20,
            length: 10,
            locker: Locker4::LockOwner(ExistLockOwner4 {
                lock_stateid,
                lock_seqid: 1,
            }),
        };
        let response = more.execute(harness.request(Some(fh))).await;
        assert_eq!(response.status, NfsStat4::Nfs4Ok);
    }
}
