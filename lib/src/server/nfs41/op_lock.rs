use async_trait::async_trait;
use tracing::debug;
#[cfg(feature = "nfsv4-locks")]
use tracing::error;

use crate::server::{operation::NfsOperation, request::NfsRequest, response::NfsOpResponse};

use keel_proto::nfs4_proto::{Lock4args, NfsStat4};
#[cfg(feature = "nfsv4-locks")]
use keel_proto::nfs4_proto::{Lock4res, NfsResOp4};

#[cfg(feature = "nfsv4-locks")]
use super::current_regular_file;
#[cfg(feature = "nfsv4-locks")]
use crate::server::lockmanager::LockError;

#[async_trait]
impl NfsOperation for Lock4args {
    async fn execute(&self, request: NfsRequest) -> NfsOpResponse {
        // Description: https://datatracker.ietf.org/doc/html/rfc8881#section-18.10
        debug!(
            "Operation 12: LOCK - Create Lock {:?}, with request {:?}",
            self, request
        );
        #[cfg(not(feature = "nfsv4-locks"))]
        return NfsOpResponse {
            request,
            result: None,
            status: NfsStat4::Nfs4errLockNotsupp,
        };

        #[cfg(feature = "nfsv4-locks")]
        {
            let filehandle_id = match current_regular_file(&request) {
                Ok(filehandle_id) => filehandle_id,
                Err(status) => {
                    error!("LOCK preflight failed with {:?}", status);
                    return NfsOpResponse {
                        request,
                        result: None,
                        status,
                    };
                }
            };

            let lmanager = request.lock_manager();
            match lmanager
                .lock(&filehandle_id, request.client_id(), self)
                .await
            {
                Ok(resok) => NfsOpResponse {
                    request,
                    result: Some(NfsResOp4::Oplock(Lock4res::Resok4(resok))),
                    status: NfsStat4::Nfs4Ok,
                },
                // a conflicting lock from a different lock owner
                Err(LockError::Denied(denied)) => NfsOpResponse {
                    request,
                    result: Some(NfsResOp4::Oplock(Lock4res::Denied(denied))),
                    status: NfsStat4::Nfs4errDenied,
                },
                Err(LockError::Status(status)) => {
                    error!("LOCK failed with {:?}", status);
                    NfsOpResponse {
                        request,
                        result: None,
                        status,
                    }
                }
            }
        }
    }
}
