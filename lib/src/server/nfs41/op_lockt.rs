use async_trait::async_trait;
use tracing::debug;
#[cfg(feature = "nfsv4-locks")]
use tracing::error;

use crate::server::{operation::NfsOperation, request::NfsRequest, response::NfsOpResponse};

use keel_proto::nfs4_proto::{Lockt4args, NfsStat4};
#[cfg(feature = "nfsv4-locks")]
use keel_proto::nfs4_proto::{Lockt4res, NfsResOp4};

#[cfg(feature = "nfsv4-locks")]
use super::current_regular_file;
#[cfg(feature = "nfsv4-locks")]
use crate::server::lockmanager::LockError;

#[async_trait]
impl NfsOperation for Lockt4args {
    async fn execute(&self, request: NfsRequest) -> NfsOpResponse {
        // Description: https://datatracker.ietf.org/doc/html/rfc8881#section-18.11
        debug!(
            "Operation 13: LOCKT - Test For Lock {:?}, with request {:?}",
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
                    error!("LOCKT preflight failed with {:?}", status);
                    return NfsOpResponse {
                        request,
                        result: None,
                        status,
                    };
                }
            };

            let lmanager = request.lock_manager();
            match lmanager.test_lock(&filehandle_id, self).await {
                Ok(()) => NfsOpResponse {
                    request,
                    result: Some(NfsResOp4::Oplockt(Lockt4res::Resok4(()))),
                    status: NfsStat4::Nfs4Ok,
                },
                Err(LockError::Denied(denied)) => NfsOpResponse {
                    request,
                    result: Some(NfsResOp4::Oplockt(Lockt4res::Denied(denied))),
                    status: NfsStat4::Nfs4errDenied,
                },
                Err(LockError::Status(status)) => {
                    error!("LOCKT failed with {:?}", status);
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
