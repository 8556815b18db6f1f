use async_trait::async_trait;
use tracing::debug;
#[cfg(feature = "nfsv4-locks")]
use tracing::error;

use crate::server::{operation::NfsOperation, request::NfsRequest, response::NfsOpResponse};

use keel_proto::nfs4_proto::{Locku4args, NfsStat4};
#[cfg(feature = "nfsv4-locks")]
use keel_proto::nfs4_proto::{Locku4res, NfsResOp4};

#[cfg(feature = "nfsv4-locks")]
use super::current_regular_file;

#[async_trait]
impl NfsOperation for Locku4args {
    async fn execute(&self, request: NfsRequest) -> NfsOpResponse {
        // Description: https://datatracker.ietf.org/doc/html/rfc8881#section-18.12
        debug!(
            "Operation 14: LOCKU - Unlock File {:?}, with request {:?}",
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
                    error!("LOCKU preflight failed with {:?}", status);
                    return NfsOpResponse {
                        request,
                        result: None,
                        status,
                    };
                }
            };

            let lmanager = request.lock_manager();
            match lmanager.unlock(&filehandle_id, self).await {
                Ok(lock_stateid) => NfsOpResponse {
                    request,
                    result: Some(NfsResOp4::Oplocku(Locku4res::LockStateid(lock_stateid))),
                    status: NfsStat4::Nfs4Ok,
                },
                Err(status) => {
                    error!("LOCKU failed with {:?}", status);
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
