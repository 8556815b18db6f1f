use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use keel_proto::nfs4_proto::{NfsFh4, NfsStat4, Stateid4};

use super::lockmanager::owner::OwnerTable;
use super::lockmanager::stateid::{ResolveError, StateIdRegistry};

/// The slice of the client/session layer the lock operations need: stateid
/// correctness against the current file and, when nonzero, the compound's
/// clientid. Seqid windows stay with the operations themselves so their
/// protocol errors are the observable ones.
#[async_trait]
pub trait ClientSession: Debug + Send + Sync {
    async fn check_stateid(
        &self,
        stateid: &Stateid4,
        filehandle_id: &NfsFh4,
        clientid: u64,
    ) -> NfsStat4;
}

/// Checks stateids against the registry that granted them. The special
/// all-zero and all-ones forms pass through; their meaning is decided by the
/// operation using them.
#[derive(Debug)]
pub struct RegistrySession {
    states: Arc<StateIdRegistry>,
    owners: Arc<OwnerTable>,
}

impl RegistrySession {
    pub fn new(states: Arc<StateIdRegistry>, owners: Arc<OwnerTable>) -> Self {
        RegistrySession { states, owners }
    }
}

#[async_trait]
impl ClientSession for RegistrySession {
    async fn check_stateid(
        &self,
        stateid: &Stateid4,
        filehandle_id: &NfsFh4,
        clientid: u64,
    ) -> NfsStat4 {
        if stateid.is_anonymous() || stateid.is_bypass() {
            return NfsStat4::Nfs4Ok;
        }
        let state = match self.states.resolve(&stateid.other).await {
            Ok(state) => state,
            // existence is the operation's question; the state lookup that
            // follows this check reports the operation-specific status
            Err(ResolveError::NotFound) => return NfsStat4::Nfs4Ok,
            Err(ResolveError::Invalid) => return NfsStat4::Nfs4errBadStateid,
        };
        if state.filehandle_id != *filehandle_id {
            return NfsStat4::Nfs4errBadStateid;
        }
        if clientid != 0 {
            match self.owners.get(state.owner).await {
                Some(owner) if owner.clientid == clientid => {}
                _ => return NfsStat4::Nfs4errBadStateid,
            }
        }
        NfsStat4::Nfs4Ok
    }
}
