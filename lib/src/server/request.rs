use std::sync::Arc;

use keel_proto::nfs4_proto::NfsFh4;

use super::{fh::FhValidator, lockmanager::LockManager};

/// Compound context handed from operation to operation: the client's
/// identity, the current filehandle, and the shared lock manager.
#[derive(Debug)]
pub struct NfsRequest {
    client_addr: String,
    // clientid established by the session layer for this compound
    clientid: u64,
    filehandle: Option<NfsFh4>,
    // shared lock state engine
    lmanager: Arc<LockManager>,
    // collaborator validating the current filehandle
    fh_validator: Arc<dyn FhValidator>,
    // time the request was received
    pub request_time: u64,
}

impl NfsRequest {
    pub fn new(
        client_addr: String,
        clientid: u64,
        lmanager: Arc<LockManager>,
        fh_validator: Arc<dyn FhValidator>,
    ) -> Self {
        let request_time = std::time::UNIX_EPOCH.elapsed().unwrap().as_secs();

        NfsRequest {
            client_addr,
            clientid,
            filehandle: None,
            lmanager,
            fh_validator,
            request_time,
        }
    }

    pub fn client_addr(&self) -> &String {
        &self.client_addr
    }

    pub fn client_id(&self) -> u64 {
        self.clientid
    }

    pub fn current_filehandle(&self) -> Option<NfsFh4> {
        self.filehandle.clone()
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lmanager.clone()
    }

    pub fn fh_validator(&self) -> Arc<dyn FhValidator> {
        self.fh_validator.clone()
    }

    pub fn set_filehandle(&mut self, filehandle: NfsFh4) {
        self.filehandle = Some(filehandle);
    }

    pub fn unset_filehandle(&mut self) {
        self.filehandle = None;
    }
}
