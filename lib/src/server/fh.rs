use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use keel_proto::nfs4_proto::{NfsFh4, NfsFtype4};

/// Validation over the compound's current filehandle. The record-lock
/// operations consult this before touching any state; the answers map onto
/// NFS4ERR_NOFILEHANDLE / BADHANDLE / FHEXPIRED / ISDIR / INVAL.
pub trait FhValidator: Debug + Send + Sync {
    fn is_empty(&self, filehandle: Option<&NfsFh4>) -> bool {
        filehandle.map_or(true, |fh| fh.is_empty())
    }

    fn is_invalid(&self, filehandle: &NfsFh4) -> bool;

    fn is_expired(&self, filehandle: &NfsFh4) -> bool;

    fn current_filetype(&self, filehandle: &NfsFh4) -> NfsFtype4;
}

// https://tools.ietf.org/html/rfc7530#section-4.2.3
// Volatile filehandles: one marker byte, the server boot time, a sequence
// number and a trailing version byte. The root handle is the bare marker.
const FH_MARKER: u8 = 128;
const FH_LEN: usize = 18;

/// Issues and validates volatile filehandles. Handles minted by an earlier
/// server incarnation carry a different boot time and test as expired.
#[derive(Debug)]
pub struct VolatileFhValidator {
    boot_time: u64,
    next_fh_id: AtomicU64,
    // filetypes as reported by the file manager that issued the handle
    filetypes: RwLock<HashMap<NfsFh4, NfsFtype4>>,
}

impl VolatileFhValidator {
    pub fn new() -> Self {
        let boot_time = std::time::UNIX_EPOCH.elapsed().unwrap().as_secs();
        Self::with_boot_time(boot_time)
    }

    pub fn with_boot_time(boot_time: u64) -> Self {
        VolatileFhValidator {
            boot_time,
            next_fh_id: AtomicU64::new(100),
            filetypes: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh volatile filehandle for an object of the given type.
    pub fn issue(&self, filetype: NfsFtype4) -> NfsFh4 {
        let mut id = vec![FH_MARKER];
        id.extend(self.boot_time.to_be_bytes().to_vec());
        id.extend(
            self.next_fh_id
                .fetch_add(1, Ordering::Relaxed)
                .to_be_bytes()
                .to_vec(),
        );
        id.extend(vec![1_u8]);
        self.register(id.clone(), filetype);
        id
    }

    /// Record the filetype for a handle minted elsewhere.
    pub fn register(&self, filehandle: NfsFh4, filetype: NfsFtype4) {
        self.filetypes
            .write()
            .unwrap()
            .insert(filehandle, filetype);
    }

    fn embedded_boot_time(filehandle: &NfsFh4) -> Option<u64> {
        let bytes: [u8; 8] = filehandle.get(1..9)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

impl Default for VolatileFhValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl FhValidator for VolatileFhValidator {
    fn is_invalid(&self, filehandle: &NfsFh4) -> bool {
        match filehandle.len() {
            // root gets a special filehandle that always constructs the same way
            1 => filehandle[0] != FH_MARKER,
            FH_LEN => filehandle[0] != FH_MARKER || filehandle[FH_LEN - 1] != 1,
            _ => true,
        }
    }

    fn is_expired(&self, filehandle: &NfsFh4) -> bool {
        if filehandle.len() != FH_LEN {
            // the root handle never expires
            return false;
        }
        Self::embedded_boot_time(filehandle) != Some(self.boot_time)
    }

    fn current_filetype(&self, filehandle: &NfsFh4) -> NfsFtype4 {
        self.filetypes
            .read()
            .unwrap()
            .get(filehandle)
            .copied()
            .unwrap_or(NfsFtype4::Nf4Undef)
    }
}
