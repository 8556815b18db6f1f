extern crate serde_xdr;

use num_derive::ToPrimitive;

use serde_derive::{Deserialize, Serialize};

/*
 * This code was derived from RFC 7531.
 */

/*
 *      nfs4_prot.x
 *
 */

/*
 * Sizes
 */
pub const NFS4_OTHER_SIZE: u32 = 12;
pub const NFS4_OPAQUE_LIMIT: u32 = 1024;

pub const NFS4_UINT64_MAX: u64 = 0xffffffffffffffff;

/*
 * File types
 */
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, ToPrimitive)]
#[repr(u32)]
pub enum NfsFtype4 {
    Nf4Undef = 0,     /* undefined */
    Nf4reg = 1,       /* Regular File */
    Nf4dir = 2,       /* Directory */
    Nf4blk = 3,       /* Special File - block device */
    Nf4chr = 4,       /* Special File - character device */
    Nf4lnk = 5,       /* Symbolic Link */
    Nf4sock = 6,      /* Special File - socket */
    Nf4fifo = 7,      /* Special File - fifo */
    Nf4attrdir = 8,   /* Attribute Directory */
    Nf4namedattr = 9, /* Named Attribute */
}

/*
 * Error status
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, ToPrimitive)]
#[repr(u32)]
pub enum NfsStat4 {
    Nfs4Ok = 0,         /* everything is okay       */
    Nfs4errPerm = 1,    /* caller not privileged    */
    Nfs4errNoent = 2,   /* no such file/directory   */
    Nfs4errIo = 5,      /* hard I/O error           */
    Nfs4errNxio = 6,    /* no such device           */
    Nfs4errAccess = 13, /* access denied            */
    Nfs4errExist = 17,  /* file already exists      */
    Nfs4errXdev = 18,   /* different file systems   */
    /* Unused/reserved        19 */
    Nfs4errNotdir = 20,               /* should be a directory    */
    Nfs4errIsdir = 21,                /* should not be directory  */
    Nfs4errInval = 22,                /* invalid argument         */
    Nfs4errFbig = 27,                 /* file exceeds server max  */
    Nfs4errNospc = 28,                /* no space on file system  */
    Nfs4errRofs = 30,                 /* read-only file system    */
    Nfs4errMlink = 31,                /* too many hard links      */
    Nfs4errNametoolong = 63,          /* name exceeds server max  */
    Nfs4errNotempty = 66,             /* directory not empty      */
    Nfs4errDquot = 69,                /* hard quota limit reached */
    Nfs4errStale = 70,                /* file no longer exists    */
    Nfs4errBadhandle = 10001,         /* Illegal filehandle       */
    Nfs4errBadCookie = 10003,         /* READDIR cookie is stale  */
    Nfs4errNotsupp = 10004,           /* operation not supported  */
    Nfs4errToosmall = 10005,          /* response limit exceeded  */
    Nfs4errServerfault = 10006,       /* undefined server error   */
    Nfs4errBadtype = 10007,           /* type invalid for CREATE  */
    Nfs4errDelay = 10008,             /* file "busy" - retry      */
    Nfs4errSame = 10009,              /* nverify says attrs same  */
    Nfs4errDenied = 10010,            /* lock unavailable         */
    Nfs4errExpired = 10011,           /* lock lease expired       */
    Nfs4errLocked = 10012,            /* I/O failed due to lock   */
    Nfs4errGrace = 10013,             /* in grace period          */
    Nfs4errFhexpired = 10014,         /* filehandle expired       */
    Nfs4errShareDenied = 10015,       /* share reserve denied     */
    Nfs4errWrongsec = 10016,          /* wrong security flavor    */
    Nfs4errClidInuse = 10017,         /* clientid in use          */
    Nfs4errResource = 10018,          /* resource exhaustion      */
    Nfs4errMoved = 10019,             /* file system relocated    */
    Nfs4errNofilehandle = 10020,      /* current FH is not set    */
    Nfs4errMinorVersMismatch = 10021, /* minor vers not supp */
    Nfs4errStaleClientid = 10022,     /* server has rebooted      */
    Nfs4errStaleStateid = 10023,      /* server has rebooted      */
    Nfs4errOldStateid = 10024,        /* state is out of sync     */
    Nfs4errBadStateid = 10025,        /* incorrect stateid        */
    Nfs4errBadSeqid = 10026,          /* request is out of seq.   */
    Nfs4errNotSame = 10027,           /* verify - attrs not same  */
    Nfs4errLockRange = 10028,         /* lock range not supported */
    Nfs4errSymlink = 10029,           /* should be file/directory */
    Nfs4errRestorefh = 10030,         /* no saved filehandle      */
    Nfs4errLeaseMoved = 10031,        /* some file system moved   */
    Nfs4errAttrnotsupp = 10032,       /* recommended attr not sup */
    Nfs4errNoGrace = 10033,           /* reclaim outside of grace */
    Nfs4errReclaimBad = 10034,        /* reclaim error at server  */
    Nfs4errReclaimConflict = 10035,   /* conflict on reclaim    */
    Nfs4errBadxdr = 10036,            /* XDR decode failed        */
    Nfs4errLocksHeld = 10037,         /* file locks held at CLOSE */
    Nfs4errOpenmode = 10038,          /* conflict in OPEN and I/O */
    Nfs4errBadOwner = 10039,          /* Owner translation bad    */
    Nfs4errBadchar = 10040,           /* UTF-8 char not supported */
    Nfs4errBadname = 10041,           /* name not supported       */
    Nfs4errBadRange = 10042,          /* lock range not supported */
    Nfs4errLockNotsupp = 10043,       /* no atomic up/downgrade   */
    Nfs4errOpIllegal = 10044,         /* undefined operation      */
    Nfs4errDeadlock = 10045,          /* file locking deadlock    */
    Nfs4errFileOpen = 10046,          /* open file blocks op.     */
    Nfs4errAdminRevoked = 10047,      /* lock-Owner state revoked */
    Nfs4errCbPathDown = 10048,        /* callback path down       */
}

/*
 * Basic data types
 */
type Clientid4 = u64;
type Length4 = u64;
pub type NfsFh4 = Vec<u8>;
type Offset4 = u64;
type Seqid4 = u32;

/*
 * Stateid
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Stateid4 {
    pub seqid: u32,
    #[serde(with = "serde_xdr::opaque_data::fixed_length")]
    pub other: [u8; NFS4_OTHER_SIZE as usize],
}

impl Stateid4 {
    /// The anonymous (all-zero) stateid form.
    pub fn anonymous() -> Self {
        Stateid4 {
            seqid: 0,
            other: [0; NFS4_OTHER_SIZE as usize],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.seqid == 0 && self.other == [0; NFS4_OTHER_SIZE as usize]
    }

    /// The READ/WRITE bypass (all-ones) stateid form.
    pub fn is_bypass(&self) -> bool {
        self.other == [0xff; NFS4_OTHER_SIZE as usize]
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpenOwner4 {
    pub clientid: Clientid4,
    #[serde(with = "serde_bytes_ng")]
    pub owner: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LockOwner4 {
    pub clientid: Clientid4,
    #[serde(with = "serde_bytes_ng")]
    pub owner: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NfsLockType4 {
    ReadLt = 1,
    WriteLt = 2,
    ReadwLt = 3,  /* blocking read */
    WritewLt = 4, /* blocking write */
}

/*
 * Share Access and Deny constants for open argument
 */
pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x00000001;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x00000002;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x00000003;

pub const OPEN4_SHARE_DENY_NONE: u32 = 0x00000000;
pub const OPEN4_SHARE_DENY_READ: u32 = 0x00000001;
pub const OPEN4_SHARE_DENY_WRITE: u32 = 0x00000002;
pub const OPEN4_SHARE_DENY_BOTH: u32 = 0x00000003;

/*
 * For LOCK, transition from open_Owner to new lock_Owner
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpenToLockOwner4 {
    pub open_seqid: Seqid4,
    pub open_stateid: Stateid4,
    pub lock_seqid: Seqid4,
    pub lock_owner: LockOwner4,
}

/*
 * For LOCK, existing lock_Owner continues to request file locks
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExistLockOwner4 {
    pub lock_stateid: Stateid4,
    pub lock_seqid: Seqid4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Locker4 {
    OpenOwner(OpenToLockOwner4),
    LockOwner(ExistLockOwner4),
}

/*
 * LOCK/Lockt/Locku: Record lock management
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lock4args {
    /* CURRENT_FH: file */
    pub locktype: NfsLockType4,
    pub reclaim: bool,
    pub offset: Offset4,
    pub length: Length4,
    pub locker: Locker4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lock4denied {
    pub offset: Offset4,
    pub length: Length4,
    pub locktype: NfsLockType4,
    pub owner: LockOwner4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lock4resok {
    pub lock_stateid: Stateid4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Lock4res {
    Resok4(Lock4resok),
    Denied(Lock4denied),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lockt4args {
    /* CURRENT_FH: file */
    pub locktype: NfsLockType4,
    pub offset: Offset4,
    pub length: Length4,
    pub owner: LockOwner4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Lockt4res {
    Resok4(()),
    Denied(Lock4denied),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Locku4args {
    /* CURRENT_FH: file */
    pub locktype: NfsLockType4,
    pub seqid: Seqid4,
    pub lock_stateid: Stateid4,
    pub offset: Offset4,
    pub length: Length4,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Locku4res {
    LockStateid(Stateid4),
}

/*
 * Result union for the record-lock operations; discriminants follow the
 * operation numbers of RFC 7531.
 */
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum NfsResOp4 {
    Oplock(Lock4res) = 12,
    Oplockt(Lockt4res) = 13,
    Oplocku(Locku4res) = 14,
}
