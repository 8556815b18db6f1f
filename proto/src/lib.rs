//! Wire-level NFSv4 data types for the keel locking core.
//!
//! The definitions follow RFC 7531; only the subset the record-lock
//! operations and their collaborators exchange is carried here. Transport
//! and XDR framing belong to the embedding server.

pub mod nfs4_proto;
