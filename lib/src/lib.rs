#![doc = include_str!("../README.md")]

pub mod server;

pub use keel_proto as proto;
pub use server::lockmanager::LockManager;
pub use server::request::NfsRequest;
