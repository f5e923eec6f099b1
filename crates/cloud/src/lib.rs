//! Shared storage substrate for the capture and detection workers.
//!
//! - [`store::ObjectStore`]: the conditional-create/read/delete primitives.
//! - [`backlog::Backlog`]: pending clips, archive moves and artifact uploads,
//!   with a filesystem ([`local::LocalBacklog`]) and an S3-compatible
//!   ([`s3::S3Backlog`]) implementation.
//! - [`lock::DistributedLock`]: lease-based claims on clips.

pub mod backlog;
pub mod error;
pub mod layout;
pub mod local;
pub mod lock;
pub mod s3;
pub mod store;
