//! State management module for the Terrace provisioning engine.
//!
//! This module provides persistent state storage for applied resources:
//! the last-applied attributes, provider-assigned identifiers and outputs of
//! every resource, the run outputs, and the run history.

mod local;
mod lock;
mod s3;
mod session;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use session::StateSession;
pub use store::StateStore;
pub use types::{RunHistoryEntry, RunOperation, ResourceState, STATE_VERSION, StateSnapshot};
