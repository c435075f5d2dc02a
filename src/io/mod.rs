//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `storage` - Atomic file writes and the storage error type
//! - `checkpoint` - In-progress trip checkpoints
//! - `archive_store` - Finalized trip archives on disk
//! - `remote_store` - Remote object store client (HTTP) and in-memory fake
//! - `sample_feed` - JSONL sensor feed from a replay file or TCP listener
//! - `notice_channel` - Typed channel for user-facing notices
//! - `status_server` - Status, metrics and health HTTP endpoint

pub mod archive_store;
pub mod checkpoint;
pub mod notice_channel;
pub mod remote_store;
pub mod sample_feed;
pub mod status_server;
pub mod storage;

// Re-export commonly used types
pub use archive_store::ArchiveStore;
pub use checkpoint::CheckpointStore;
pub use notice_channel::{create_notice_channel, NoticeSender};
pub use remote_store::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use sample_feed::{replay_file, start_feed_listener, FeedListenerConfig};
pub use status_server::start_status_server;
pub use storage::{StorageError, StorageResult};
