//! Workspace snapshots for waypoint.
//!
//! Captures the files of a workspace at a message boundary and restores
//! them later. Content is stored once per checksum:
//! - a file seen for the first time is inlined in the collection and
//!   written to the content store
//! - a file whose bytes are already stored is recorded as a reference
//! - a file unchanged since its previous capture is recorded by checksum
//!   only
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypoint_snapshot::{SnapshotConfig, SnapshotManager, SnapshotOptions};
//! use waypoint_storage::{JsonStorage, MetadataConfig, MetadataStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let data_dir = "/project/root/.waypoint";
//! let metadata = MetadataStore::open(JsonStorage::new(data_dir), MetadataConfig::default()).await?;
//! let manager = SnapshotManager::open(
//!     "/project/root",
//!     data_dir,
//!     SnapshotConfig::default(),
//!     Arc::new(metadata),
//! )
//! .await?;
//!
//! // Capture before the assistant edits files
//! let capture = manager
//!     .create_snapshot("msg_456", &SnapshotOptions::default())
//!     .await?;
//!
//! // ... files change ...
//!
//! // Put them back
//! manager
//!     .restore_from_snapshot(&capture.collection.id, None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod cache;
mod config;
mod content;
mod error;
mod language;
mod manager;
mod restorer;

pub use builder::{SkippedFile, SnapshotCapture};
pub use cache::CaptureCache;
pub use config::{SnapshotConfig, SnapshotOptions};
pub use content::{checksum, ContentStore};
pub use error::{SnapshotError, SnapshotResult};
pub use language::detect_language;
pub use manager::{CleanupStats, SnapshotComparison, SnapshotManager, SnapshotStats, GC_INTERVAL};
pub use restorer::{FileOperation, FileOutcome, FileRestore, RestoreReport, SnapshotRestorer};
