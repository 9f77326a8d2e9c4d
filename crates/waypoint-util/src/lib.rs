//! Shared utilities for waypoint.
//!
//! This crate provides common utilities used across the waypoint workspace:
//! - Error handling patterns
//! - ULID-based identifier generation
//! - Logging setup with tracing
//! - Path utilities
//! - Glob pattern compilation
//! - Per-key async locking
//! - Atomic file writes (temp file + rename)
//! - RAII-based timing for operation measurement

pub mod error;
pub mod fs;
pub mod glob;
pub mod id;
pub mod lock;
pub mod log;
pub mod path;
pub mod timing;

pub use error::{Error, Result};
pub use glob::{GlobPattern, GlobSet};
pub use id::Identifier;
pub use lock::{KeyedGuard, KeyedLocks};
pub use timing::{Operation, TimingGuard};
