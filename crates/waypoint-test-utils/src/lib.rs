//! Testing utilities and fixtures for waypoint.
//!
//! - **Fixtures**: temporary workspaces with a configurable file tree
//! - **Assertions**: helpers comparing files and whole trees with readable
//!   diffs on failure
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use waypoint_test_utils::{assertions::assert_file_equals, TestProject};
//!
//! #[tokio::test]
//! async fn test_restore() {
//!     let project = TestProject::new()
//!         .with_file("src/main.rs", "fn main() {}")
//!         .build();
//!
//!     // ... snapshot, edit, restore ...
//!     assert_file_equals(&project.path().join("src/main.rs"), "fn main() {}");
//! }
//! ```

pub mod assertions;
pub mod fixtures;

pub use fixtures::{BuiltTestProject, TestProject};
