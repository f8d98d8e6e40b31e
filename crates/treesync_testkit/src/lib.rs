//! # TreeSync Testkit
//!
//! Test utilities for TreeSync.
//!
//! This crate provides:
//! - Sync tree harnesses with recording listen providers
//! - JSON conversions for writing test data inline
//! - Property-based test generators using proptest
//! - A scripted scenario runner plus a bundled scenario corpus
//!
//! ## Usage
//!
//! ```rust,ignore
//! use treesync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_tree() {
//!     let mut harness = TestTree::in_memory();
//!     let id = harness.listen_default("rooms");
//!     // ... drive the tree and assert on returned events
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod corpus;
pub mod fixtures;
pub mod generators;
pub mod script;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::corpus::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::script::*;
}

pub use corpus::*;
pub use fixtures::*;
pub use generators::*;
pub use script::*;
