//! wmsync: bidirectional synchronization between a local artifact tree and a
//! remote workspace.
//!
//! Both sides are read through a virtual tree, flattened into a map of base
//! paths to normalized content, and diffed. Pull writes the differences to
//! disk; push folds them back into per-artifact remote operations. A lockfile
//! of content hashes tracks which derived state (schemas, dependency locks)
//! is out of date.

pub mod artifact;
pub mod codebase;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod glob;
pub mod logging;
pub mod regeneration;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tooling;
pub mod tree;
pub mod types;
