//! Core types shared across the sync engine.

use std::collections::BTreeMap;

/// Canonical `base path -> content` snapshot of a tree.
///
/// A `BTreeMap` keeps iteration order stable, so diffs built from the same
/// snapshots always list changes the same way before sorting.
pub type FlatTree = BTreeMap<String, String>;

/// Hex-encoded blake3 hash.
pub type ContentHash = String;

/// Direction of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote into the local tree.
    Pull,
    /// Local tree into the remote.
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}
