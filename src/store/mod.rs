//! Persisted local state
//!
//! Two documents live next to the workspace: the lockfile recording hashes of
//! regenerated artifacts, and the `.wmill/` directory mirroring the last
//! pulled remote state.

pub mod lockfile;
pub mod state;

pub use lockfile::{Lockfile, LOCKFILE_NAME};
pub use state::{StateDir, STATE_DIR_NAME};
