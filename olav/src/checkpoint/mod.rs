//! Checkpoint persistence: crash-safe resume and HITL suspension.
//!
//! A checkpoint is a per-thread state snapshot written after every node. The
//! latest version is the resumption point; writes are atomic per thread (a
//! reader sees the old or the new checkpoint, never a partial one). History may
//! be pruned, but the latest version is retained until the thread is terminal.
//!
//! - [`Checkpoint`]: version + resumption node + state + pending call ids.
//! - [`Checkpointer`]: the storage trait.
//! - [`MemorySaver`]: in-memory, for tests and ephemeral deployments.
//! - [`SqliteSaver`]: persistent across restarts.

mod checkpoint;
mod checkpointer;
mod memory_saver;
mod sqlite_saver;

pub use checkpoint::{Checkpoint, CHECKPOINT_SCHEMA_VERSION};
pub use checkpointer::{CheckpointError, Checkpointer};
pub use memory_saver::MemorySaver;
pub use sqlite_saver::SqliteSaver;
