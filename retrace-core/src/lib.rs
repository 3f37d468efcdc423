//! # retrace-core
//!
//! Core library for retrace - delta-based undo/redo for project generators.
//!
//! Commands mutate the filesystem through a [`Tracker`], which records each
//! change as a reversible [`Delta`]. Finalizing the tracker stores the deltas
//! as one [`Operation`] in the project's [`HistoryStore`], from where it can be
//! undone and redone.

pub mod context;
pub mod delta;
pub mod diff;
pub mod error;
pub mod history;
pub mod models;
pub mod storage;
pub mod symlink;
pub mod tracker;

pub use context::Context;
pub use delta::Direction;
pub use error::{Error, Result};
pub use history::HistoryStore;
pub use models::{Delta, DeltaKind, HistoryEntry, HistorySummary, Operation, StepOutcome};
pub use storage::Storage;
pub use tracker::{tracked, Tracker};
