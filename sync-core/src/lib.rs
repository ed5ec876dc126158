//! # sync-core
//!
//! Pure logic for linkmirror (no I/O, instant tests).
//!
//! This crate implements the decisions the engine makes without touching
//! the filesystem, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in as an argument rather than read
//! from a clock, so the coalescer and progress tracker are deterministic.
//!
//! The actual I/O (watching, copying, linking) is performed by `sync-engine`,
//! which interprets the plans produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coalesce;
pub mod decide;
pub mod policy;
pub mod progress;
pub mod retry;
pub mod scan;

pub use coalesce::{Coalesced, Coalescer};
pub use decide::{plan_copy, plan_link, CopyPlan, DestKind, LinkPlan};
pub use policy::{action_for, policy_for};
pub use progress::ProgressTracker;
pub use retry::RetryPolicy;
pub use scan::{diff_snapshots, Snapshot};
