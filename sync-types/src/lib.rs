//! # sync-types
//!
//! Data model shared by every linkmirror crate.
//!
//! This crate provides the foundational types:
//! - [`TaskId`], [`RelPath`] - Identity and path keys
//! - [`Task`], [`TaskStatus`], [`ExtensionSet`] - Mirror task definitions
//! - [`FileStamp`], [`CacheEntry`], [`ContentHash`] - Content identity
//! - [`ChangeKind`], [`RawChange`], [`ChangeEvent`] - Change notifications
//! - [`Policy`], [`ActionPolicy`], [`SyncAction`] - Derived sync decisions
//! - [`TypesError`] - Validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod cache;
mod change;
mod error;
mod ids;
mod task;

pub use action::{ActionPolicy, Policy, SyncAction};
pub use cache::{CacheEntry, ContentHash, FileStamp};
pub use change::{ChangeEvent, ChangeKind, RawChange};
pub use error::TypesError;
pub use ids::{RelPath, TaskId};
pub use task::{ExtensionSet, Task, TaskStatus};
