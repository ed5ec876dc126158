//! CLI command implementations.

pub mod init;
pub mod logs;
pub mod run;
pub mod status;
pub mod sync;
