//! Application-level orchestration.
//!
//! This module owns the session lifecycle (channel mount/unmount, submissions)
//! and post-session processing such as exports. UI/CLI layers talk to it only
//! through commands and published snapshots.

mod controller;
mod post_process;
pub mod session;

pub(crate) use controller::{run_controller, Controller, UiCommand, UiUpdate};
pub(crate) use post_process::process_session_completion;
#[cfg(feature = "tui")]
pub(crate) use post_process::{export_json, snapshot_path};
