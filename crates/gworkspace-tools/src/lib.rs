//! Read-only Google Workspace tools.
//!
//! Every tool takes the shared [`AuthContext`](gworkspace_auth::AuthContext),
//! asks it for a service handle, and returns a [`ToolResult`]. Nothing here
//! sees credential material.

pub mod calendar;
pub mod common;
pub mod drive;
pub mod envelope;
pub mod gmail;
pub mod sheets;

pub use envelope::{failure, is_success, render, success, ToolError, ToolResult};
