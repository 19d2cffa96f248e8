//! LMS Sync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the lms-sync workspace.
//!
//! # Overview
//!
//! This crate provides the pieces used across all workspace members:
//!
//! - **Error Handling**: the [`SyncError`] taxonomy and [`Result`] alias
//! - **Logging**: tracing-based logging setup
//! - **Types**: canonical domain records and raw wire records

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SyncError};
