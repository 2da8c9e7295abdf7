//! Security helpers
//!
//! This module provides:
//! - Privilege detection
//! - Owner-only creation and atomic replacement of files holding keys

mod permissions;
mod privileges;

pub use permissions::{ensure_directory, write_atomic, write_new, SecureFileMode};
pub use privileges::{check_privileges, effective_uid};
