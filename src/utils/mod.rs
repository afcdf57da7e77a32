//! Utilities Module
//!
//! Common utilities used across the crate.

pub mod hex;
pub mod logging;
