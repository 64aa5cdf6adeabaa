//! # Tether Support
//!
//! Diagnostics rendering shared by the tether crates.
//!
//! The container reports errors as ordered, structured records; this crate
//! owns how those records read as text.

pub mod rendering;
