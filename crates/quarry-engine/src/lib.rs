//! # Quarry Engine
//!
//! Headless host for a Quarry world.
//!
//! This crate ties the world crate to a running process:
//! - Configuration loaded from `quarry.toml`
//! - Opening a saved surface and preparing the spawn area
//! - Interval auto-save and save on exit

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod autosave;
pub mod config;
pub mod host;
