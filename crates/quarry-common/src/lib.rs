//! # Quarry Common
//!
//! Common types and shared abstractions for Quarry.
//!
//! This crate provides foundational types used across all Quarry crates:
//! - Coordinate spaces (world, spatial, chunk, section, local) and their transforms
//! - Size and grid geometry
//! - Common error types
//! - Version information for persisted schemas

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::version::*;
}

pub use prelude::*;
