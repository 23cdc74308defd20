//! # chroma-core
//!
//! Core types, queue management, and error handling for the Chroma music player.

pub mod catalog;
pub mod error;
pub mod types;

pub use catalog::{Catalog, JsonCatalog, StaticCatalog};
pub use error::{Error, Result};
pub use types::*;
