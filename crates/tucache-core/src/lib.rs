//! tucache Core
//!
//! Core types and interfaces shared by the parse engines and the
//! translation-unit cache.

pub mod config;
pub mod error;
pub mod location;
pub mod types;

pub use error::{Error, Result};
pub use location::{CompleteAtArgs, CursorLocation, Location, SourceFile};
pub use types::*;
