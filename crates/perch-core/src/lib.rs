//! Perch core — shared types, configuration, and the trait seams that keep
//! the posting pipeline decoupled from the browser layer and the platform.

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::PerchConfig;
pub use error::{PerchError, Result};
