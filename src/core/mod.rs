//! Core types and constants for the positioning core

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
