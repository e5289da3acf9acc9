//! Foundation module - core utilities shared by the engine
//!
//! - Math types
//! - Logging setup
//! - Frame timing

pub mod logging;
pub mod math;
pub mod time;
