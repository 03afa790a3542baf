//! # querybuf Configuration Module
//!
//! This module centralizes configuration for the buffer subsystem. Numeric
//! defaults live in [`constants`], grouped by functional area, with their
//! interdependencies checked at compile time. [`BufferConfig`] is the
//! configuration set a `BufferManager` consumes at initialization.
//!
//! ## Module Organization
//!
//! - [`constants`]: default values and limits
//! - `buffer_config`: `BufferConfig` builder and property parsing

mod buffer_config;
pub mod constants;

pub use buffer_config::{BufferConfig, MemoryLimit};
pub use constants::*;
