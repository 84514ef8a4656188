//! Lectern Common - Shared configuration, errors, and logging for Lectern.
//!
//! This crate provides:
//! - Configuration types and loading
//! - The error taxonomy shared by the reading core and its adapters
//! - Logging setup and trace ID helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DiscordConfig, ObservabilityConfig, ReadingConfig};
pub use error::{Error, Result};

