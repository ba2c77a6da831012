//! Core types, config, and errors for the Koemi conversation backend.

pub mod config;
pub mod error;
pub mod types;
