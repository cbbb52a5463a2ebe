//! Common utilities and types shared across the devloop crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for stack configuration populated from the environment
pub mod config;

/// Module for loading a local `.env` file into the process environment
pub mod dotenv;

/// Module for fixed-interval polling with bounded attempts
pub mod poll;

/// Module for secret types that prevent accidental logging
pub mod secret;
