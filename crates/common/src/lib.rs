//! Common utilities and types shared across the meeting broadcast components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the versioned push-channel wire schema
pub mod wire;
