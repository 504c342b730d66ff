//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the notesync core:
//! - Logging and tracing bootstrap
//! - Configuration management (`CoreConfig` builder)
//! - Event bus for sync and rate-limit notifications
//!
//! ## Overview
//!
//! Every other `core-*` crate depends on this one for its logging conventions,
//! tuning parameters and event types.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
