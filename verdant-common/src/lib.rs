//! # Verdant Common Library
//!
//! Shared code for the Verdant plant identification services:
//! - Error types
//! - Configuration loading (root folder, TOML bootstrap config)
//! - Event types and the broadcast EventBus
//! - Retry policy and the generic poll-until-condition utility

pub mod config;
pub mod error;
pub mod events;
pub mod retry;

pub use error::{Error, Result};
pub use retry::{poll_until, PollOutcome, RetryPolicy};
