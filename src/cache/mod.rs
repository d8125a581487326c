//! Periodically refreshed, single-flight value cache.
//!
//! This module provides a source-agnostic mechanism that:
//! - Holds one value produced by an async producer
//! - Refreshes it on a fixed interval from a background timer
//! - Coalesces concurrent refreshes into one in-flight producer call
//! - Optionally serves the last value while a refresh runs

mod traits;
mod watcher;

pub use traits::{RefreshError, StalePolicy};
pub use watcher::{WatchOptions, Watcher};
