//! Core types shared by the refresh cache.

use chrono::{DateTime, Utc};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// A value produced by one successful refresh.
#[derive(Debug)]
pub struct Entry<T> {
  /// The produced value
  pub value: T,
  /// When the refresh that produced this value finished
  pub produced_at: DateTime<Utc>,
}

impl<T> Deref for Entry<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.value
  }
}

/// Whether readers may be served a value past its refresh interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
  /// Serve the last value immediately and refresh in the background
  #[default]
  AllowStale,
  /// Block readers until a value within the interval is available
  RequireFresh,
}

/// Observable state of a refresh cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
  /// No value has ever been produced
  Empty,
  /// A value exists and is within the refresh interval
  Fresh,
  /// A value exists, the interval has elapsed and nothing is refreshing
  Stale,
  /// A refresh is in flight
  Refreshing,
}

impl CacheState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheState::Empty => "empty",
      CacheState::Fresh => "fresh",
      CacheState::Stale => "stale",
      CacheState::Refreshing => "refreshing",
    }
  }
}

/// Why a refresh did not produce a value.
///
/// Cloneable so that every caller attached to the same in-flight refresh
/// receives the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
  #[error("refresh failed: {0:#}")]
  Failed(Arc<color_eyre::Report>),

  #[error("refresh timed out after {0:?}")]
  TimedOut(Duration),

  #[error("refresh panicked")]
  Panicked,

  #[error("refresh was aborted before completing")]
  Aborted,
}

impl From<color_eyre::Report> for RefreshError {
  fn from(report: color_eyre::Report) -> Self {
    RefreshError::Failed(Arc::new(report))
  }
}
