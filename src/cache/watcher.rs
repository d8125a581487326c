//! A single value kept up to date by a background timer.
//!
//! `Watcher<T>` owns one value produced by an async producer. A timer task
//! refreshes it every interval whether or not anyone is reading, and readers
//! calling [`Watcher::get`] may also trigger a refresh when the value is
//! missing or stale. Both paths go through the same single-flight gate: at
//! most one producer call is in flight per watcher, and every caller that
//! needs its result subscribes to it instead of starting another.
//!
//! # Example
//!
//! ```ignore
//! let watcher = Watcher::watch(Duration::from_secs(120), StalePolicy::AllowStale, move || {
//!     let scraper = scraper.clone();
//!     async move { produce_render_data(&scraper).await }
//! });
//!
//! // Block once so the first request does not have to.
//! watcher.preload().await?;
//!
//! let data = watcher.get().await?;
//! ```

use chrono::Utc;
use color_eyre::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::traits::{CacheState, Entry, RefreshError, StalePolicy};

/// A boxed future that produces the watched value
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates producer futures
type ProducerFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// What a refresh hands to everyone waiting on it
type Outcome<T> = std::result::Result<Arc<Entry<T>>, RefreshError>;

/// Construction parameters for a [`Watcher`].
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
  /// How long a produced value stays fresh, and the timer period
  pub interval: Duration,
  /// Whether stale values are served while a refresh runs
  pub policy: StalePolicy,
  /// Deadline for one producer call; defaults to `interval`
  pub timeout: Option<Duration>,
}

impl WatchOptions {
  pub fn new(interval: Duration, policy: StalePolicy) -> Self {
    Self {
      interval,
      policy,
      timeout: None,
    }
  }

  /// Bound each refresh by the given deadline.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Mutable state, guarded by one mutex per watcher.
struct Slot<T> {
  entry: Option<Arc<Entry<T>>>,
  fresh_until: Option<Instant>,
  last_error: Option<RefreshError>,
  /// Set while a refresh runs. Waiters clone it and wait for `Some`.
  in_flight: Option<watch::Receiver<Option<Outcome<T>>>>,
}

impl<T> Slot<T> {
  fn is_fresh(&self) -> bool {
    self
      .fresh_until
      .map(|until| Instant::now() < until)
      .unwrap_or(false)
  }
}

struct Inner<T> {
  slot: Mutex<Slot<T>>,
  produce: ProducerFn<T>,
  interval: Duration,
  timeout: Duration,
}

impl<T: Send + Sync + 'static> Inner<T> {
  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    // Nothing panics while the lock is held, so a poisoned slot is still consistent.
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Attach to the in-flight refresh, or start one if none is running.
  ///
  /// Must be called with the slot locked so that the check and the start
  /// are one step.
  fn join_or_start(
    self: &Arc<Self>,
    slot: &mut Slot<T>,
  ) -> watch::Receiver<Option<Outcome<T>>> {
    if let Some(rx) = &slot.in_flight {
      return rx.clone();
    }

    let (tx, rx) = watch::channel(None);
    slot.in_flight = Some(rx.clone());

    let inner = Arc::clone(self);
    tokio::spawn(async move {
      let started = Instant::now();
      let result = inner.run_producer().await;
      let outcome = inner.commit(result);

      match &outcome {
        Ok(_) => info!(elapsed = ?started.elapsed(), "Refreshed watched value"),
        Err(e) => warn!(elapsed = ?started.elapsed(), error = %e, "Refresh failed"),
      }

      // Ignore send errors - every waiter may have gone away
      let _ = tx.send(Some(outcome));
    });

    rx
  }

  async fn run_producer(&self) -> std::result::Result<T, RefreshError> {
    let produce = AssertUnwindSafe(async { (self.produce)().await }).catch_unwind();

    match tokio::time::timeout(self.timeout, produce).await {
      Err(_) => Err(RefreshError::TimedOut(self.timeout)),
      Ok(Err(_)) => Err(RefreshError::Panicked),
      Ok(Ok(result)) => result.map_err(RefreshError::from),
    }
  }

  /// Record a finished refresh and clear the in-flight marker.
  fn commit(&self, result: std::result::Result<T, RefreshError>) -> Outcome<T> {
    let mut slot = self.lock();
    slot.in_flight = None;

    match result {
      Ok(value) => {
        // Refreshes are serialized, but the wall clock is not monotonic.
        let now = Utc::now();
        let produced_at = slot
          .entry
          .as_ref()
          .map(|prev| prev.produced_at.max(now))
          .unwrap_or(now);

        let entry = Arc::new(Entry { value, produced_at });
        slot.entry = Some(Arc::clone(&entry));
        slot.fresh_until = Some(Instant::now() + self.interval);
        slot.last_error = None;
        Ok(entry)
      }
      Err(e) => {
        // A previous value, if any, stays in place.
        slot.last_error = Some(e.clone());
        Err(e)
      }
    }
  }
}

/// A value refreshed on a fixed interval, shared by many readers.
pub struct Watcher<T> {
  inner: Arc<Inner<T>>,
  policy: StalePolicy,
  timer: JoinHandle<()>,
}

impl<T: Send + Sync + 'static> Watcher<T> {
  /// Start watching with the default refresh deadline (one interval).
  ///
  /// Must be called from within a tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if `interval` is zero.
  pub fn watch<F, Fut>(interval: Duration, policy: StalePolicy, produce: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self::with_options(WatchOptions::new(interval, policy), produce)
  }

  /// Start watching with explicit options.
  ///
  /// # Panics
  ///
  /// Panics if `options.interval` is zero.
  pub fn with_options<F, Fut>(options: WatchOptions, produce: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    assert!(!options.interval.is_zero(), "watch interval must be non-zero");

    let inner = Arc::new(Inner {
      slot: Mutex::new(Slot {
        entry: None,
        fresh_until: None,
        last_error: None,
        in_flight: None,
      }),
      produce: Box::new(move || Box::pin(produce())),
      interval: options.interval,
      timeout: options.timeout.unwrap_or(options.interval),
    });

    let timer = spawn_timer(Arc::downgrade(&inner), options.interval);

    Self {
      inner,
      policy: options.policy,
      timer,
    }
  }

  /// Get the current value.
  ///
  /// With [`StalePolicy::AllowStale`], any existing value is returned at
  /// once; if it is stale a background refresh is started and this call
  /// does not wait for it. The next call sees its result. Only an empty
  /// watcher blocks.
  ///
  /// With [`StalePolicy::RequireFresh`], this blocks until a value within
  /// the interval exists, and returns the refresh error if that fails.
  pub async fn get(&self) -> std::result::Result<Arc<Entry<T>>, RefreshError> {
    let mut rx = {
      let mut slot = self.inner.lock();

      if let Some(entry) = &slot.entry {
        if slot.is_fresh() {
          return Ok(Arc::clone(entry));
        }

        if self.policy == StalePolicy::AllowStale {
          let entry = Arc::clone(entry);
          if slot.in_flight.is_none() {
            debug!("Serving stale value, refreshing in background");
          }
          self.inner.join_or_start(&mut slot);
          return Ok(entry);
        }
      }

      self.inner.join_or_start(&mut slot)
    };

    let outcome = rx.wait_for(Option::is_some).await.map(|o| o.clone());
    outcome.ok().flatten().unwrap_or(Err(RefreshError::Aborted))
  }

  /// Fill the watcher once, blocking until the first refresh finishes.
  pub async fn preload(&self) -> std::result::Result<(), RefreshError> {
    self.get().await.map(|_| ())
  }

  /// Current state of the watcher.
  pub fn state(&self) -> CacheState {
    let slot = self.inner.lock();
    if slot.in_flight.is_some() {
      CacheState::Refreshing
    } else if slot.entry.is_none() {
      CacheState::Empty
    } else if slot.is_fresh() {
      CacheState::Fresh
    } else {
      CacheState::Stale
    }
  }

  /// The latest value, fresh or not, without triggering a refresh.
  pub fn peek(&self) -> Option<Arc<Entry<T>>> {
    self.inner.lock().entry.clone()
  }

  /// The error from the latest refresh, if it failed.
  pub fn last_error(&self) -> Option<RefreshError> {
    self.inner.lock().last_error.clone()
  }
}

impl<T> Drop for Watcher<T> {
  fn drop(&mut self) {
    self.timer.abort();
  }
}

impl<T> std::fmt::Debug for Watcher<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Watcher")
      .field("policy", &self.policy)
      .field("interval", &self.inner.interval)
      .field("timeout", &self.inner.timeout)
      .finish_non_exhaustive()
  }
}

/// Refresh on every tick, whether or not anyone is reading.
///
/// Holds only a weak reference so the watcher can be dropped.
fn spawn_timer<T: Send + Sync + 'static>(
  inner: Weak<Inner<T>>,
  interval: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;

      let Some(inner) = inner.upgrade() else {
        break;
      };

      let mut slot = inner.lock();
      if slot.in_flight.is_none() {
        debug!("Timer refresh");
      }
      inner.join_or_start(&mut slot);
    }
  })
}
