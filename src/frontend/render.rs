//! The value the frontend serves, and the producer that builds it.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use serde::Serialize;
use tracing::info;

use crate::cache::{WatchOptions, Watcher};
use crate::gva::scan::{self, PageSource};
use crate::gva::types::{start_of_day, today_at};
use crate::gva::{CachedPages, MassShootingRecord, Scraper};

/// Everything the index page needs, produced once per refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RenderData {
  /// Full days without an incident
  pub days: i64,
  /// Today's incidents
  pub records: Vec<MassShootingRecord>,
  pub last_updated: DateTime<Utc>,
}

impl RenderData {
  pub fn total_killed(&self) -> u64 {
    self.records.iter().map(|r| u64::from(r.killed)).sum()
  }

  pub fn total_injured(&self) -> u64 {
    self.records.iter().map(|r| u64::from(r.injured)).sum()
  }
}

/// Full days between the start of `latest` and `now`, not counting the day
/// still in progress.
pub fn days_since(latest: NaiveDate, tz: &Tz, now: DateTime<Utc>) -> i64 {
  let elapsed = now - start_of_day(latest, tz);
  (elapsed.num_days() - 1).max(0)
}

/// Build the render data from a page source as of `now`.
pub async fn produce_render_data<S>(
  source: &S,
  tz: &Tz,
  now: DateTime<Utc>,
) -> Result<RenderData>
where
  S: PageSource<Record = MassShootingRecord> + Sync,
{
  let pages = CachedPages::new(source);

  let first = pages
    .fetch_page(0)
    .await
    .wrap_err("cannot get page 0")?;
  let latest = first
    .first()
    .map(|r| r.incident_date)
    .ok_or_else(|| eyre!("no records found"))?;

  let today = today_at(now, tz);
  let records = scan::collect_from(&pages, today).await?;
  let days = days_since(latest, tz, now);

  info!(%latest, %today, days, today_count = records.len(), "Produced render data");

  Ok(RenderData {
    days,
    records,
    last_updated: now,
  })
}

/// Keep render data scraped from the archive up to date.
pub fn watch_render_data(
  scraper: Scraper,
  tz: Tz,
  options: WatchOptions,
) -> Watcher<RenderData> {
  Watcher::with_options(options, move || {
    let scraper = scraper.clone();
    async move { produce_render_data(&scraper, &tz, Utc::now()).await }
  })
}
