//! Bounded scan over newest-first pages of records.
//!
//! Pages are sorted descending by date, so once the scan has walked past the
//! target date nothing further can match and it stops without fetching the
//! rest of the archive.

use chrono::NaiveDate;
use color_eyre::{eyre::WrapErr, Result};
use std::future::Future;
use tracing::debug;

use super::types::Dated;

/// A source of newest-first pages. An empty page means there are no more.
pub trait PageSource {
  type Record: Dated + Send;

  /// Fetch the page at a zero-based index.
  fn fetch_page(&self, index: usize) -> impl Future<Output = Result<Vec<Self::Record>>> + Send;
}

/// Collect every record dated `date` from a [`PageSource`].
pub async fn collect_from<S: PageSource>(source: &S, date: NaiveDate) -> Result<Vec<S::Record>> {
  collect_by_date(move |i| source.fetch_page(i), date).await
}

/// Collect every record dated `date`, fetching pages in order until no
/// later page can contain a match.
///
/// Stops when:
/// - a page is empty (end of data)
/// - the newest record on page 0 is older than `date`
/// - matches were found and the page's last record no longer matches
/// - the page's last record is older than `date`
pub async fn collect_by_date<R, F, Fut>(mut fetch_page: F, date: NaiveDate) -> Result<Vec<R>>
where
  R: Dated,
  F: FnMut(usize) -> Fut,
  Fut: Future<Output = Result<Vec<R>>>,
{
  let mut records = Vec::new();

  for i in 0.. {
    let page = fetch_page(i)
      .await
      .wrap_err_with(|| format!("cannot get page {}", i))?;

    let (Some(first), Some(last)) = (
      page.first().map(Dated::date),
      page.last().map(Dated::date),
    ) else {
      debug!(page = i, "Empty page, end of data");
      break;
    };

    records.extend(page.into_iter().filter(|r| r.date() == date));

    if i == 0 && first < date {
      // The latest record is older than the target, so nothing matches.
      debug!(%date, latest = %first, "No records on or after date");
      break;
    }

    if !records.is_empty() && last != date {
      debug!(page = i, matched = records.len(), "Walked past date");
      break;
    }

    if last < date {
      debug!(page = i, "Walked past date without a match");
      break;
    }
  }

  Ok(records)
}
