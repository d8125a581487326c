//! Page memo that wraps a page source for the duration of one refresh.

use color_eyre::Result;
use std::sync::{Mutex, PoisonError};

use super::scan::PageSource;

/// Remembers pages already fetched, so a refresh that reads page 0 for the
/// latest incident and then scans from page 0 only hits the network once.
///
/// Pages are remembered in order only; the memo is meant to be dropped at
/// the end of the refresh so the next one sees new data.
pub struct CachedPages<'a, S: PageSource> {
  inner: &'a S,
  pages: Mutex<Vec<Vec<S::Record>>>,
}

impl<'a, S: PageSource> CachedPages<'a, S> {
  pub fn new(inner: &'a S) -> Self {
    Self {
      inner,
      pages: Mutex::new(Vec::new()),
    }
  }
}

impl<S> PageSource for CachedPages<'_, S>
where
  S: PageSource + Sync,
  S::Record: Clone + Sync,
{
  type Record = S::Record;

  async fn fetch_page(&self, index: usize) -> Result<Vec<S::Record>> {
    let cached = self
      .pages
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(index)
      .cloned();
    if let Some(page) = cached {
      return Ok(page);
    }

    let page = self.inner.fetch_page(index).await?;

    let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
    if index == pages.len() {
      pages.push(page.clone());
    }

    Ok(page)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gva::types::Dated;
  use chrono::NaiveDate;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, Clone, PartialEq)]
  struct Rec(u32);

  impl Dated for Rec {
    fn date(&self) -> NaiveDate {
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }
  }

  struct Counting {
    calls: AtomicUsize,
  }

  impl PageSource for Counting {
    type Record = Rec;

    async fn fetch_page(&self, index: usize) -> Result<Vec<Rec>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(vec![Rec(index as u32)])
    }
  }

  #[tokio::test]
  async fn test_repeated_page_fetched_once() {
    let source = Counting {
      calls: AtomicUsize::new(0),
    };
    let pages = CachedPages::new(&source);

    assert_eq!(pages.fetch_page(0).await.unwrap(), vec![Rec(0)]);
    assert_eq!(pages.fetch_page(0).await.unwrap(), vec![Rec(0)]);
    assert_eq!(pages.fetch_page(1).await.unwrap(), vec![Rec(1)]);
    assert_eq!(pages.fetch_page(1).await.unwrap(), vec![Rec(1)]);

    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_out_of_order_page_not_remembered() {
    let source = Counting {
      calls: AtomicUsize::new(0),
    };
    let pages = CachedPages::new(&source);

    pages.fetch_page(2).await.unwrap();
    pages.fetch_page(2).await.unwrap();

    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
  }
}
