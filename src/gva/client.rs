use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ScraperConfig;

use super::html;
use super::scan::PageSource;
use super::types::MassShootingRecord;

/// Path of the mass shootings report relative to the base URL, newest
/// incidents first
const MASS_SHOOTING_PATH: &str = "reports/mass-shooting";

/// Gun Violence Archive scraper
#[derive(Clone)]
pub struct Scraper {
  client: reqwest::Client,
  base_url: Url,
}

impl Scraper {
  pub fn new(config: &ScraperConfig) -> Result<Self> {
    let base_url = parse_base_url(&config.base_url)?;

    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.as_str())
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Get one page of the mass shootings report
  pub async fn mass_shootings(&self, page: usize) -> Result<Vec<MassShootingRecord>> {
    let url = report_url(&self.base_url, page)?;
    debug!(%url, "Fetching mass shootings page");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Unexpected status {} from {}", status, url));
    }

    let body = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    html::parse_mass_shootings(&body, &self.base_url)
      .wrap_err_with(|| format!("Failed to parse {}", url))
  }
}

impl PageSource for Scraper {
  type Record = MassShootingRecord;

  async fn fetch_page(&self, index: usize) -> Result<Vec<MassShootingRecord>> {
    self.mass_shootings(index).await
  }
}

/// Parse the base URL as a directory so report paths are joined below it.
fn parse_base_url(base_url: &str) -> Result<Url> {
  let mut url =
    Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
  if url.cannot_be_a_base() {
    return Err(eyre!("Invalid base URL '{}': not a hierarchical URL", base_url));
  }
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

/// URL of a zero-based report page
fn report_url(base_url: &Url, page: usize) -> Result<Url> {
  let mut url = base_url
    .join(MASS_SHOOTING_PATH)
    .map_err(|e| eyre!("Failed to build report URL: {}", e))?;
  url
    .query_pairs_mut()
    .append_pair("page", &page.to_string());
  Ok(url)
}
