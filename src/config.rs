use chrono_tz::Tz;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{StalePolicy, WatchOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Address the HTTP frontend listens on
  pub listen: SocketAddr,
  /// IANA name of the archive's reporting timezone
  pub timezone: String,
  pub scraper: ScraperConfig,
  pub refresh: RefreshConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
      timezone: "America/New_York".to_string(),
      scraper: ScraperConfig::default(),
      refresh: RefreshConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
  pub base_url: String,
  pub user_agent: String,
  /// Per-request timeout
  pub request_timeout_secs: u64,
}

impl Default for ScraperConfig {
  fn default() -> Self {
    Self {
      base_url: "https://www.gunviolencearchive.org".to_string(),
      user_agent: concat!("mass-shootings-count/", env!("CARGO_PKG_VERSION")).to_string(),
      request_timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  /// How often the data is scraped again
  pub interval_secs: u64,
  /// Deadline for one whole refresh (all pages)
  pub timeout_secs: u64,
  /// Serve the previous data while a refresh runs
  pub allow_stale: bool,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      interval_secs: 120,
      timeout_secs: 120,
      allow_stale: true,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Write logs to this file (rotated daily) instead of stderr
  pub file: Option<PathBuf>,
  /// Filter directive, e.g. "mass_shootings_count=debug"; RUST_LOG wins
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mass-shootings-count.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mass-shootings-count/config.yaml
  ///
  /// Defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mass-shootings-count.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mass-shootings-count").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  /// Parse and validate configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.refresh.interval_secs == 0 {
      return Err(eyre!("refresh.interval_secs must be greater than zero"));
    }
    if self.refresh.timeout_secs == 0 {
      return Err(eyre!("refresh.timeout_secs must be greater than zero"));
    }
    self.tz()?;
    Ok(())
  }

  /// The archive's reporting timezone.
  pub fn tz(&self) -> Result<Tz> {
    self
      .timezone
      .parse::<Tz>()
      .map_err(|e| eyre!("Invalid timezone '{}': {}", self.timezone, e))
  }

  pub fn watch_options(&self) -> WatchOptions {
    let policy = if self.refresh.allow_stale {
      StalePolicy::AllowStale
    } else {
      StalePolicy::RequireFresh
    };

    WatchOptions::new(Duration::from_secs(self.refresh.interval_secs), policy)
      .with_timeout(Duration::from_secs(self.refresh.timeout_secs))
  }
}
