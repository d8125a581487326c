//! Gun Violence Archive scraping.

pub mod cached_client;
pub mod client;
mod html;
pub mod scan;
pub mod types;

pub use cached_client::CachedPages;
pub use client::Scraper;
pub use types::MassShootingRecord;
