pub mod fetcher;
pub mod import;
pub mod robots;
pub mod rss;
pub mod sanitize;
pub mod scrape;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

use time::OffsetDateTime;

/// A unit of acquired content, before deduplication turns it into a
/// document.
#[derive(Clone, Debug)]
pub struct Article {
	pub title: String,
	pub content: String,
	pub source_url: Option<String>,
	pub published_at: Option<OffsetDateTime>,
	pub author: Option<String>,
	pub summary: Option<String>,
	pub tags: Vec<String>,
}
