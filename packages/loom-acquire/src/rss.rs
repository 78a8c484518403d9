use time::{Duration, OffsetDateTime};

use loom_domain::text::truncate_chars;

use crate::{Article, Error, Result, fetcher::Fetcher, sanitize::html_to_text};

const DEFAULT_SINCE: Duration = Duration::hours(24);
const MIN_CONTENT_CHARS: usize = 100;
const SUMMARY_MAX_CHARS: usize = 500;

/// Pulls a feed and extracts the entries newer than `since` (default:
/// the last 24 hours). A single bad entry is logged and skipped; a feed
/// that fails to fetch or parse is an error carrying the feed URL.
pub async fn poll(
	fetcher: &Fetcher,
	feed_url: &str,
	since: Option<OffsetDateTime>,
) -> Result<Vec<Article>> {
	let now = OffsetDateTime::now_utc();
	let since = since.unwrap_or(now - DEFAULT_SINCE);
	let page = fetcher.get(feed_url).await?;
	let feed = feed_rs::parser::parse(page.body.as_bytes())
		.map_err(|err| Error::Feed { url: feed_url.to_string(), message: err.to_string() })?;
	let mut articles = Vec::new();

	for entry in feed.entries {
		match extract_entry(&entry, now) {
			Some(article) => {
				let published = article.published_at.unwrap_or(now);

				if published < since {
					continue;
				}

				articles.push(article);
			},
			None => {
				tracing::debug!(feed = %feed_url, entry = %entry.id, "Skipping feed entry.");
			},
		}
	}

	Ok(articles)
}

fn extract_entry(entry: &feed_rs::model::Entry, now: OffsetDateTime) -> Option<Article> {
	let title = entry.title.as_ref().map(|text| html_to_text(&text.content))?;
	let link = entry.links.first().map(|link| link.href.clone())?;

	if title.is_empty() || link.is_empty() {
		return None;
	}

	let body = entry
		.content
		.as_ref()
		.and_then(|content| content.body.as_deref())
		.map(html_to_text)
		.unwrap_or_default();
	let summary = entry.summary.as_ref().map(|text| html_to_text(&text.content));
	// Some feeds only carry a summary; take whichever is longer.
	let content = match &summary {
		Some(summary) if summary.len() > body.len() => summary.clone(),
		_ => body,
	};

	if content.chars().count() < MIN_CONTENT_CHARS {
		return None;
	}

	let published_at = entry
		.published
		.or(entry.updated)
		.and_then(|date| OffsetDateTime::from_unix_timestamp(date.timestamp()).ok())
		.or(Some(now));
	let author = entry.authors.first().map(|person| person.name.clone()).filter(|name| !name.is_empty());
	let tags = entry
		.categories
		.iter()
		.map(|category| category.term.to_lowercase())
		.filter(|term| term.len() > 2)
		.collect();

	Some(Article {
		title,
		content,
		source_url: Some(link),
		published_at,
		author,
		summary: summary.map(|text| truncate_chars(&text, SUMMARY_MAX_CHARS)),
		tags,
	})
}
