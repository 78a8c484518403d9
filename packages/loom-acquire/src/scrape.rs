use scraper::{Html, Selector};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use loom_domain::text::collapse_whitespace;

use crate::{Article, Result, fetcher::Fetcher, sanitize};

const TITLE_SELECTORS: &[&str] =
	&["h1", ".headline", ".title", "[class*=title]", "[class*=headline]"];
const BODY_SELECTORS: &[&str] = &[
	".article-content",
	".post-content",
	".entry-content",
	".content",
	"[class*=article] p",
	"[class*=content] p",
];
const MIN_BODY_CHARS: usize = 100;

/// Fetches a page through the robots-aware fetcher and extracts an
/// article via the selector fallback chains. Returns `None` when no
/// usable title and body could be found.
pub async fn fetch_article(fetcher: &Fetcher, url: &str) -> Result<Option<Article>> {
	let page = fetcher.get_checked(url).await?;

	Ok(extract_article(&page.body, url))
}

pub fn extract_article(html: &str, url: &str) -> Option<Article> {
	let document = Html::parse_document(html);
	let title = extract_title(&document)?;
	let content = extract_body(&document)?;

	Some(Article {
		title,
		content,
		source_url: Some(url.to_string()),
		published_at: extract_published(&document),
		author: extract_meta(&document, "meta[name=author]"),
		summary: extract_meta(&document, "meta[name=description]"),
		tags: Vec::new(),
	})
}

fn extract_title(document: &Html) -> Option<String> {
	for raw in TITLE_SELECTORS {
		let Ok(selector) = Selector::parse(raw) else {
			continue;
		};

		for element in document.select(&selector) {
			let text = collapse_whitespace(&element.text().collect::<String>());

			if !text.is_empty() {
				return Some(text);
			}
		}
	}

	None
}

fn extract_body(document: &Html) -> Option<String> {
	for raw in BODY_SELECTORS {
		let Ok(selector) = Selector::parse(raw) else {
			continue;
		};
		let mut combined = String::new();

		for element in document.select(&selector) {
			sanitize::collect_text(element, &mut combined);
			combined.push(' ');
		}

		let text = collapse_whitespace(&combined);

		if text.chars().count() >= MIN_BODY_CHARS {
			return Some(text);
		}
	}

	None
}

fn extract_meta(document: &Html, raw_selector: &str) -> Option<String> {
	let selector = Selector::parse(raw_selector).ok()?;
	let element = document.select(&selector).next()?;
	let content = element.value().attr("content")?.trim();

	if content.is_empty() { None } else { Some(content.to_string()) }
}

fn extract_published(document: &Html) -> Option<OffsetDateTime> {
	let raw = extract_meta(document, "meta[property=\"article:published_time\"]")?;

	OffsetDateTime::parse(&raw, &Rfc3339).ok()
}
