use std::{
	collections::HashMap,
	time::{Duration, Instant},
};

use robotstxt::DefaultMatcher;
use tokio::sync::Mutex;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
enum CachedRules {
	/// robots.txt fetched and stored verbatim; empty string allows all.
	Rules(String),
	/// The fetch failed in a way that leaves permissions unknown.
	Unknown,
}

struct CacheEntry {
	rules: CachedRules,
	fetched_at: Instant,
}

/// Per-host robots.txt cache with a one-hour TTL. A missing robots.txt
/// (404) allows everything; a fetch failure denies everything until the
/// entry expires.
pub struct RobotsCache {
	entries: Mutex<HashMap<String, CacheEntry>>,
}
impl RobotsCache {
	pub fn new() -> Self {
		Self { entries: Mutex::new(HashMap::new()) }
	}

	pub async fn can_fetch(&self, client: &reqwest::Client, url: &url::Url, user_agent: &str) -> bool {
		let Some(host) = url.host_str() else {
			return false;
		};
		let rules = self.rules_for_host(client, url, host).await;

		match rules {
			CachedRules::Rules(content) => {
				if content.is_empty() {
					return true;
				}

				let mut matcher = DefaultMatcher::default();
				let allowed =
					matcher.one_agent_allowed_by_robots(&content, user_agent, url.as_str());

				if !allowed {
					tracing::debug!(url = %url, "robots.txt disallows fetch.");
				}

				allowed
			},
			CachedRules::Unknown => {
				tracing::debug!(host = %host, "robots.txt unavailable; denying fetch.");

				false
			},
		}
	}

	async fn rules_for_host(
		&self,
		client: &reqwest::Client,
		url: &url::Url,
		host: &str,
	) -> CachedRules {
		{
			let entries = self.entries.lock().await;

			if let Some(entry) = entries.get(host)
				&& entry.fetched_at.elapsed() < CACHE_TTL
			{
				return entry.rules.clone();
			}
		}

		let rules = fetch_rules(client, url).await;
		let mut entries = self.entries.lock().await;

		entries.insert(host.to_string(), CacheEntry { rules: rules.clone(), fetched_at: Instant::now() });

		rules
	}
}

impl Default for RobotsCache {
	fn default() -> Self {
		Self::new()
	}
}

async fn fetch_rules(client: &reqwest::Client, url: &url::Url) -> CachedRules {
	let mut robots_url = url.clone();

	robots_url.set_path("/robots.txt");
	robots_url.set_query(None);
	robots_url.set_fragment(None);

	match client.get(robots_url.as_str()).send().await {
		Ok(res) if res.status().is_success() => match res.text().await {
			Ok(content) => CachedRules::Rules(content),
			Err(_) => CachedRules::Unknown,
		},
		// No robots.txt published means no restrictions.
		Ok(res) if res.status().as_u16() == 404 => CachedRules::Rules(String::new()),
		Ok(_) | Err(_) => CachedRules::Unknown,
	}
}
