use std::{
	num::NonZeroU32,
	time::{Duration, Instant},
};

use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;
use url::Url;

use crate::{Error, Result, robots::RobotsCache};

const MAX_NETWORK_RETRIES: u32 = 3;
const RETRY_BASE_BACKOFF_MS: u64 = 500;
const PROXY_CIRCUIT_FAILURES: u32 = 3;
const PROXY_CIRCUIT_OPEN: Duration = Duration::from_secs(60);

type HostLimiter = governor::DefaultKeyedRateLimiter<String>;

pub struct FetchedPage {
	pub final_url: String,
	pub status: u16,
	pub body: String,
}

struct ProxyState {
	url: String,
	client: reqwest::Client,
	consecutive_failures: u32,
	circuit_open_until: Option<Instant>,
}

struct ProxyRing {
	states: Vec<ProxyState>,
	cursor: usize,
}

/// HTTP GET with per-host token buckets, a robots.txt cache, bounded
/// retries, and optional proxy rotation with failure-based ejection.
pub struct Fetcher {
	cfg: loom_config::Fetcher,
	direct: reqwest::Client,
	robots: RobotsCache,
	limiter: HostLimiter,
	proxies: Mutex<ProxyRing>,
}
impl Fetcher {
	pub fn new(cfg: &loom_config::Fetcher) -> Result<Self> {
		let direct = build_client(cfg, None)?;
		let mut states = Vec::with_capacity(cfg.proxies.len());

		for proxy_url in &cfg.proxies {
			states.push(ProxyState {
				url: proxy_url.clone(),
				client: build_client(cfg, Some(proxy_url))?,
				consecutive_failures: 0,
				circuit_open_until: None,
			});
		}

		let rps = NonZeroU32::new(cfg.per_host_rps.max(1)).unwrap_or(NonZeroU32::MIN);

		Ok(Self {
			cfg: cfg.clone(),
			direct,
			robots: RobotsCache::new(),
			limiter: RateLimiter::keyed(Quota::per_second(rps)),
			proxies: Mutex::new(ProxyRing { states, cursor: 0 }),
		})
	}

	pub fn user_agent(&self) -> &str {
		&self.cfg.user_agent
	}

	/// Rate-limited GET without a robots.txt check; used for feed URLs
	/// the user explicitly subscribed to.
	pub async fn get(&self, raw_url: &str) -> Result<FetchedPage> {
		let url = parse_url(raw_url)?;

		self.throttle(&url).await;
		self.get_with_retries(&url).await
	}

	/// Rate-limited GET that consults robots.txt first.
	pub async fn get_checked(&self, raw_url: &str) -> Result<FetchedPage> {
		let url = parse_url(raw_url)?;

		if !self.robots.can_fetch(&self.direct, &url, &self.cfg.user_agent).await {
			return Err(Error::RobotsDenied { url: url.to_string() });
		}

		self.throttle(&url).await;
		self.get_with_retries(&url).await
	}

	pub async fn can_fetch(&self, raw_url: &str) -> Result<bool> {
		let url = parse_url(raw_url)?;

		Ok(self.robots.can_fetch(&self.direct, &url, &self.cfg.user_agent).await)
	}

	async fn throttle(&self, url: &Url) {
		let host = url.host_str().unwrap_or_default().to_string();

		self.limiter.until_key_ready(&host).await;
	}

	/// Network errors retry up to three times with exponential backoff;
	/// 4xx never retries; 5xx retries once.
	async fn get_with_retries(&self, url: &Url) -> Result<FetchedPage> {
		let mut network_attempts = 0_u32;
		let mut server_retried = false;

		loop {
			let (proxy_index, client) = self.select_client().await;
			let result = client.get(url.as_str()).send().await;

			match result {
				Ok(res) => {
					self.report_proxy(proxy_index, true).await;

					let status = res.status();

					if status.is_success() {
						let final_url = res.url().to_string();
						let body = res.text().await?;

						return Ok(FetchedPage { final_url, status: status.as_u16(), body });
					}
					if status.is_server_error() && !server_retried {
						server_retried = true;

						tracing::debug!(url = %url, status = %status, "Retrying after server error.");
						tokio::time::sleep(Duration::from_millis(RETRY_BASE_BACKOFF_MS)).await;

						continue;
					}

					return Err(Error::Status { status: status.as_u16(), url: url.to_string() });
				},
				Err(err) => {
					self.report_proxy(proxy_index, false).await;

					network_attempts += 1;

					if network_attempts >= MAX_NETWORK_RETRIES {
						return Err(Error::Http(err));
					}

					let backoff = RETRY_BASE_BACKOFF_MS << (network_attempts - 1);

					tracing::debug!(url = %url, attempt = network_attempts, "Retrying after network error.");
					tokio::time::sleep(Duration::from_millis(backoff)).await;
				},
			}
		}
	}

	/// Round-robin over proxies whose circuit is closed, falling back to
	/// the direct client when none qualify.
	async fn select_client(&self) -> (Option<usize>, reqwest::Client) {
		let mut ring = self.proxies.lock().await;

		if ring.states.is_empty() {
			return (None, self.direct.clone());
		}

		let now = Instant::now();
		let len = ring.states.len();

		for step in 0..len {
			let index = (ring.cursor + step) % len;
			let state = &mut ring.states[index];

			if let Some(open_until) = state.circuit_open_until {
				if now < open_until {
					continue;
				}

				state.circuit_open_until = None;
				state.consecutive_failures = 0;
			}

			ring.cursor = (index + 1) % len;

			return (Some(index), ring.states[index].client.clone());
		}

		(None, self.direct.clone())
	}

	async fn report_proxy(&self, index: Option<usize>, success: bool) {
		let Some(index) = index else {
			return;
		};
		let mut ring = self.proxies.lock().await;
		let Some(state) = ring.states.get_mut(index) else {
			return;
		};

		if success {
			state.consecutive_failures = 0;

			return;
		}

		state.consecutive_failures += 1;

		if state.consecutive_failures >= PROXY_CIRCUIT_FAILURES {
			state.circuit_open_until = Some(Instant::now() + PROXY_CIRCUIT_OPEN);

			tracing::warn!(proxy = %state.url, "Proxy circuit opened after repeated failures.");
		}
	}
}

fn parse_url(raw: &str) -> Result<Url> {
	let url = Url::parse(raw).map_err(|_| Error::InvalidUrl(raw.to_string()))?;

	if !matches!(url.scheme(), "http" | "https") {
		return Err(Error::InvalidUrl(raw.to_string()));
	}

	Ok(url)
}

fn build_client(cfg: &loom_config::Fetcher, proxy: Option<&str>) -> Result<reqwest::Client> {
	let mut builder = reqwest::Client::builder()
		.timeout(Duration::from_secs(cfg.timeout_s))
		.user_agent(cfg.user_agent.clone());

	if let Some(proxy_url) = proxy {
		builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
	}

	Ok(builder.build()?)
}
