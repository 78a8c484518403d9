use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle of a document's chunks inside the owner's vector index.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexedState {
	Pending,
	Indexed,
	Failed,
	Evicting,
}
impl IndexedState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Indexed => "indexed",
			Self::Failed => "failed",
			Self::Evicting => "evicting",
		}
	}

	pub fn parse(value: &str) -> Result<Self> {
		match value {
			"pending" => Ok(Self::Pending),
			"indexed" => Ok(Self::Indexed),
			"failed" => Ok(Self::Failed),
			"evicting" => Ok(Self::Evicting),
			other => Err(Error::UnknownState(other.to_string())),
		}
	}

	/// `pending -> indexed | failed`, `indexed -> evicting`,
	/// `failed -> pending` on retry. Row removal happens outside the
	/// state machine once eviction finishes.
	pub fn transition(self, to: Self) -> Result<Self> {
		let allowed = matches!(
			(self, to),
			(Self::Pending, Self::Indexed)
				| (Self::Pending, Self::Failed)
				| (Self::Indexed, Self::Evicting)
				| (Self::Failed, Self::Pending)
		);

		if allowed {
			Ok(to)
		} else {
			Err(Error::InvalidTransition { from: self.as_str(), to: to.as_str() })
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	Rss,
	Web,
}
impl SourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Rss => "rss",
			Self::Web => "web",
		}
	}

	pub fn parse(value: &str) -> Result<Self> {
		match value {
			"rss" => Ok(Self::Rss),
			"web" => Ok(Self::Web),
			other => Err(Error::UnknownState(other.to_string())),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
	Rss,
	Web,
	Upload,
	Manual,
}
impl SourceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Rss => "rss",
			Self::Web => "web",
			Self::Upload => "upload",
			Self::Manual => "manual",
		}
	}

	pub fn parse(value: &str) -> Result<Self> {
		match value {
			"rss" => Ok(Self::Rss),
			"web" => Ok(Self::Web),
			"upload" => Ok(Self::Upload),
			"manual" => Ok(Self::Manual),
			other => Err(Error::UnknownState(other.to_string())),
		}
	}
}

/// Poll backoff for a failing source. Healthy sources fire every
/// `cadence_seconds`; after three consecutive failures the interval
/// doubles per failure, capped at sixteen cadences.
pub fn poll_interval_seconds(cadence_seconds: u64, consecutive_failures: u32) -> u64 {
	if consecutive_failures < 3 {
		return cadence_seconds;
	}

	let exponent = (consecutive_failures - 2).min(4);

	cadence_seconds.saturating_mul(1 << exponent).min(cadence_seconds.saturating_mul(16))
}
