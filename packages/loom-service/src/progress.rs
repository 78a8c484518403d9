use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Error, Result};

/// Events emitted by the retrieval pipeline, in order, ending with
/// exactly one terminal (`completed` or `error`).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
	Started {
		query: String,
		request_id: Uuid,
	},
	Progress {
		stage: SearchStage,
		percentage: u8,
		message: String,
	},
	ResultPartial {
		index: usize,
		document_id: Uuid,
		title: String,
		similarity: f32,
		tags: Vec<String>,
	},
	SummaryToken {
		result_index: usize,
		token: String,
		done: bool,
	},
	SummaryEnd {
		result_index: usize,
	},
	ExternalUnavailable {
		reason: String,
	},
	Completed {
		results_count: usize,
		external_results_count: usize,
		elapsed_ms: i64,
	},
	Error {
		code: String,
		message: String,
	},
}
impl SearchEvent {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed { .. } | Self::Error { .. })
	}
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
	Embedding,
	Searching,
	Reranking,
	Calibrating,
	External,
	Summarizing,
}

/// Events emitted by the structured upload stream.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
	Started { request_id: Uuid, rows: usize },
	Progress { stage: &'static str, percentage: u8, message: String },
	RowOk { row: usize },
	RowError { row: usize, reason: String },
	Completed { inserted: usize, failed: usize },
	Error { code: String, message: String },
}
impl UploadEvent {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed { .. } | Self::Error { .. })
	}
}

/// Server-sent-event encoding: one JSON object on a `data:` line,
/// terminated by a blank line.
pub fn sse_encode<T: Serialize>(event: &T) -> String {
	let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());

	format!("data: {payload}\n\n")
}

/// Fans pipeline events out to an optional SSE channel. The blocking
/// search endpoint runs the same pipeline with a closed sink. A send
/// failure means the client went away; the pipeline surfaces that as
/// cancellation so provider calls stop promptly.
#[derive(Clone)]
pub struct EventSink<T> {
	sender: Option<mpsc::Sender<T>>,
}
impl<T> EventSink<T> {
	pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>) {
		let (sender, receiver) = mpsc::channel(capacity);

		(Self { sender: Some(sender) }, receiver)
	}

	pub fn discard() -> Self {
		Self { sender: None }
	}

	pub async fn emit(&self, event: T) -> Result<()> {
		let Some(sender) = &self.sender else {
			return Ok(());
		};

		sender.send(event).await.map_err(|_| Error::Canceled)
	}
}
