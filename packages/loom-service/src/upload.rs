use uuid::Uuid;

use loom_acquire::import::{self, ArticleDraft, UploadFormat};
use loom_domain::states::SourceType;

use crate::{
	Error, LoomService, Result,
	ingest::{IngestInput, IngestOutcome},
	progress::{EventSink, UploadEvent},
};

const PROGRESS_EVERY_ROWS: usize = 25;

#[derive(Debug, serde::Serialize)]
pub struct UploadSummary {
	pub inserted: usize,
	pub failed: usize,
}

impl LoomService {
	/// Streams a CSV/XLSX import: one `row_ok`/`row_error` per row, a
	/// progress event every few rows, and a single terminal event. A bad
	/// row never aborts the file; a malformed file does.
	pub async fn upload_documents(
		&self,
		user_id: Uuid,
		filename: &str,
		bytes: &[u8],
		sink: &EventSink<UploadEvent>,
	) -> Result<UploadSummary> {
		let outcome = self.run_upload(user_id, filename, bytes, sink).await;

		match outcome {
			Ok(summary) => Ok(summary),
			Err(Error::Canceled) => Err(Error::Canceled),
			Err(err) => {
				let _ = sink
					.emit(UploadEvent::Error {
						code: err.code().to_string(),
						message: err.to_string(),
					})
					.await;

				Err(err)
			},
		}
	}

	async fn run_upload(
		&self,
		user_id: Uuid,
		filename: &str,
		bytes: &[u8],
		sink: &EventSink<UploadEvent>,
	) -> Result<UploadSummary> {
		if bytes.len() > self.cfg.upload.max_bytes {
			return Err(Error::validation("Upload exceeds the size limit."));
		}

		let format = UploadFormat::from_filename(filename)
			.ok_or_else(|| Error::validation("Upload must be a .csv or .xlsx file."))?;
		let rows = import::parse_upload(format, bytes)?;
		let total = rows.len();

		sink.emit(UploadEvent::Started { request_id: Uuid::new_v4(), rows: total }).await?;

		let mut summary = UploadSummary { inserted: 0, failed: 0 };

		for (processed, row) in rows.into_iter().enumerate() {
			match row.result {
				Ok(draft) => match self.ingest_draft(user_id, draft).await {
					Ok(IngestOutcome::Created(_)) => {
						summary.inserted += 1;

						sink.emit(UploadEvent::RowOk { row: row.row }).await?;
					},
					Ok(IngestOutcome::AlreadyPresent) => {
						summary.failed += 1;

						sink.emit(UploadEvent::RowError {
							row: row.row,
							reason: "duplicate document".to_string(),
						})
						.await?;
					},
					Err(Error::Canceled) => return Err(Error::Canceled),
					Err(err) => {
						summary.failed += 1;

						sink.emit(UploadEvent::RowError { row: row.row, reason: err.to_string() })
							.await?;
					},
				},
				Err(reason) => {
					summary.failed += 1;

					sink.emit(UploadEvent::RowError { row: row.row, reason }).await?;
				},
			}

			if (processed + 1) % PROGRESS_EVERY_ROWS == 0 {
				let percentage = (((processed + 1) * 100) / total.max(1)).min(99) as u8;

				sink.emit(UploadEvent::Progress {
					stage: "importing",
					percentage,
					message: format!("Imported {} of {total} rows.", processed + 1),
				})
				.await?;
			}
		}

		sink.emit(UploadEvent::Completed { inserted: summary.inserted, failed: summary.failed })
			.await?;

		Ok(summary)
	}

	async fn ingest_draft(&self, user_id: Uuid, draft: ArticleDraft) -> Result<IngestOutcome> {
		let mut draft_tags = draft.tags;

		if let Some(category) = draft.category {
			let category = category.to_lowercase();

			if !draft_tags.contains(&category) {
				draft_tags.push(category);
			}
		}

		self.ingest_article(IngestInput {
			user_id,
			title: draft.title,
			content: draft.content,
			summary: None,
			author: draft.author,
			source_url: draft.source_url,
			source_type: SourceType::Upload,
			published_at: draft.published_at,
			tags: draft_tags,
		})
		.await
	}
}
