use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use time::{
	Date, OffsetDateTime, PrimitiveDateTime, Time, format_description::well_known::Rfc3339, macros::format_description,
};

use crate::{Error, Result};

/// One parsed upload row: the draft on success, a reason on failure.
/// Rows are numbered from 1, excluding the header.
#[derive(Clone, Debug)]
pub struct RowOutcome {
	pub row: usize,
	pub result: std::result::Result<ArticleDraft, String>,
}

#[derive(Clone, Debug)]
pub struct ArticleDraft {
	pub title: String,
	pub content: String,
	pub author: Option<String>,
	pub published_at: Option<OffsetDateTime>,
	pub category: Option<String>,
	pub source_url: Option<String>,
	pub tags: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadFormat {
	Csv,
	Xlsx,
}
impl UploadFormat {
	pub fn from_filename(name: &str) -> Option<Self> {
		let lower = name.to_lowercase();

		if lower.ends_with(".csv") {
			Some(Self::Csv)
		} else if lower.ends_with(".xlsx") {
			Some(Self::Xlsx)
		} else {
			None
		}
	}
}

pub fn parse_upload(format: UploadFormat, bytes: &[u8]) -> Result<Vec<RowOutcome>> {
	match format {
		UploadFormat::Csv => parse_csv(bytes),
		UploadFormat::Xlsx => parse_xlsx(bytes),
	}
}

pub fn parse_csv(bytes: &[u8]) -> Result<Vec<RowOutcome>> {
	let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
	let headers: Vec<String> =
		reader.headers()?.iter().map(|header| header.trim().to_lowercase()).collect();
	let columns = Columns::resolve(&headers)?;
	let mut out = Vec::new();

	for (index, record) in reader.records().enumerate() {
		let row = index + 1;

		match record {
			Ok(record) => {
				let cells: Vec<String> =
					record.iter().map(|cell| cell.trim().to_string()).collect();

				out.push(RowOutcome { row, result: columns.build_draft(&cells) });
			},
			Err(err) => {
				out.push(RowOutcome { row, result: Err(format!("unreadable row: {err}")) });
			},
		}
	}

	Ok(out)
}

pub fn parse_xlsx(bytes: &[u8]) -> Result<Vec<RowOutcome>> {
	let mut workbook: Xlsx<_> =
		Xlsx::new(Cursor::new(bytes.to_vec())).map_err(|err| Error::Xlsx(err.to_string()))?;
	let range = workbook
		.worksheet_range_at(0)
		.ok_or_else(|| Error::Xlsx("Workbook has no sheets.".to_string()))?
		.map_err(|err| Error::Xlsx(err.to_string()))?;
	let mut rows = range.rows();
	let headers: Vec<String> = rows
		.next()
		.ok_or_else(|| Error::Xlsx("Workbook sheet is empty.".to_string()))?
		.iter()
		.map(|cell| cell_text(cell).to_lowercase())
		.collect();
	let columns = Columns::resolve(&headers)?;
	let mut out = Vec::new();

	for (index, row_cells) in rows.enumerate() {
		let row = index + 1;
		let cells: Vec<String> = row_cells.iter().map(cell_text).collect();

		out.push(RowOutcome { row, result: columns.build_draft(&cells) });
	}

	Ok(out)
}

fn cell_text(cell: &Data) -> String {
	match cell {
		Data::Empty => String::new(),
		Data::String(text) => text.trim().to_string(),
		other => other.to_string().trim().to_string(),
	}
}

/// Header positions for the recognized columns; unknown columns are
/// ignored.
struct Columns {
	title: usize,
	content: usize,
	author: Option<usize>,
	published_date: Option<usize>,
	category: Option<usize>,
	source_url: Option<usize>,
	tags: Option<usize>,
}
impl Columns {
	fn resolve(headers: &[String]) -> Result<Self> {
		let find = |name: &str| headers.iter().position(|header| header == name);
		let title = find("title")
			.ok_or_else(|| Error::InvalidInput("Missing required column: title.".to_string()))?;
		let content = find("content")
			.ok_or_else(|| Error::InvalidInput("Missing required column: content.".to_string()))?;

		Ok(Self {
			title,
			content,
			author: find("author"),
			published_date: find("published_date"),
			category: find("category"),
			source_url: find("source_url"),
			tags: find("tags"),
		})
	}

	fn build_draft(&self, cells: &[String]) -> std::result::Result<ArticleDraft, String> {
		let cell = |index: usize| cells.get(index).map(|value| value.as_str()).unwrap_or("");
		let optional = |index: Option<usize>| {
			index.map(cell).filter(|value| !value.is_empty()).map(|value| value.to_string())
		};
		let title = cell(self.title).to_string();
		let content = cell(self.content).to_string();

		if title.is_empty() {
			return Err("missing title".to_string());
		}
		if content.is_empty() {
			return Err("missing content".to_string());
		}

		let tags = optional(self.tags)
			.map(|raw| {
				raw.split(',')
					.map(|tag| tag.trim().to_lowercase())
					.filter(|tag| !tag.is_empty())
					.collect()
			})
			.unwrap_or_default();

		Ok(ArticleDraft {
			title,
			content,
			author: optional(self.author),
			published_at: optional(self.published_date).and_then(|raw| parse_date(&raw)),
			category: optional(self.category),
			source_url: optional(self.source_url),
			tags,
		})
	}
}

/// ISO-8601 plus the two common locale-free day formats; anything else
/// is treated as absent rather than failing the row.
pub fn parse_date(raw: &str) -> Option<OffsetDateTime> {
	if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
		return Some(parsed);
	}
	if let Ok(parsed) =
		PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
	{
		return Some(parsed.assume_utc());
	}

	let date = Date::parse(raw, format_description!("[year]-[month]-[day]"))
		.or_else(|_| Date::parse(raw, format_description!("[year]/[month]/[day]")))
		.ok()?;

	Some(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn csv_rows_parse_with_optional_columns() {
		let csv = "\
title,content,tags,published_date,ignored
First,Body one,\"tech, ai\",2025-06-02,zzz
Second,Body two,,2025/06/03,zzz
";
		let rows = parse_csv(csv.as_bytes()).expect("parse");

		assert_eq!(rows.len(), 2);

		let first = rows[0].result.as_ref().expect("row 1");

		assert_eq!(first.title, "First");
		assert_eq!(first.tags, vec!["tech".to_string(), "ai".to_string()]);
		assert!(first.published_at.is_some());

		let second = rows[1].result.as_ref().expect("row 2");

		assert!(second.tags.is_empty());
		assert!(second.published_at.is_some());
	}

	#[test]
	fn rows_missing_required_fields_fail_individually() {
		let csv = "\
title,content
Good,Body text
,Body without title
Third,
Last,Fine
";
		let rows = parse_csv(csv.as_bytes()).expect("parse");

		assert_eq!(rows.len(), 4);
		assert!(rows[0].result.is_ok());
		assert_eq!(rows[1].result.as_ref().unwrap_err(), "missing title");
		assert_eq!(rows[2].result.as_ref().unwrap_err(), "missing content");
		assert!(rows[3].result.is_ok());
	}

	#[test]
	fn missing_required_column_fails_the_file() {
		let csv = "title,body\nA,B\n";

		assert!(matches!(parse_csv(csv.as_bytes()), Err(Error::InvalidInput(_))));
	}

	#[test]
	fn dates_parse_iso_and_slash_formats() {
		assert!(parse_date("2025-06-02T10:30:00Z").is_some());
		assert!(parse_date("2025-06-02 10:30:00").is_some());
		assert!(parse_date("2025-06-02").is_some());
		assert!(parse_date("2025/06/02").is_some());
		assert!(parse_date("June 2nd").is_none());
	}
}
