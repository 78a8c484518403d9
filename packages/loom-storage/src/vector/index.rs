use std::{
	collections::{HashMap, HashSet},
	fs,
	io::Write,
	path::Path,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

pub const INDEX_FILE: &str = "index.bin";
pub const SIDECAR_FILE: &str = "sidecar.json";
pub const META_FILE: &str = "meta.json";

const MAGIC: &[u8; 8] = b"LOOMIDX1";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChunkMeta {
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text_preview: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Sidecar {
	entries: HashMap<String, ChunkMeta>,
	deleted: HashSet<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IndexMeta {
	pub embedder_version: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	pub vector_count: u64,
	pub deleted_count: u64,
}

pub struct NewChunk {
	pub chunk_id: String,
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text_preview: String,
	pub vector: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct SearchHit {
	pub chunk_id: String,
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text_preview: String,
	pub distance: f32,
}

/// Exact flat index over non-normalized embeddings. Vectors are stored
/// row-major; search is a brute-force scan. Deletion marks chunk ids in
/// the sidecar and filters them at query time until a compaction rebuilds
/// the rows.
pub struct FlatIndex {
	dim: usize,
	chunk_ids: Vec<String>,
	vectors: Vec<f32>,
	sidecar: Sidecar,
	meta: IndexMeta,
	dirty: bool,
}
impl FlatIndex {
	pub fn new(dim: usize, embedder_version: &str, now: OffsetDateTime) -> Self {
		Self {
			dim,
			chunk_ids: Vec::new(),
			vectors: Vec::new(),
			sidecar: Sidecar::default(),
			meta: IndexMeta {
				embedder_version: embedder_version.to_string(),
				created_at: now,
				vector_count: 0,
				deleted_count: 0,
			},
			dirty: false,
		}
	}

	/// Loads a user's index from disk, or returns a fresh one when the
	/// directory does not exist yet. Any malformed file or an embedder
	/// version mismatch yields `IndexCorrupt`; the caller rebuilds from
	/// the metadata store.
	pub fn open(
		dir: &Path,
		dim: usize,
		expected_version: &str,
		user_id: Uuid,
		now: OffsetDateTime,
	) -> Result<Self> {
		if !dir.join(META_FILE).exists() {
			return Ok(Self::new(dim, expected_version, now));
		}

		let corrupt = |message: String| Error::IndexCorrupt { user_id, message };
		let meta_raw = fs::read_to_string(dir.join(META_FILE))?;
		let meta: IndexMeta = serde_json::from_str(&meta_raw)
			.map_err(|err| corrupt(format!("meta.json unreadable: {err}")))?;

		if meta.embedder_version != expected_version {
			return Err(corrupt(format!(
				"embedder version {:?} does not match expected {:?}",
				meta.embedder_version, expected_version
			)));
		}

		let sidecar_raw = fs::read_to_string(dir.join(SIDECAR_FILE))?;
		let sidecar: Sidecar = serde_json::from_str(&sidecar_raw)
			.map_err(|err| corrupt(format!("sidecar.json unreadable: {err}")))?;
		let raw = fs::read(dir.join(INDEX_FILE))?;
		let (chunk_ids, vectors) = decode_index(&raw, dim).map_err(corrupt)?;

		for chunk_id in &chunk_ids {
			if !sidecar.entries.contains_key(chunk_id) {
				return Err(corrupt(format!("chunk {chunk_id} has no sidecar entry")));
			}
		}

		Ok(Self { dim, chunk_ids, vectors, sidecar, meta, dirty: false })
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	pub fn total_count(&self) -> u64 {
		self.chunk_ids.len() as u64
	}

	pub fn deleted_count(&self) -> u64 {
		self.sidecar.deleted.len() as u64
	}

	pub fn live_count(&self) -> u64 {
		self.total_count().saturating_sub(self.deleted_count())
	}

	pub fn deleted_ratio(&self) -> f32 {
		if self.chunk_ids.is_empty() {
			return 0.0;
		}

		self.deleted_count() as f32 / self.total_count() as f32
	}

	pub fn meta(&self) -> &IndexMeta {
		&self.meta
	}

	/// Appends chunks. The sidecar entry is written in the same critical
	/// section as the vector row, so a concurrent reader can never see a
	/// chunk without its metadata.
	pub fn add(&mut self, chunks: Vec<NewChunk>, now: OffsetDateTime) -> Result<()> {
		for chunk in &chunks {
			if chunk.vector.len() != self.dim {
				return Err(Error::InvalidArgument(format!(
					"Vector dimension {} does not match index dimension {}.",
					chunk.vector.len(),
					self.dim
				)));
			}
		}

		for chunk in chunks {
			self.sidecar.entries.insert(
				chunk.chunk_id.clone(),
				ChunkMeta {
					document_id: chunk.document_id,
					ordinal: chunk.ordinal,
					text_preview: chunk.text_preview,
					created_at: now,
				},
			);
			self.sidecar.deleted.remove(&chunk.chunk_id);
			self.chunk_ids.push(chunk.chunk_id);
			self.vectors.extend_from_slice(&chunk.vector);
		}

		self.meta.vector_count = self.total_count();
		self.meta.deleted_count = self.deleted_count();
		self.dirty = true;

		Ok(())
	}

	/// Brute-force scan; distances are squared L2, matching the convention
	/// the similarity mapping was calibrated against. Deleted chunks are
	/// filtered before ranking.
	pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		if query.len() != self.dim {
			return Err(Error::InvalidArgument(format!(
				"Query dimension {} does not match index dimension {}.",
				query.len(),
				self.dim
			)));
		}

		let mut scored: Vec<(f32, usize)> = Vec::new();

		for (row, chunk_id) in self.chunk_ids.iter().enumerate() {
			if self.sidecar.deleted.contains(chunk_id) {
				continue;
			}

			let start = row * self.dim;
			let vector = &self.vectors[start..start + self.dim];
			let mut distance = 0.0_f32;

			for (a, b) in query.iter().zip(vector) {
				let diff = a - b;

				distance += diff * diff;
			}

			scored.push((distance, row));
		}

		scored.sort_by(|a, b| a.0.total_cmp(&b.0));
		scored.truncate(k);

		let mut hits = Vec::with_capacity(scored.len());

		for (distance, row) in scored {
			let chunk_id = &self.chunk_ids[row];
			let Some(meta) = self.sidecar.entries.get(chunk_id) else {
				continue;
			};

			hits.push(SearchHit {
				chunk_id: chunk_id.clone(),
				document_id: meta.document_id,
				ordinal: meta.ordinal,
				text_preview: meta.text_preview.clone(),
				distance,
			});
		}

		Ok(hits)
	}

	/// Marks every chunk of the document deleted; returns how many were
	/// affected.
	pub fn remove_by_document(&mut self, document_id: Uuid) -> usize {
		let affected: Vec<String> = self
			.sidecar
			.entries
			.iter()
			.filter(|(_, meta)| meta.document_id == document_id)
			.map(|(chunk_id, _)| chunk_id.clone())
			.collect();
		let mut removed = 0;

		for chunk_id in affected {
			if self.sidecar.deleted.insert(chunk_id) {
				removed += 1;
			}
		}

		if removed > 0 {
			self.meta.deleted_count = self.deleted_count();
			self.dirty = true;
		}

		removed
	}

	/// Rebuilds the row storage from surviving vectors and clears the
	/// deletion debt.
	pub fn compact(&mut self) {
		if self.sidecar.deleted.is_empty() {
			return;
		}

		let mut chunk_ids = Vec::with_capacity(self.chunk_ids.len());
		let mut vectors = Vec::with_capacity(self.vectors.len());

		for (row, chunk_id) in self.chunk_ids.iter().enumerate() {
			if self.sidecar.deleted.contains(chunk_id) {
				continue;
			}

			let start = row * self.dim;

			chunk_ids.push(chunk_id.clone());
			vectors.extend_from_slice(&self.vectors[start..start + self.dim]);
		}

		for chunk_id in self.sidecar.deleted.drain() {
			self.sidecar.entries.remove(&chunk_id);
		}

		self.chunk_ids = chunk_ids;
		self.vectors = vectors;
		self.meta.vector_count = self.total_count();
		self.meta.deleted_count = 0;
		self.dirty = true;
	}

	/// Writes index, sidecar, and meta via temp-file-and-rename within the
	/// index directory, fsyncing each file before the swap.
	pub fn persist(&mut self, dir: &Path) -> Result<()> {
		fs::create_dir_all(dir)?;

		write_atomic(&dir.join(INDEX_FILE), &encode_index(&self.chunk_ids, &self.vectors, self.dim))?;
		write_atomic(&dir.join(SIDECAR_FILE), serde_json::to_vec_pretty(&self.sidecar)?.as_slice())?;
		write_atomic(&dir.join(META_FILE), serde_json::to_vec_pretty(&self.meta)?.as_slice())?;

		self.dirty = false;

		Ok(())
	}

	/// Drops every row and all sidecar state, keeping the embedder version
	/// stamp fresh. Used when rebuilding from the metadata store.
	pub fn clear(&mut self, embedder_version: &str, now: OffsetDateTime) {
		self.chunk_ids.clear();
		self.vectors.clear();
		self.sidecar = Sidecar::default();
		self.meta = IndexMeta {
			embedder_version: embedder_version.to_string(),
			created_at: now,
			vector_count: 0,
			deleted_count: 0,
		};
		self.dirty = true;
	}
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
	let tmp = path.with_extension("tmp");
	let mut file = fs::File::create(&tmp)?;

	file.write_all(bytes)?;
	file.sync_all()?;

	fs::rename(&tmp, path)?;

	Ok(())
}

fn encode_index(chunk_ids: &[String], vectors: &[f32], dim: usize) -> Vec<u8> {
	let mut out = Vec::with_capacity(16 + vectors.len() * 4);

	out.extend_from_slice(MAGIC);
	out.extend_from_slice(&(dim as u32).to_le_bytes());
	out.extend_from_slice(&(chunk_ids.len() as u64).to_le_bytes());

	for (row, chunk_id) in chunk_ids.iter().enumerate() {
		let id_bytes = chunk_id.as_bytes();

		out.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
		out.extend_from_slice(id_bytes);

		let start = row * dim;

		for value in &vectors[start..start + dim] {
			out.extend_from_slice(&value.to_le_bytes());
		}
	}

	out
}

fn decode_index(raw: &[u8], dim: usize) -> std::result::Result<(Vec<String>, Vec<f32>), String> {
	let mut cursor = 0_usize;

	if take(raw, &mut cursor, MAGIC.len())? != MAGIC {
		return Err("bad magic".to_string());
	}

	let file_dim = read_u32(raw, &mut cursor)? as usize;

	if file_dim != dim {
		return Err(format!("dimension {file_dim} does not match configured {dim}"));
	}

	let count = read_u64(raw, &mut cursor)? as usize;
	let mut chunk_ids = Vec::with_capacity(count);
	let mut vectors = Vec::with_capacity(count * dim);

	for _ in 0..count {
		let id_len = read_u32(raw, &mut cursor)? as usize;
		let id = std::str::from_utf8(take(raw, &mut cursor, id_len)?)
			.map_err(|_| "chunk id is not utf-8".to_string())?
			.to_string();

		chunk_ids.push(id);

		let floats = take(raw, &mut cursor, dim * 4)?;

		for bytes in floats.chunks_exact(4) {
			vectors.push(f32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])));
		}
	}

	if cursor != raw.len() {
		return Err("trailing bytes in index.bin".to_string());
	}

	Ok((chunk_ids, vectors))
}

fn take<'a>(
	raw: &'a [u8],
	cursor: &mut usize,
	len: usize,
) -> std::result::Result<&'a [u8], String> {
	let end = cursor.checked_add(len).ok_or_else(|| "length overflow".to_string())?;

	if end > raw.len() {
		return Err("index.bin truncated".to_string());
	}

	let slice = &raw[*cursor..end];

	*cursor = end;

	Ok(slice)
}

fn read_u32(raw: &[u8], cursor: &mut usize) -> std::result::Result<u32, String> {
	let bytes = take(raw, cursor, 4)?;

	Ok(u32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])))
}

fn read_u64(raw: &[u8], cursor: &mut usize) -> std::result::Result<u64, String> {
	let bytes = take(raw, cursor, 8)?;

	Ok(u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8])))
}
