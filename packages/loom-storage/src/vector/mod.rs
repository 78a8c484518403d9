pub mod index;

use std::{
	collections::{HashMap, VecDeque},
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{Result, vector::index::{FlatIndex, NewChunk, SearchHit}};

pub const MAX_SEARCH_K: usize = 256;

/// Owns one flat index per user. An LRU of loaded indices bounds memory;
/// each slot carries its own reader-writer lock so one user's writes
/// never block another user's reads. Lock order is always slots mutex
/// first, then the per-user lock.
pub struct VectorStoreManager {
	root: PathBuf,
	dim: usize,
	embedder_version: String,
	compact_threshold_ratio: f32,
	compact_threshold_count: u64,
	lru_capacity: usize,
	slots: Mutex<Slots>,
}

struct Slots {
	map: HashMap<Uuid, Arc<RwLock<FlatIndex>>>,
	order: VecDeque<Uuid>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
	pub user_id: Uuid,
	pub exists: bool,
	pub vector_count: u64,
	pub deleted_count: u64,
	pub disk_bytes: u64,
}

impl VectorStoreManager {
	pub fn new(cfg: &loom_config::VectorStore, dim: usize, embedder_version: &str) -> Self {
		Self {
			root: PathBuf::from(&cfg.root),
			dim,
			embedder_version: embedder_version.to_string(),
			compact_threshold_ratio: cfg.compact_threshold_ratio,
			compact_threshold_count: cfg.compact_threshold_count,
			lru_capacity: cfg.lru_capacity.max(1),
			slots: Mutex::new(Slots { map: HashMap::new(), order: VecDeque::new() }),
		}
	}

	pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
		self.root.join(format!("user_{user_id}"))
	}

	/// Idempotent cached load. Evicts the least-recently-used slot first
	/// when the cache is full, persisting it if dirty.
	async fn slot(&self, user_id: Uuid) -> Result<Arc<RwLock<FlatIndex>>> {
		let mut slots = self.slots.lock().await;

		if let Some(existing) = slots.map.get(&user_id) {
			let existing = existing.clone();

			slots.order.retain(|id| *id != user_id);
			slots.order.push_back(user_id);

			return Ok(existing);
		}

		while slots.map.len() >= self.lru_capacity {
			let Some(evict_id) = slots.order.pop_front() else {
				break;
			};
			let Some(evicted) = slots.map.remove(&evict_id) else {
				continue;
			};
			let mut index = evicted.write().await;

			if index.is_dirty()
				&& let Err(err) = index.persist(&self.user_dir(evict_id))
			{
				tracing::error!(user_id = %evict_id, error = %err, "Failed to persist evicted index.");
			}
		}

		let index = FlatIndex::open(
			&self.user_dir(user_id),
			self.dim,
			&self.embedder_version,
			user_id,
			OffsetDateTime::now_utc(),
		)?;
		let slot = Arc::new(RwLock::new(index));

		slots.map.insert(user_id, slot.clone());
		slots.order.push_back(user_id);

		Ok(slot)
	}

	pub async fn add(&self, user_id: Uuid, chunks: Vec<NewChunk>) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}

		let slot = self.slot(user_id).await?;
		let mut index = slot.write().await;

		index.add(chunks, OffsetDateTime::now_utc())?;
		index.persist(&self.user_dir(user_id))?;

		Ok(())
	}

	pub async fn search(&self, user_id: Uuid, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		let k = k.min(MAX_SEARCH_K);
		let slot = self.slot(user_id).await?;
		let index = slot.read().await;

		index.search(query, k)
	}

	/// Soft-deletes the document's chunks; compacts in place once the
	/// eviction debt passes either threshold.
	pub async fn remove_by_document(&self, user_id: Uuid, document_id: Uuid) -> Result<usize> {
		let slot = self.slot(user_id).await?;
		let mut index = slot.write().await;
		let removed = index.remove_by_document(document_id);

		if removed > 0 {
			if index.deleted_ratio() > self.compact_threshold_ratio
				|| index.deleted_count() > self.compact_threshold_count
			{
				tracing::info!(user_id = %user_id, "Eviction debt exceeded threshold; compacting.");

				index.compact();
			}

			index.persist(&self.user_dir(user_id))?;
		}

		Ok(removed)
	}

	pub async fn compact(&self, user_id: Uuid) -> Result<()> {
		let slot = self.slot(user_id).await?;
		let mut index = slot.write().await;

		index.compact();
		index.persist(&self.user_dir(user_id))?;

		Ok(())
	}

	pub async fn persist(&self, user_id: Uuid) -> Result<()> {
		let slot = self.slot(user_id).await?;
		let mut index = slot.write().await;

		if index.is_dirty() {
			index.persist(&self.user_dir(user_id))?;
		}

		Ok(())
	}

	/// Replaces the user's index with a fresh empty one stamped with the
	/// current embedder version. The rebuild path re-adds chunks afterward.
	pub async fn reset(&self, user_id: Uuid) -> Result<()> {
		let mut slots = self.slots.lock().await;

		slots.map.remove(&user_id);
		slots.order.retain(|id| *id != user_id);

		drop(slots);

		let dir = self.user_dir(user_id);

		if dir.exists() {
			fs::remove_dir_all(&dir)?;
		}

		let mut index = FlatIndex::new(self.dim, &self.embedder_version, OffsetDateTime::now_utc());

		index.persist(&dir)?;

		Ok(())
	}

	pub async fn stats(&self, user_id: Uuid) -> Result<StoreStats> {
		let dir = self.user_dir(user_id);

		if !dir.exists() {
			return Ok(StoreStats {
				user_id,
				exists: false,
				vector_count: 0,
				deleted_count: 0,
				disk_bytes: 0,
			});
		}

		let slot = self.slot(user_id).await?;
		let index = slot.read().await;

		Ok(StoreStats {
			user_id,
			exists: true,
			vector_count: index.live_count(),
			deleted_count: index.deleted_count(),
			disk_bytes: dir_size(&dir),
		})
	}

	/// Users with on-disk indices, discovered from the store root.
	pub fn list_user_ids(&self) -> Vec<Uuid> {
		let Ok(entries) = fs::read_dir(&self.root) else {
			return Vec::new();
		};
		let mut out = Vec::new();

		for entry in entries.flatten() {
			let name = entry.file_name();
			let Some(name) = name.to_str() else {
				continue;
			};
			let Some(raw_id) = name.strip_prefix("user_") else {
				continue;
			};

			if let Ok(user_id) = Uuid::parse_str(raw_id) {
				out.push(user_id);
			}
		}

		out
	}

	pub async fn global_stats(&self) -> Result<Vec<StoreStats>> {
		let mut out = Vec::new();

		for user_id in self.list_user_ids() {
			out.push(self.stats(user_id).await?);
		}

		Ok(out)
	}

	/// Whether the user's on-disk index carries enough eviction debt for
	/// the weekly maintenance pass to bother compacting it.
	pub async fn has_compaction_debt(&self, user_id: Uuid) -> Result<bool> {
		let slot = self.slot(user_id).await?;
		let index = slot.read().await;

		Ok(index.deleted_count() > 0)
	}
}

fn dir_size(dir: &Path) -> u64 {
	let Ok(entries) = fs::read_dir(dir) else {
		return 0;
	};

	entries
		.flatten()
		.filter_map(|entry| entry.metadata().ok())
		.filter(|metadata| metadata.is_file())
		.map(|metadata| metadata.len())
		.sum()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn manager(root: &Path, lru_capacity: usize) -> VectorStoreManager {
		let cfg = loom_config::VectorStore {
			root: root.to_string_lossy().to_string(),
			compact_threshold_ratio: 0.2,
			compact_threshold_count: 1_000,
			lru_capacity,
		};

		VectorStoreManager::new(&cfg, 3, "v1")
	}

	fn chunk(id: &str, doc: Uuid, vector: Vec<f32>) -> NewChunk {
		NewChunk {
			chunk_id: id.to_string(),
			document_id: doc,
			ordinal: 0,
			text_preview: id.to_string(),
			vector,
		}
	}

	#[tokio::test]
	async fn indices_are_isolated_per_user() {
		let dir = tempfile::tempdir().unwrap();
		let manager = manager(dir.path(), 8);
		let user_a = Uuid::new_v4();
		let user_b = Uuid::new_v4();
		let doc_a = Uuid::new_v4();

		manager.add(user_a, vec![chunk("a", doc_a, vec![1.0, 0.0, 0.0])]).await.unwrap();

		let hits_a = manager.search(user_a, &[1.0, 0.0, 0.0], 5).await.unwrap();
		let hits_b = manager.search(user_b, &[1.0, 0.0, 0.0], 5).await.unwrap();

		assert_eq!(hits_a.len(), 1);
		assert!(hits_b.is_empty());
	}

	#[tokio::test]
	async fn lru_eviction_persists_dirty_indices() {
		let dir = tempfile::tempdir().unwrap();
		let manager = manager(dir.path(), 1);
		let user_a = Uuid::new_v4();
		let user_b = Uuid::new_v4();
		let doc = Uuid::new_v4();

		manager.add(user_a, vec![chunk("a", doc, vec![0.0, 1.0, 0.0])]).await.unwrap();
		// Loading a second user evicts the first slot.
		manager.add(user_b, vec![chunk("b", doc, vec![0.0, 0.0, 1.0])]).await.unwrap();

		let hits = manager.search(user_a, &[0.0, 1.0, 0.0], 1).await.unwrap();

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].chunk_id, "a");
	}

	#[tokio::test]
	async fn removal_and_reload_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let user = Uuid::new_v4();
		let doc_a = Uuid::new_v4();
		let doc_b = Uuid::new_v4();

		{
			let manager = manager(dir.path(), 4);

			manager
				.add(user, vec![
					chunk("a", doc_a, vec![1.0, 0.0, 0.0]),
					chunk("b", doc_b, vec![0.0, 1.0, 0.0]),
				])
				.await
				.unwrap();

			assert_eq!(manager.remove_by_document(user, doc_a).await.unwrap(), 1);
		}

		let manager = manager(dir.path(), 4);
		let hits = manager.search(user, &[1.0, 0.0, 0.0], 5).await.unwrap();

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].document_id, doc_b);
	}

	#[tokio::test]
	async fn heavy_deletion_triggers_compaction() {
		let dir = tempfile::tempdir().unwrap();
		let manager = manager(dir.path(), 4);
		let user = Uuid::new_v4();
		let doomed = Uuid::new_v4();
		let kept = Uuid::new_v4();
		let mut chunks = Vec::new();

		for i in 0..9 {
			chunks.push(NewChunk {
				chunk_id: format!("d{i}"),
				document_id: doomed,
				ordinal: i,
				text_preview: String::new(),
				vector: vec![i as f32, 0.0, 0.0],
			});
		}

		chunks.push(chunk("kept", kept, vec![0.0, 0.0, 1.0]));
		manager.add(user, chunks).await.unwrap();
		manager.remove_by_document(user, doomed).await.unwrap();

		// 9 of 10 chunks deleted is far past the 20% ratio threshold.
		let stats = manager.stats(user).await.unwrap();

		assert_eq!(stats.vector_count, 1);
		assert_eq!(stats.deleted_count, 0);
	}

	#[tokio::test]
	async fn reset_clears_the_index() {
		let dir = tempfile::tempdir().unwrap();
		let manager = manager(dir.path(), 4);
		let user = Uuid::new_v4();

		manager.add(user, vec![chunk("a", Uuid::new_v4(), vec![1.0, 1.0, 1.0])]).await.unwrap();
		manager.reset(user).await.unwrap();

		assert!(manager.search(user, &[1.0, 1.0, 1.0], 5).await.unwrap().is_empty());

		let stats = manager.stats(user).await.unwrap();

		assert!(stats.exists);
		assert_eq!(stats.vector_count, 0);
	}
}
