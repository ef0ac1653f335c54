//! Persistent training corpus with similarity search.
//!
//! Entries are embedded with a hashed bag-of-words vector and ranked by cosine
//! similarity. The corpus is a single JSON file under the data directory,
//! which on Cloud Run is the mounted storage bucket.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const CORPUS_FILE: &str = "training_data.json";
const EMBEDDING_DIM: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingKind {
    Sql,
    Ddl,
    Documentation,
}

impl TrainingKind {
    fn id_suffix(self) -> &'static str {
        match self {
            TrainingKind::Sql => "sql",
            TrainingKind::Ddl => "ddl",
            TrainingKind::Documentation => "doc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub id: String,
    pub kind: TrainingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vector store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no training entry with id {0}")]
    NotFound(String),

    #[error("training content is empty")]
    Empty,
}

/// Storage and retrieval of training material.
pub trait VectorStore: Send + Sync {
    /// Add an entry and return its id. Adding an identical entry again
    /// returns the existing id.
    fn add(
        &self,
        kind: TrainingKind,
        question: Option<&str>,
        content: &str,
    ) -> Result<String, StoreError>;

    fn remove(&self, id: &str) -> Result<(), StoreError>;

    fn entries(&self) -> Vec<TrainingEntry>;

    /// Up to `limit` entries of `kind`, most similar to `query` first.
    fn similar(&self, kind: TrainingKind, query: &str, limit: usize) -> Vec<TrainingEntry>;
}

struct Indexed {
    entry: TrainingEntry,
    vector: Vec<f32>,
}

impl Indexed {
    fn new(entry: TrainingEntry) -> Self {
        let text = match entry.question.as_deref() {
            Some(q) => format!("{q} {}", entry.content),
            None => entry.content.clone(),
        };
        let vector = embed(&text);
        Self { entry, vector }
    }
}

pub struct LocalVectorStore {
    file: PathBuf,
    index: RwLock<Vec<Indexed>>,
}

impl LocalVectorStore {
    /// Open (or start) the corpus kept under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let file = dir.join(CORPUS_FILE);
        let entries: Vec<TrainingEntry> = match std::fs::read(&file) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: file.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path: file, source }),
        };
        tracing::info!(path = %file.display(), entries = entries.len(), "opened training corpus");
        Ok(Self {
            file,
            index: RwLock::new(entries.into_iter().map(Indexed::new).collect()),
        })
    }

    fn persist(&self, index: &[Indexed]) -> Result<(), StoreError> {
        let entries: Vec<&TrainingEntry> = index.iter().map(|i| &i.entry).collect();
        let bytes = serde_json::to_vec_pretty(&entries).map_err(|source| StoreError::Corrupt {
            path: self.file.clone(),
            source,
        })?;
        let tmp = self.file.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|()| std::fs::rename(&tmp, &self.file))
            .map_err(|source| StoreError::Io {
                path: self.file.clone(),
                source,
            })
    }
}

impl VectorStore for LocalVectorStore {
    fn add(
        &self,
        kind: TrainingKind,
        question: Option<&str>,
        content: &str,
    ) -> Result<String, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::Empty);
        }
        let question = question.map(str::trim).filter(|q| !q.is_empty());

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = index.iter().find(|i| {
            i.entry.kind == kind
                && i.entry.content == content
                && i.entry.question.as_deref() == question
        }) {
            return Ok(existing.entry.id.clone());
        }

        let entry = TrainingEntry {
            id: format!("{}-{}", gen_entry_id(), kind.id_suffix()),
            kind,
            question: question.map(str::to_string),
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        let id = entry.id.clone();
        index.push(Indexed::new(entry));
        if let Err(e) = self.persist(&index) {
            index.pop();
            return Err(e);
        }
        tracing::debug!(%id, ?kind, "added training entry");
        Ok(id)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let pos = index
            .iter()
            .position(|i| i.entry.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let removed = index.remove(pos);
        if let Err(e) = self.persist(&index) {
            index.insert(pos, removed);
            return Err(e);
        }
        Ok(())
    }

    fn entries(&self) -> Vec<TrainingEntry> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|i| i.entry.clone())
            .collect()
    }

    fn similar(&self, kind: TrainingKind, query: &str, limit: usize) -> Vec<TrainingEntry> {
        let query = embed(query);
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(f32, &Indexed)> = index
            .iter()
            .filter(|i| i.entry.kind == kind)
            .map(|i| (cosine_similarity(&query, &i.vector), i))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, i)| i.entry.clone())
            .collect()
    }
}

fn gen_entry_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// FNV-1a, stable across runs so persisted corpora re-embed identically.
fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % EMBEDDING_DIM as u64) as usize
}

fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for token in tokens(text) {
        v[bucket(&token)] += 1.0;
    }
    v
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_ranks_by_shared_terms() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(dir.path()).unwrap();
        store
            .add(
                TrainingKind::Sql,
                Some("How many orders were placed last month?"),
                "SELECT COUNT(*) FROM sales.orders WHERE order_date >= '2024-01-01'",
            )
            .unwrap();
        store
            .add(
                TrainingKind::Sql,
                Some("List customers by country"),
                "SELECT country, name FROM sales.customers ORDER BY country",
            )
            .unwrap();
        store
            .add(TrainingKind::Ddl, None, "CREATE TABLE sales.orders (id INT64)")
            .unwrap();

        let hits = store.similar(TrainingKind::Sql, "which customers live in each country", 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].question.as_deref(), Some("List customers by country"));

        let ddl = store.similar(TrainingKind::Ddl, "orders", 5);
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].id.ends_with("-ddl"));
    }

    #[test]
    fn corpus_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = LocalVectorStore::open(dir.path()).unwrap();
            store
                .add(TrainingKind::Documentation, None, "Revenue is net of refunds.")
                .unwrap()
        };

        let reopened = LocalVectorStore::open(dir.path()).unwrap();
        let entries = reopened.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].kind, TrainingKind::Documentation);
    }

    #[test]
    fn duplicate_add_returns_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(dir.path()).unwrap();
        let first = store.add(TrainingKind::Ddl, None, "CREATE TABLE t (x INT64)").unwrap();
        let second = store.add(TrainingKind::Ddl, None, "CREATE TABLE t (x INT64)  ").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn remove_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(dir.path()).unwrap();
        let id = store.add(TrainingKind::Ddl, None, "CREATE TABLE t (x INT64)").unwrap();

        assert!(matches!(store.remove("missing"), Err(StoreError::NotFound(_))));
        store.remove(&id).unwrap();
        assert!(store.entries().is_empty());
        assert!(LocalVectorStore::open(dir.path()).unwrap().entries().is_empty());
    }

    #[test]
    fn empty_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.add(TrainingKind::Documentation, None, "   "),
            Err(StoreError::Empty)
        ));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CORPUS_FILE), "{not json").unwrap();
        assert!(matches!(
            LocalVectorStore::open(dir.path()),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
