//! Content-addressed on-disk memo of label embeddings.
//!
//! An entry is keyed by the SHA-256 of the model name, the instruction and the
//! exact ordered label list, so identical label sets from different surveys or
//! runs reuse one computation. Entries are written with an atomic rename;
//! concurrent writers of the same key produce identical content.

use std::io::Write;
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::EmbeddingError;

#[derive(Serialize, Deserialize)]
struct MemoEntry {
    model: String,
    count: usize,
    vectors: Vec<Vec<f32>>,
}

/// On-disk embedding memo rooted at one directory.
#[derive(Debug, Clone)]
pub struct EmbeddingMemo {
    dir: PathBuf,
}

impl EmbeddingMemo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Content key for an ordered label list.
    pub fn key(model: &str, instruction: &str, labels: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(instruction.as_bytes());
        hasher.update([0u8]);
        // Length prefixes keep ["ab", "c"] and ["a", "bc"] apart
        for label in labels {
            hasher.update((label.len() as u64).to_le_bytes());
            hasher.update(label.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// File holding the entry for `key` (fanned out by the first two hex digits).
    pub fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.dir.join(shard).join(format!("{key}.json"))
    }

    /// Load an entry. Missing, unreadable or mismatched entries are a miss.
    pub fn get(&self, key: &str, expected_len: usize) -> Option<Vec<Vec<f32>>> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };

        match serde_json::from_slice::<MemoEntry>(&bytes) {
            Ok(entry) if entry.count == expected_len && entry.vectors.len() == expected_len => {
                debug!(key = %key, count = expected_len, "Embedding memo hit");
                Some(entry.vectors)
            }
            Ok(entry) => {
                warn!(
                    key = %key,
                    stored = entry.count,
                    expected = expected_len,
                    "Embedding memo entry has wrong length, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt embedding memo entry, ignoring");
                None
            }
        }
    }

    /// Store an entry, replacing any previous content atomically.
    pub fn put(&self, key: &str, model: &str, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entry = MemoEntry {
            model: model.to_string(),
            count: vectors.len(),
            vectors: vectors.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(&bytes))
            .map_err(|e| EmbeddingError::Cache(format!("{}: {}", path.display(), e)))?;

        debug!(key = %key, count = vectors.len(), "Stored embedding memo entry");
        Ok(())
    }
}
