//! Optional embedding index over workspace files.
//!
//! Present only when an embedding-capable model is installed; without one
//! every retrieval deterministically returns nothing, and no other engine
//! behavior changes. Vectors are keyed by content hash so a file edit
//! invalidates its stale embedding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A file vector plus the hash it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEmbedding {
    pub path: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmbeddingIndex {
    /// Embedding model name; `None` disables the index.
    pub model: Option<String>,
    entries: BTreeMap<String, FileEmbedding>,
}

impl EmbeddingIndex {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            entries: BTreeMap::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `path` needs (re-)embedding for this content hash.
    pub fn is_stale(&self, path: &str, content_hash: &str) -> bool {
        self.is_available()
            && self
                .entries
                .get(path)
                .map(|e| e.content_hash != content_hash)
                .unwrap_or(true)
    }

    pub fn insert(&mut self, embedding: FileEmbedding) {
        if self.is_available() && !embedding.vector.is_empty() {
            self.entries.insert(embedding.path.clone(), embedding);
        }
    }

    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Paths most similar to the query vector, best first.
    ///
    /// Deterministically empty when the index is unavailable. Ties break
    /// by path so retrieval order is stable across runs.
    pub fn retrieve(&self, query: &[f32], top_k: usize, exclude: &[&str]) -> Vec<String> {
        if !self.is_available() || query.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f32, &str)> = self
            .entries
            .values()
            .filter(|e| !exclude.contains(&e.path.as_str()))
            .map(|e| (cosine_similarity(query, &e.vector), e.path.as_str()))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, path)| path.to_string())
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, vector: Vec<f32>) -> FileEmbedding {
        FileEmbedding {
            path: path.to_string(),
            content_hash: "h".to_string(),
            vector,
        }
    }

    #[test]
    fn unavailable_index_retrieves_nothing() {
        let mut index = EmbeddingIndex::new(None);
        index.insert(entry("a.py", vec![1.0, 0.0]));
        assert!(index.is_empty());
        assert!(index.retrieve(&[1.0, 0.0], 5, &[]).is_empty());
    }

    #[test]
    fn retrieval_orders_by_similarity() {
        let mut index = EmbeddingIndex::new(Some("all-minilm".to_string()));
        index.insert(entry("near.py", vec![1.0, 0.0]));
        index.insert(entry("far.py", vec![0.0, 1.0]));
        index.insert(entry("mid.py", vec![0.7, 0.7]));

        let found = index.retrieve(&[1.0, 0.0], 2, &[]);
        assert_eq!(found, vec!["near.py".to_string(), "mid.py".to_string()]);
    }

    #[test]
    fn excluded_paths_are_skipped() {
        let mut index = EmbeddingIndex::new(Some("all-minilm".to_string()));
        index.insert(entry("a.py", vec![1.0, 0.0]));
        index.insert(entry("b.py", vec![0.9, 0.1]));
        let found = index.retrieve(&[1.0, 0.0], 5, &["a.py"]);
        assert_eq!(found, vec!["b.py".to_string()]);
    }

    #[test]
    fn hash_change_marks_entry_stale() {
        let mut index = EmbeddingIndex::new(Some("all-minilm".to_string()));
        index.insert(FileEmbedding {
            path: "a.py".to_string(),
            content_hash: "h1".to_string(),
            vector: vec![1.0],
        });
        assert!(!index.is_stale("a.py", "h1"));
        assert!(index.is_stale("a.py", "h2"));
        assert!(index.is_stale("new.py", "h1"));
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
