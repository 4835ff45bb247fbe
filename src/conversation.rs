//! Transient BM25 index over conversation turns.
//!
//! Rebuilt each session and updated incrementally as turns arrive; nothing
//! here is persisted. Scores blend Okapi BM25 with the shared recency boost.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{ranking, tokenizer::tokenize};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// A scored conversation search hit.
#[derive(Debug, Clone)]
pub struct ConversationHit {
    pub entry: MemoryEntry,
    pub score: f32,
}

/// In-memory inverted index over [`MemoryEntry`] documents.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    entries: Vec<MemoryEntry>,
    doc_lens: Vec<usize>,
    /// token → (doc index, term frequency), doc indices ascending.
    postings: HashMap<String, Vec<(usize, u32)>>,
    avg_doc_len: f64,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the whole index, rebuilding postings and the average document
    /// length from scratch.
    pub fn load(&mut self, entries: Vec<MemoryEntry>) {
        self.entries.clear();
        self.doc_lens.clear();
        self.postings.clear();
        self.avg_doc_len = 0.0;

        for entry in entries {
            self.insert(entry);
        }
        // Full recompute rather than the running average used by `add`.
        if !self.doc_lens.is_empty() {
            let total: usize = self.doc_lens.iter().sum();
            self.avg_doc_len = total as f64 / self.doc_lens.len() as f64;
        }
    }

    /// Append one turn, updating postings and the average document length
    /// incrementally without rescanning prior documents.
    pub fn add(&mut self, entry: MemoryEntry) {
        let n = self.entries.len() as f64;
        let dl = self.insert(entry);
        self.avg_doc_len = (self.avg_doc_len * n + dl as f64) / (n + 1.0);
    }

    /// Insert postings for `entry` and return its token count.
    fn insert(&mut self, entry: MemoryEntry) -> usize {
        let doc = self.entries.len();
        let tokens = tokenize(&entry.content);
        let dl = tokens.len();

        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }
        for (token, count) in tf {
            self.postings.entry(token).or_default().push((doc, count));
        }

        self.entries.push(entry);
        self.doc_lens.push(dl);
        dl
    }

    /// Search by BM25 blended with recency. Documents matching no query
    /// token are excluded; ties keep insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ConversationHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() || self.entries.is_empty() {
            return vec![];
        }

        let n = self.entries.len() as f64;
        let avg_dl = self.avg_doc_len.max(1.0);
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for token in &tokens {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for &(doc, tf) in postings {
                let tf = f64::from(tf);
                let dl = self.doc_lens[doc] as f64;
                let tf_norm =
                    tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avg_dl));
                *scores.entry(doc).or_insert(0.0) += idf * tf_norm;
            }
        }

        let now = Utc::now().timestamp();
        let mut matched: Vec<(usize, f64)> = scores.into_iter().collect();
        // Insertion order first so the stable sort below breaks ties by it.
        matched.sort_by_key(|&(doc, _)| doc);

        let mut hits: Vec<ConversationHit> = matched
            .into_iter()
            .map(|(doc, bm25)| {
                let entry = self.entries[doc].clone();
                let boost = ranking::recency_boost(entry.timestamp.timestamp(), now);
                ConversationHit {
                    entry,
                    score: ranking::blend(bm25, boost) as f32,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        hits
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::Duration};

    fn entry(content: &str) -> MemoryEntry {
        MemoryEntry {
            session_id: "s1".into(),
            timestamp: Utc::now(),
            role: "user".into(),
            content: content.into(),
        }
    }

    fn entry_at(content: &str, timestamp: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            timestamp,
            ..entry(content)
        }
    }

    #[test]
    fn test_term_frequency_ranks_first() {
        let mut index = ConversationIndex::new();
        index.load(vec![
            entry("apple banana cherry"),
            entry("apple apple apple"),
            entry("banana cherry date"),
        ]);

        let hits = index.search("apple", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.content, "apple apple apple");
    }

    #[test]
    fn test_cjk_query_matches_cjk_content() {
        let mut index = ConversationIndex::new();
        index.load(vec![
            entry("今天天气很好"),
            entry("明天要下雨"),
            entry("hello world"),
        ]);

        let hits = index.search("天气", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].entry.content, "今天天气很好");
    }

    #[test]
    fn test_non_matching_docs_are_excluded() {
        let mut index = ConversationIndex::new();
        index.load(vec![entry("rust systems"), entry("pasta recipe")]);

        let hits = index.search("rust", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.content, "rust systems");
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let mut index = ConversationIndex::new();
        index.add(entry("anything"));
        assert!(index.search("", 10).is_empty());
        assert!(index.search("!!! ---", 10).is_empty());
    }

    #[test]
    fn test_recency_breaks_lexical_ties() {
        let now = Utc::now();
        let mut index = ConversationIndex::new();
        index.load(vec![
            entry_at("deploy checklist", now - Duration::days(30)),
            entry_at("deploy checklist", now),
        ]);

        let hits = index.search("deploy", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.timestamp, hits.iter().map(|h| h.entry.timestamp).max().unwrap());
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_incremental_add_matches_bulk_load() {
        let turns = vec![
            entry("one two three"),
            entry("four five"),
            entry("six seven eight nine"),
        ];

        let mut loaded = ConversationIndex::new();
        loaded.load(turns.clone());

        let mut added = ConversationIndex::new();
        for turn in turns {
            added.add(turn);
        }

        assert_eq!(loaded.len(), added.len());
        assert!((loaded.avg_doc_len - added.avg_doc_len).abs() < 1e-9);

        let a = loaded.search("five", 5);
        let b = added.search("five", 5);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].entry.content, b[0].entry.content);
    }

    #[test]
    fn test_limit_truncates() {
        let mut index = ConversationIndex::new();
        for i in 0..10 {
            index.add(entry(&format!("shared token plus unique{i}")));
        }
        assert_eq!(index.search("shared", 3).len(), 3);
    }
}
