//! Reference corpus: read-only example code and documentation for retrieval
//!
//! Selection is keyword overlap between the task description and each
//! snippet. Ranking is deterministic: equal scores keep insertion order, so
//! the same corpus and query always yield the same top-k in the same order.

use crate::error::{CoordinationError, CoordinationResult};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default maximum lines per chunk when loading files.
pub const DEFAULT_CHUNK_LINES: usize = 60;

/// Words too common to say anything about relevance.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "were", "you",
    "your", "use", "using", "each", "all", "any", "not", "but", "can", "will", "should", "must",
    "make", "sure", "have", "has", "its", "per", "also", "then", "than", "which", "when", "where",
    "import", "def", "return", "self", "none", "true", "false",
];

/// One retrievable fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSnippet {
    /// Where the fragment came from or what it is about (e.g. `gaepsi2_demo.py#2`)
    pub topic: String,
    pub body: String,
}

/// A snippet selected for a query, with its score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub topic: String,
    pub body: String,
    pub score: u32,
}

#[derive(Debug, Clone)]
struct IndexedSnippet {
    snippet: ReferenceSnippet,
    topic_terms: HashSet<String>,
    body_terms: HashSet<String>,
}

/// Insertion-ordered corpus of reference snippets.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCorpus {
    entries: Vec<IndexedSnippet>,
}

impl ReferenceCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snippet; later inserts lose ties against earlier ones.
    pub fn insert(&mut self, topic: impl Into<String>, body: impl Into<String>) {
        let snippet = ReferenceSnippet {
            topic: topic.into(),
            body: body.into(),
        };
        self.entries.push(IndexedSnippet {
            topic_terms: terms(&snippet.topic),
            body_terms: terms(&snippet.body),
            snippet,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snippets(&self) -> impl Iterator<Item = &ReferenceSnippet> {
        self.entries.iter().map(|e| &e.snippet)
    }

    /// Load every UTF-8 file under `dir`, chunked to at most `chunk_lines` lines.
    ///
    /// Files are visited in sorted path order (hidden and git-ignored files
    /// skipped), so insertion order, and with it tie-breaking, is stable.
    pub fn load_dir(dir: impl AsRef<Path>, chunk_lines: usize) -> CoordinationResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CoordinationError::Corpus(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
            .hidden(true)
            .git_ignore(true)
            .build()
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut corpus = Self::new();
        for path in files {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    debug!(path = %path.display(), "Skipping unreadable corpus file: {e}");
                    continue;
                }
            };
            let relative = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .display()
                .to_string();
            for (index, chunk) in chunk_text(&text, chunk_lines).into_iter().enumerate() {
                corpus.insert(format!("{}#{}", relative, index + 1), chunk);
            }
        }

        info!(dir = %dir.display(), snippets = corpus.len(), "Reference corpus loaded");
        Ok(corpus)
    }

    /// Top-`k` snippets for `query`, best first. Zero-score snippets are never returned.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievedSnippet> {
        if k == 0 {
            return Vec::new();
        }
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(u32, &IndexedSnippet)> = self
            .entries
            .iter()
            .map(|entry| (score(&query_terms, entry), entry))
            .filter(|(score, _)| *score > 0)
            .collect();

        // Stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| RetrievedSnippet {
                topic: entry.snippet.topic.clone(),
                body: entry.snippet.body.clone(),
                score,
            })
            .collect()
    }
}

/// Topic hits count double: a file named after the thing asked for is usually the right one.
fn score(query: &HashSet<String>, entry: &IndexedSnippet) -> u32 {
    let body = query.intersection(&entry.body_terms).count() as u32;
    let topic = query.intersection(&entry.topic_terms).count() as u32;
    body + 2 * topic
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Split text into chunks of at most `max_lines` lines, preferring blank-line boundaries.
pub fn chunk_text(text: &str, max_lines: usize) -> Vec<String> {
    let max_lines = max_lines.max(1);
    let mut paragraphs: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    for paragraph in paragraphs {
        if paragraph.len() > max_lines {
            if !pending.is_empty() {
                chunks.push(pending.join("\n"));
                pending.clear();
            }
            for window in paragraph.chunks(max_lines) {
                chunks.push(window.join("\n"));
            }
            continue;
        }
        // +1 for the blank separator line
        if !pending.is_empty() && pending.len() + 1 + paragraph.len() > max_lines {
            chunks.push(pending.join("\n"));
            pending.clear();
        }
        if !pending.is_empty() {
            pending.push("");
        }
        pending.extend(paragraph);
    }
    if !pending.is_empty() {
        chunks.push(pending.join("\n"));
    }
    chunks
}
