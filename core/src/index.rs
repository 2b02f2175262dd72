//! Document index
//!
//! Built once at startup from a directory of `.txt` / `.md` files and shared
//! read-only by every session. Files are split into paragraph passages.
//! Passages are embedded once with BGE-small-en-v1.5 and each lookup returns
//! the `top_k` passages closest to the question by cosine similarity. An
//! index without embeddings ranks passages by shared query terms instead.

use anyhow::{anyhow, bail, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::IndexConfig;
use crate::crew::DocumentLookup;
use crate::error::PipelineExecutionError;

/// Answer returned when nothing in the index matches
pub const NO_MATCHES: &str = "No relevant passages found.";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "how",
    "in", "is", "it", "its", "of", "on", "or", "the", "this", "to", "was", "were", "what", "when",
    "where", "which", "who", "why", "with",
];

/// Turns texts into fixed-size vectors, one per input, in order.
/// Called from worker threads only.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// BGE-small-en-v1.5 through fastembed (384 dims)
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    /// Load the model, downloading it into `cache_dir` on first use
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create model cache {}", cache_dir.display()))?;

        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize FastEmbed model: {e}"))?;

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("Embedding model lock poisoned"))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| anyhow!("Embedding failed: {e}"))
    }
}

/// One paragraph of a source document
#[derive(Debug, Clone)]
pub struct Passage {
    pub source: String,
    pub text: String,
    terms: HashSet<String>,
}

impl Passage {
    fn new(source: &str, text: &str) -> Self {
        Self {
            source: source.to_string(),
            text: text.to_string(),
            terms: tokenize(text).collect(),
        }
    }
}

#[derive(Clone)]
enum Ranking {
    Terms,
    Semantic {
        embedder: Arc<dyn Embedder>,
        /// One vector per passage, same order
        vectors: Vec<Vec<f32>>,
    },
}

impl fmt::Debug for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terms => f.write_str("Terms"),
            Self::Semantic { vectors, .. } => f
                .debug_struct("Semantic")
                .field("vectors", &vectors.len())
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentIndex {
    passages: Vec<Passage>,
    top_k: usize,
    ranking: Ranking,
}

impl DocumentIndex {
    /// Index `(source name, contents)` pairs in the given order, ranked by
    /// term overlap until [`embed_with`](Self::embed_with) succeeds
    pub fn from_documents<I, S, T>(documents: I, top_k: usize) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let passages = documents
            .into_iter()
            .flat_map(|(source, contents)| {
                split_paragraphs(contents.as_ref())
                    .map(|paragraph| Passage::new(source.as_ref(), paragraph))
                    .collect::<Vec<_>>()
            })
            .collect();

        Self {
            passages,
            top_k: top_k.max(1),
            ranking: Ranking::Terms,
        }
    }

    /// Load every `.txt` / `.md` file directly inside `dir`, sorted by name.
    /// A missing directory yields an empty index.
    pub fn from_dir(dir: &Path, top_k: usize) -> Result<Self> {
        if !dir.exists() {
            tracing::warn!(
                "Document directory {} does not exist; starting with an empty index",
                dir.display()
            );
            return Ok(Self::from_documents(Vec::<(String, String)>::new(), top_k));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read document directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_document = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "txt" | "md"));
            if path.is_file() && is_document {
                files.push(path);
            }
        }
        files.sort();

        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read document {}", path.display()))?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push((name, contents));
        }

        let index = Self::from_documents(documents, top_k);
        tracing::info!(
            "Indexed {} passages from {}",
            index.len(),
            dir.display()
        );
        Ok(index)
    }

    /// Build the index described by `settings`. Blocks while the embedding
    /// model loads and the passages are embedded. If that fails the index
    /// keeps term-overlap ranking.
    pub fn load(settings: &IndexConfig) -> Result<Self> {
        let mut index = Self::from_dir(&settings.data_dir, settings.top_k)?;
        if !settings.embeddings || index.is_empty() {
            return Ok(index);
        }

        let embedded = settings
            .resolved_model_cache_dir()
            .context("Could not find a cache directory for the embedding model")
            .and_then(FastEmbedder::new)
            .and_then(|embedder| index.embed_with(Arc::new(embedder)));
        if let Err(e) = embedded {
            tracing::warn!("Embeddings unavailable, ranking by term overlap: {:#}", e);
        }
        Ok(index)
    }

    /// Embed every passage with `embedder` and rank by cosine similarity from
    /// now on. On error the index is left unchanged.
    pub fn embed_with(&mut self, embedder: Arc<dyn Embedder>) -> Result<()> {
        let texts: Vec<String> = self.passages.iter().map(|p| p.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed(&texts)?
        };
        if vectors.len() != self.passages.len() {
            bail!(
                "Embedder returned {} vectors for {} passages",
                vectors.len(),
                self.passages.len()
            );
        }

        tracing::debug!("Embedded {} passages", vectors.len());
        self.ranking = Ranking::Semantic { embedder, vectors };
        Ok(())
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self.ranking, Ranking::Semantic { .. })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Best matching passages, best first, at most `top_k`. Equal scores
    /// keep document order.
    pub fn search(&self, query: &str) -> Result<Vec<&Passage>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        match &self.ranking {
            Ranking::Terms => Ok(self.search_terms(query)),
            Ranking::Semantic { embedder, vectors } => {
                let query_vector = embedder
                    .embed(&[query.to_string()])?
                    .into_iter()
                    .next()
                    .context("No embedding generated for the query")?;

                let mut scored: Vec<(f32, &Passage)> = vectors
                    .iter()
                    .map(|vector| cosine_similarity(&query_vector, vector))
                    .zip(&self.passages)
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

                Ok(scored
                    .into_iter()
                    .take(self.top_k)
                    .map(|(_, passage)| passage)
                    .collect())
            }
        }
    }

    fn search_terms(&self, query: &str) -> Vec<&Passage> {
        let query_terms: HashSet<String> = tokenize(query).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &Passage)> = self
            .passages
            .iter()
            .map(|passage| (query_terms.intersection(&passage.terms).count(), passage))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, passage)| passage)
            .collect()
    }
}

impl DocumentLookup for DocumentIndex {
    fn lookup(&self, question: &str) -> Result<String, PipelineExecutionError> {
        let hits = self
            .search(question)
            .map_err(|e| PipelineExecutionError::lookup(format!("{e:#}")))?;
        if hits.is_empty() {
            return Ok(NO_MATCHES.to_string());
        }

        Ok(hits
            .iter()
            .map(|passage| format!("[{}] {}", passage.source, passage.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Cosine similarity, 0.0 for mismatched or zero vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
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

fn split_paragraphs(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 1)
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
}
