//! Ingestion pipeline orchestration.
//!
//! Takes a verified document through normalization, language detection,
//! chunking, embedding, and a transactional vector store write. Each step
//! is a pure function or an isolated call so the stages are independently
//! testable. A failure inside the write rolls the store back to its
//! pre-transaction rows; the document is skipped and the cycle continues.

use anyhow::Result;
use thiserror::Error;

use crate::chunk::split_words;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{DocumentChunk, VerifiedDocument};
use crate::store::VectorStore;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document produced no chunks after normalization")]
    Empty,

    #[error("embedding failed: {0}")]
    Embedding(anyhow::Error),

    #[error("vector store write failed: {0}")]
    Storage(anyhow::Error),

    /// A failed rollback leaves the index in an unknown state; this is the
    /// one ingestion failure treated as fatal by the scheduler.
    #[error("rollback failed, index may be inconsistent: {0}")]
    RollbackFailed(anyhow::Error),
}

/// Outcome of ingesting one verified document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestResult {
    pub chunks_written: usize,
}

pub struct IngestPipeline {
    store: VectorStore,
    provider: Box<dyn EmbeddingProvider>,
    embedding: EmbeddingConfig,
    chunking: ChunkingConfig,
}

impl IngestPipeline {
    pub fn new(
        store: VectorStore,
        embedding: EmbeddingConfig,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let provider = embedding::create_provider(&embedding)?;
        Ok(Self {
            store,
            provider,
            embedding,
            chunking,
        })
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn embedding_config(&self) -> &EmbeddingConfig {
        &self.embedding
    }

    /// Chunk, embed, and store one verified document.
    pub async fn ingest(&self, doc: &VerifiedDocument) -> Result<IngestResult, IngestError> {
        let text = normalize_text(&doc.text);
        let pieces = split_words(
            &doc.content_hash,
            &text,
            self.chunking.chunk_words,
            self.chunking.overlap_words,
        );
        if pieces.is_empty() {
            return Err(IngestError::Empty);
        }

        // Embed before opening the transaction so an embedding failure
        // never leaves partial rows behind.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let embedded =
                embedding::embed_texts(self.provider.as_ref(), &self.embedding, &texts)
                    .await
                    .map_err(IngestError::Embedding)?;
            vectors.extend(embedded);
        }

        let chunks: Vec<DocumentChunk> = pieces
            .iter()
            .zip(vectors)
            .map(|(piece, embedding)| DocumentChunk {
                chunk_id: piece.id.clone(),
                chunk_index: piece.index,
                text: piece.text.clone(),
                embedding,
                url: doc.url.clone(),
                title: doc.title.clone(),
                license: doc.license.clone(),
                language: doc.language.clone(),
                crawled_at: doc.crawled_at,
                content_hash: doc.content_hash.clone(),
                score: doc.trust_score,
            })
            .collect();

        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let tx = self
            .store
            .begin(&ids)
            .await
            .map_err(IngestError::Storage)?;

        match tx.upsert(&chunks).await {
            Ok(()) => {
                tx.commit();
                Ok(IngestResult {
                    chunks_written: chunks.len(),
                })
            }
            Err(write_err) => match tx.rollback().await {
                Ok(()) => Err(IngestError::Storage(write_err)),
                Err(rollback_err) => Err(IngestError::RollbackFailed(rollback_err)),
            },
        }
    }
}

/// Collapse runs of whitespace and trim. Chunk boundaries and content
/// hashes are computed over this form, so it must stay deterministic.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cheap stopword-count language sniff. Fails open to `"unknown"` instead
/// of rejecting a document.
pub fn detect_language(text: &str) -> String {
    if text.is_empty() {
        return "unknown".to_string();
    }
    let lowered = format!(" {} ", text.to_lowercase());
    let french = [" le ", " la ", " les ", " une ", " des ", " et "];
    let english = [" the ", " and ", " of ", " to ", " with "];
    let fr_hits = french.iter().filter(|m| lowered.contains(**m)).count();
    let en_hits = english.iter().filter(|m| lowered.contains(**m)).count();
    if fr_hits > en_hits {
        "fr".to_string()
    } else if en_hits > fr_hits {
        "en".to_string()
    } else {
        "unknown".to_string()
    }
}
