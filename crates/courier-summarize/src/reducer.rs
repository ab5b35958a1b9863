use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::chunking::{plan_chunks, ChunkPlan};

pub const FINAL_SUMMARY_PREFIX: &str = "Provide a final summary answering: ";

/// Answers a question over one piece of text. Implementations own any
/// retry policy; the reducer calls each piece exactly once.
#[async_trait]
pub trait ChunkAnswerer: Send + Sync {
    async fn answer(&self, question: &str, text: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("chunk limit must be at least 1")]
    InvalidChunkLimit,
    #[error("answering failed at {stage}: {cause:#}")]
    Answering { stage: String, cause: anyhow::Error },
}

impl SummarizeError {
    fn answering(stage: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Answering {
            stage: stage.into(),
            cause,
        }
    }
}

/// Map-reduce over whitespace chunks. A corpus within the limit costs one
/// call; otherwise one call per chunk in order, then one reduction over the
/// newline-joined partial answers. Any failure aborts the whole run.
pub async fn summarize(
    question: &str,
    corpus: &str,
    chunk_limit: usize,
    answerer: &dyn ChunkAnswerer,
) -> Result<String, SummarizeError> {
    let chunks = match plan_chunks(corpus, chunk_limit)? {
        ChunkPlan::Whole { token_count } => {
            tracing::debug!(token_count, "corpus fits in a single answering call");
            return answerer
                .answer(question, corpus)
                .await
                .map_err(|cause| SummarizeError::answering("corpus", cause));
        }
        ChunkPlan::Chunked(chunks) => chunks,
    };

    let total = chunks.len();
    let mut partials = Vec::with_capacity(total);
    for (index, chunk) in chunks.iter().enumerate() {
        tracing::debug!(
            chunk = index + 1,
            total,
            tokens = chunk.token_count,
            "answering chunk"
        );
        let partial = answerer
            .answer(question, &chunk.content)
            .await
            .map_err(|cause| SummarizeError::answering(format!("chunk {}/{total}", index + 1), cause))?;
        partials.push(partial);
    }

    let combined = partials.join("\n");
    let final_question = format!("{FINAL_SUMMARY_PREFIX}{question}");
    answerer
        .answer(&final_question, &combined)
        .await
        .map_err(|cause| SummarizeError::answering("reduction", cause))
}

/// Holds the answering capability and chunk limit so front ends build it
/// once from configuration.
#[derive(Clone)]
pub struct Summarizer {
    answerer: Arc<dyn ChunkAnswerer>,
    chunk_limit: usize,
}

impl Summarizer {
    pub fn new(answerer: Arc<dyn ChunkAnswerer>, chunk_limit: usize) -> Self {
        Self {
            answerer,
            chunk_limit,
        }
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    pub async fn summarize(&self, question: &str, corpus: &str) -> Result<String, SummarizeError> {
        summarize(question, corpus, self.chunk_limit, self.answerer.as_ref()).await
    }
}
