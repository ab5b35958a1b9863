// Whitespace token chunking.
// Splits a corpus into consecutive fixed-size token groups with no overlap.

use crate::reducer::SummarizeError;

/// A slice of the corpus re-joined with single spaces. Indices count
/// tokens, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub token_count: usize,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    /// The corpus fits; answer it verbatim in one call.
    Whole { token_count: usize },
    Chunked(Vec<TextChunk>),
}

impl ChunkPlan {
    /// Answering calls this plan needs, including the reduction.
    pub fn call_count(&self) -> usize {
        match self {
            ChunkPlan::Whole { .. } => 1,
            ChunkPlan::Chunked(chunks) => chunks.len() + 1,
        }
    }
}

pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn plan_chunks(text: &str, limit: usize) -> Result<ChunkPlan, SummarizeError> {
    if limit == 0 {
        return Err(SummarizeError::InvalidChunkLimit);
    }

    let tokens = text.split_whitespace().collect::<Vec<_>>();
    if tokens.len() <= limit {
        return Ok(ChunkPlan::Whole {
            token_count: tokens.len(),
        });
    }

    let chunks = tokens
        .chunks(limit)
        .enumerate()
        .map(|(i, group)| {
            let start = i * limit;
            TextChunk {
                content: group.join(" "),
                token_count: group.len(),
                start_index: start,
                end_index: start + group.len(),
            }
        })
        .collect();
    Ok(ChunkPlan::Chunked(chunks))
}
