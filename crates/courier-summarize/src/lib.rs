//! Turns a pile of formatted message blocks into one bounded answer.
//!
//! [`condense`] collapses repeated subjects, [`plan_chunks`] splits an
//! oversized corpus into model-sized pieces and [`Summarizer`] drives the
//! per-chunk calls plus the final reduction through a [`ChunkAnswerer`].

pub mod answerer;
pub mod chunking;
pub mod dedup;
pub mod reducer;

pub use answerer::{ProviderAnswerer, MAIL_SYSTEM_PROMPT};
pub use chunking::{plan_chunks, token_count, ChunkPlan, TextChunk};
pub use dedup::{condense, condense_text, parse_records, CondensedCorpus, CondensedEntry};
pub use reducer::{summarize, ChunkAnswerer, SummarizeError, Summarizer, FINAL_SUMMARY_PREFIX};
