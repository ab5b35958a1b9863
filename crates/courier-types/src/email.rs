use serde::{Deserialize, Serialize};

/// One formatted message block as it appears in the corpus handed to the
/// summarizer: headers followed by the snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub subject: Option<String>,
    pub raw_block: String,
}

impl EmailRecord {
    pub fn new(subject: Option<String>, raw_block: impl Into<String>) -> Self {
        Self {
            subject,
            raw_block: raw_block.into(),
        }
    }
}
