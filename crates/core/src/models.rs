use crate::error::RagError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text of one page as handed over by the text-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub loaded_at: DateTime<Utc>,
}

/// A contiguous span of one page; the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in document order, used for provenance.
    pub index: usize,
    pub chunk_id: String,
    pub page: u32,
    /// Character offsets `[char_start, char_end)` within the page text.
    pub char_start: usize,
    pub char_end: usize,
    /// Leading characters shared with the previous chunk of the same page.
    pub overlap_chars: usize,
    pub text: String,
    pub text_normalized: String,
    pub tokens: Vec<String>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }

    /// Text that is not a repeat of the previous chunk's tail.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap_chars) {
            Some((offset, _)) => &self.text[offset..],
            None => "",
        }
    }

    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef {
            index: self.index,
            chunk_id: self.chunk_id.clone(),
            page: self.page,
        }
    }
}

/// Back-reference from an index entry to the chunk it was embedded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub index: usize,
    pub chunk_id: String,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity, or 0.0 when the chunk did not pass the semantic filter.
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub combined_score: f32,
    pub high_confidence: bool,
    /// Rank in the semantic candidate list, if the chunk made it there.
    pub semantic_rank: Option<usize>,
    pub matched_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub similarity_threshold: f32,
    /// Sorted by `combined_score`, descending.
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.hits.iter().map(|hit| hit.chunk.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerStatus {
    Answered,
    /// Nothing cleared the threshold and nothing matched lexically; the model was not called.
    NoEvidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub status: AnswerStatus,
    pub evidence: RetrievalResult,
}

pub const NO_ANSWER_TEXT: &str = "No answer found: the document contains no passage relevant to this question.";

/// Restricts retrieval to one page or an inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageScope {
    Page(u32),
    Range { start: u32, end: u32 },
}

impl PageScope {
    pub fn range(start: u32, end: u32) -> Result<Self, RagError> {
        if start == 0 || start > end {
            return Err(RagError::InvalidPageScope(format!(
                "expected 1 <= start <= end, got {start}-{end}"
            )));
        }
        Ok(PageScope::Range { start, end })
    }

    pub fn contains(&self, page: u32) -> bool {
        match *self {
            PageScope::Page(number) => page == number,
            PageScope::Range { start, end } => (start..=end).contains(&page),
        }
    }
}

impl fmt::Display for PageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageScope::Page(number) => write!(f, "{number}"),
            PageScope::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for PageScope {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parse = |raw: &str| {
            raw.trim().parse::<u32>().map_err(|_| {
                RagError::InvalidPageScope(format!("`{value}` is not a page number or range"))
            })
        };

        match value.split_once('-') {
            Some((start, end)) => PageScope::range(parse(start)?, parse(end)?),
            None => {
                let page = parse(value)?;
                if page == 0 {
                    return Err(RagError::InvalidPageScope("pages are numbered from 1".to_string()));
                }
                Ok(PageScope::Page(page))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_scope_parses_single_pages_and_ranges() {
        assert_eq!("3".parse::<PageScope>().ok(), Some(PageScope::Page(3)));
        assert_eq!(
            " 2 - 4 ".parse::<PageScope>().ok(),
            Some(PageScope::Range { start: 2, end: 4 })
        );
        assert!("0".parse::<PageScope>().is_err());
        assert!("5-2".parse::<PageScope>().is_err());
        assert!("two".parse::<PageScope>().is_err());
    }

    #[test]
    fn page_scope_containment_is_inclusive() {
        let scope = PageScope::Range { start: 2, end: 3 };
        assert!(!scope.contains(1));
        assert!(scope.contains(2));
        assert!(scope.contains(3));
        assert!(!scope.contains(4));
    }

    #[test]
    fn fresh_text_skips_the_overlap_prefix() {
        let chunk = Chunk {
            index: 1,
            chunk_id: "id".to_string(),
            page: 1,
            char_start: 4,
            char_end: 12,
            overlap_chars: 3,
            text: "żółw idzie".to_string(),
            text_normalized: String::new(),
            tokens: Vec::new(),
        };
        assert_eq!(chunk.fresh_text(), "w idzie");
    }
}
