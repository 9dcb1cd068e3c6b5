use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::models::{Chunk, PageText};
use sha2::{Digest, Sha256};

const SENTENCE_TERMINALS: [char; 7] = ['.', '!', '?', '…', '。', '！', '？'];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps accented Latin letters (Polish first) to their ASCII base letter.
pub fn fold_diacritics(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            'ą' | 'á' | 'à' | 'ä' | 'â' => 'a',
            'Ą' | 'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'ć' | 'č' => 'c',
            'Ć' | 'Č' => 'C',
            'ę' | 'é' | 'è' | 'ë' | 'ê' | 'ě' => 'e',
            'Ę' | 'É' | 'È' | 'Ë' | 'Ê' | 'Ě' => 'E',
            'í' => 'i',
            'Í' => 'I',
            'ł' => 'l',
            'Ł' => 'L',
            'ń' | 'ň' => 'n',
            'Ń' | 'Ň' => 'N',
            'ó' | 'ö' | 'ô' => 'o',
            'Ó' | 'Ö' | 'Ô' => 'O',
            'ř' => 'r',
            'Ř' => 'R',
            'ś' | 'š' => 's',
            'Ś' | 'Š' => 'S',
            'ü' | 'ú' | 'ů' => 'u',
            'Ü' | 'Ú' | 'Ů' => 'U',
            'ý' => 'y',
            'Ý' => 'Y',
            'ź' | 'ż' | 'ž' => 'z',
            'Ź' | 'Ż' | 'Ž' => 'Z',
            other => other,
        })
        .collect()
}

/// Lowercase, diacritic-folded alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    fold_diacritics(&text.to_lowercase())
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentenceSpan {
    start: usize,
    end: usize,
    chars: usize,
}

/// Splits `text` into sentence spans that tile it completely.
///
/// A sentence ends at terminal punctuation followed by whitespace (or end of text), or at a
/// blank line. Trailing whitespace belongs to the sentence it follows; whitespace at the start
/// of the text belongs to the first sentence.
fn split_sentences(text: &str) -> Vec<SentenceSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((_, ch)) = iter.next() {
        chars += 1;
        let boundary = if SENTENCE_TERMINALS.contains(&ch) {
            iter.peek().map_or(true, |(_, next)| next.is_whitespace())
        } else if ch == '\n' {
            matches!(iter.peek(), Some((_, '\n')) | Some((_, '\r')))
        } else {
            false
        };

        if !boundary {
            continue;
        }

        while let Some(&(_, next)) = iter.peek() {
            if !next.is_whitespace() {
                break;
            }
            iter.next();
            chars += 1;
        }

        let end = iter.peek().map_or(text.len(), |(offset, _)| *offset);
        // Leading blank lines join the sentence that follows them.
        if text[start..end].trim().is_empty() {
            continue;
        }
        spans.push(SentenceSpan { start, end, chars });
        start = end;
        chars = 0;
    }

    if start < text.len() {
        spans.push(SentenceSpan {
            start,
            end: text.len(),
            chars,
        });
    }

    spans
}

/// Splits every page into overlapping, sentence-aligned chunks.
///
/// Chunks never span pages. A sentence longer than `chunk_size` becomes a chunk of its own
/// and is never cut.
pub fn chunk_pages(
    document_id: &str,
    pages: &[PageText],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, RagError> {
    config.validate()?;

    let mut chunks = Vec::new();
    for page in pages {
        chunk_page(document_id, page, config, &mut chunks);
    }
    Ok(chunks)
}

/// Sliding window over one page, in both byte and character coordinates.
struct Window {
    start: usize,
    start_char: usize,
    end: usize,
    end_char: usize,
    seed_chars: usize,
}

impl Window {
    fn chars(&self) -> usize {
        self.end_char - self.start_char
    }

    fn has_fresh_text(&self) -> bool {
        self.chars() > self.seed_chars
    }
}

fn chunk_page(document_id: &str, page: &PageText, config: ChunkingConfig, out: &mut Vec<Chunk>) {
    let text = page.text.as_str();
    if text.trim().is_empty() {
        return;
    }

    let mut window = Window {
        start: 0,
        start_char: 0,
        end: 0,
        end_char: 0,
        seed_chars: 0,
    };

    for sentence in split_sentences(text) {
        if window.has_fresh_text() && window.chars() + sentence.chars > config.chunk_size {
            emit_chunk(document_id, page, &window, out);

            let carry = config.overlap.min(window.chars());
            window.start = nth_char_from_end(text, window.end, carry);
            window.start_char = window.end_char - carry;
            window.seed_chars = carry;
        }

        if !window.has_fresh_text() && window.seed_chars + sentence.chars > config.chunk_size {
            let keep = config.chunk_size.saturating_sub(sentence.chars).min(window.seed_chars);
            let dropped = window.seed_chars - keep;
            window.start = advance_chars(text, window.start, dropped);
            window.start_char += dropped;
            window.seed_chars = keep;
        }

        window.end = sentence.end;
        window.end_char += sentence.chars;
    }

    if window.has_fresh_text() {
        emit_chunk(document_id, page, &window, out);
    }
}

fn emit_chunk(document_id: &str, page: &PageText, window: &Window, out: &mut Vec<Chunk>) {
    let text = page.text[window.start..window.end].to_string();
    let index = out.len();

    out.push(Chunk {
        index,
        chunk_id: make_chunk_id(document_id, page.number, index, &text),
        page: page.number,
        char_start: window.start_char,
        char_end: window.end_char,
        overlap_chars: window.seed_chars,
        text_normalized: normalize_whitespace(&fold_diacritics(&text.to_lowercase())),
        tokens: tokenize(&text),
        text,
    });
}

/// Byte offset of the `count`-th character before byte offset `end`.
fn nth_char_from_end(text: &str, end: usize, count: usize) -> usize {
    if count == 0 {
        return end;
    }
    text[..end]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map_or(0, |(offset, _)| offset)
}

fn advance_chars(text: &str, start: usize, count: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(count)
        .map_or(text.len(), |(offset, _)| start + offset)
}

fn make_chunk_id(document_id: &str, page: u32, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
