use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Chunk sizing, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Upper bound on the length of a chunk
    pub chunk_size: usize,
    /// How much trailing text of a chunk is repeated at the start of the next one
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Byte offset of this chunk in the source document
    pub start_position: usize,
}

/// Byte range of a piece of the source text
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

/// Split text into overlapping chunks of at most `config.chunk_size` characters.
///
/// The text is cut at blank lines first. Paragraphs longer than a chunk are cut
/// at sentence ends, and sentences still too long are cut at the size limit.
/// Pieces are then packed greedily; when a chunk is full, the next one starts
/// with as many trailing pieces as fit in `config.chunk_overlap`. Every chunk
/// is a contiguous substring of `text`.
pub fn split_into_chunks(text: &str, document_id: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let size = config.chunk_size.max(1);
    let pieces = split_into_pieces(text, size);

    let mut chunks = Vec::new();
    let mut window: VecDeque<Span> = VecDeque::new();

    for piece in pieces {
        if let Some(front) = window.front().copied() {
            if char_len(text, front.start, piece.end) > size {
                chunks.push(make_chunk(text, &window, document_id));

                // Keep a tail of the finished chunk as overlap for the next one
                while let (Some(front), Some(back)) = (window.front().copied(), window.back().copied()) {
                    let kept = char_len(text, front.start, back.end);
                    if kept > config.chunk_overlap || char_len(text, front.start, piece.end) > size {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        window.push_back(piece);
    }

    if !window.is_empty() {
        chunks.push(make_chunk(text, &window, document_id));
    }

    chunks
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}

fn make_chunk(text: &str, window: &VecDeque<Span>, document_id: &str) -> TextChunk {
    let start = window.front().map_or(0, |span| span.start);
    let end = window.back().map_or(start, |span| span.end);
    let chunk_text = &text[start..end];

    TextChunk {
        text: chunk_text.to_string(),
        token_count: estimate_token_count(chunk_text),
        document_id: document_id.to_string(),
        start_position: start,
    }
}

fn split_into_pieces(text: &str, size: usize) -> Vec<Span> {
    let mut pieces = Vec::new();

    for paragraph in paragraph_spans(text) {
        if char_len(text, paragraph.start, paragraph.end) <= size {
            pieces.push(paragraph);
            continue;
        }
        for sentence in sentence_spans(text, paragraph) {
            if char_len(text, sentence.start, sentence.end) <= size {
                pieces.push(sentence);
            } else {
                pieces.extend(hard_split(text, sentence, size));
            }
        }
    }

    pieces
}

fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for part in text.split(PARAGRAPH_SEPARATOR) {
        push_trimmed(&mut spans, text, offset, offset + part.len());
        offset += part.len() + PARAGRAPH_SEPARATOR.len();
    }
    spans
}

fn sentence_spans(text: &str, span: Span) -> Vec<Span> {
    let slice = &text[span.start..span.end];
    let mut spans = Vec::new();
    let mut piece_start = 0;
    let mut chars = slice.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if at_boundary {
            let end = i + c.len_utf8();
            push_trimmed(&mut spans, text, span.start + piece_start, span.start + end);
            piece_start = end;
        }
    }
    push_trimmed(&mut spans, text, span.start + piece_start, span.end);

    spans
}

fn hard_split(text: &str, span: Span, size: usize) -> Vec<Span> {
    let slice = &text[span.start..span.end];
    let mut spans = Vec::new();
    let mut start = span.start;
    let mut count = 0;

    for (i, _) in slice.char_indices() {
        if count == size {
            push_trimmed(&mut spans, text, start, span.start + i);
            start = span.start + i;
            count = 0;
        }
        count += 1;
    }
    push_trimmed(&mut spans, text, start, span.end);

    spans
}

fn push_trimmed(spans: &mut Vec<Span>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = slice.len() - slice.trim_start().len();
    let start = start + leading;
    spans.push(Span {
        start,
        end: start + trimmed.len(),
    });
}

fn char_len(text: &str, start: usize, end: usize) -> usize {
    text[start..end].chars().count()
}
