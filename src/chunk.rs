//! Sentence-boundary text chunker with overlap.
//!
//! Splits extracted document text into segments of roughly `chunk_size`
//! tokens with `overlap` tokens repeated between consecutive segments.
//! Boundaries prefer sentence ends, then whitespace, then a hard cut, so
//! semantic units are not split mid-thought. Tokens are approximated at
//! four characters.

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into overlapping chunks. Whitespace-only input produces
/// zero chunks (the pipeline treats that as an empty document).
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let max_chars = chunk_size.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap * CHARS_PER_TOKEN;

    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for sentence in sentences {
        for piece in split_oversized(sentence, max_chars) {
            let needed = if buf.is_empty() {
                piece.len()
            } else {
                buf.len() + 1 + piece.len()
            };

            if needed > max_chars && !buf.is_empty() {
                let tail = overlap_tail(&buf, overlap_chars);
                chunks.push(std::mem::take(&mut buf));
                // Seed the next chunk with the previous tail unless the
                // incoming piece would immediately overflow it again.
                if !tail.is_empty() && tail.len() + 1 + piece.len() <= max_chars {
                    buf = tail;
                }
            }

            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(piece);
        }
    }

    if !buf.trim().is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Split text into trimmed sentences. A sentence ends at `.`, `!`, or `?`
/// followed by whitespace (or end of input). Newline runs also terminate
/// a sentence, which keeps resume section headers separate.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let at_terminator = matches!(b, b'.' | b'!' | b'?')
            && bytes
                .get(i + 1)
                .map(|n| n.is_ascii_whitespace())
                .unwrap_or(true);
        let at_newline = b == b'\n';

        if at_terminator || at_newline {
            let end = if at_terminator { i + 1 } else { i };
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
        i += 1;
    }

    let last = text[start..].trim();
    if !last.is_empty() {
        sentences.push(last);
    }

    sentences
}

/// Split a single sentence longer than `max_chars` at whitespace
/// boundaries, hard-cutting only when a run has no whitespace at all.
fn split_oversized(sentence: &str, max_chars: usize) -> Vec<&str> {
    if sentence.len() <= max_chars {
        return vec![sentence];
    }

    let mut pieces = Vec::new();
    let mut remaining = sentence;
    while remaining.len() > max_chars {
        let mut cut = floor_char_boundary(remaining, max_chars);
        if let Some(pos) = remaining[..cut].rfind(char::is_whitespace) {
            if pos > 0 {
                cut = pos;
            }
        }
        let piece = remaining[..cut].trim_end();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = remaining[cut..].trim_start();
    }
    if !remaining.is_empty() {
        pieces.push(remaining);
    }
    pieces
}

/// Tail of `buf` no longer than `overlap_chars`, starting on a word
/// boundary. Empty when overlap is disabled or no boundary fits.
fn overlap_tail(buf: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || buf.len() <= overlap_chars {
        return String::new();
    }
    let start = floor_char_boundary(buf, buf.len() - overlap_chars);
    match buf[start..].find(char::is_whitespace) {
        Some(pos) => buf[start + pos..].trim_start().to_string(),
        None => String::new(),
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_produces_no_chunks() {
        assert!(chunk_text("", 512, 50).is_empty());
        assert!(chunk_text("   \n\t  ", 512, 50).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Alice is a backend engineer.", 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Alice is a backend engineer.");
    }

    #[test]
    fn chunks_end_on_sentence_boundaries() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about experience.", i))
            .collect::<Vec<_>>()
            .join(" ");
        // chunk_size=25 tokens => 100 chars
        let chunks = chunk_text(&text, 25, 0);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.ends_with('.'), "not a sentence boundary: {:?}", chunk);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = (0..40)
            .map(|i| format!("Worked on project {} shipping services.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 25, 10);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail_words: Vec<&str> = pair[0].split_whitespace().rev().take(2).collect();
            // The start of the next chunk repeats material from the tail
            // of the previous one.
            assert!(
                tail_words.iter().any(|w| pair[1].contains(w)),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn oversized_run_without_sentences_is_hard_split() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 25, 0);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 100);
        }
    }

    #[test]
    fn newlines_separate_sections() {
        let chunks = chunk_text("EXPERIENCE\nBuilt things\nEDUCATION\nLearned things", 512, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("EXPERIENCE"));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha one. Beta two. Gamma three. Delta four.";
        assert_eq!(chunk_text(text, 5, 2), chunk_text(text, 5, 2));
    }
}
