//! Incremental sentence boundary detection over a growing text buffer.
//!
//! A boundary is a run of terminators (`.`, `!`, `?`, including `...`)
//! followed by whitespace. A lone `.` directly after a configured
//! abbreviation ("Dr.", "Mr.") is not a boundary.

use std::collections::HashSet;

/// Honorifics that end in a period without ending the sentence.
pub const DEFAULT_ABBREVIATIONS: &[&str] = &["Mr", "Mrs", "Dr", "Ms", "Sr", "Jr"];

/// A complete sentence, trimmed and non-empty, numbered in detection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub index: u64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    abbreviations: HashSet<String>,
    next_index: u64,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::with_abbreviations(DEFAULT_ABBREVIATIONS.iter().copied())
    }

    pub fn with_abbreviations<I, S>(abbreviations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            buffer: String::new(),
            abbreviations: abbreviations
                .into_iter()
                .map(|a| a.as_ref().to_lowercase())
                .collect(),
            next_index: 0,
        }
    }

    pub fn append(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// Remove every complete sentence from the buffer. The unterminated tail
    /// stays buffered, so calling this again without new text yields nothing.
    pub fn extract(&mut self) -> Vec<Sentence> {
        let (pieces, consumed) = split_complete(&self.buffer, &self.abbreviations);
        if consumed == 0 {
            return Vec::new();
        }

        let sentences: Vec<Sentence> = pieces
            .into_iter()
            .filter_map(|piece| number(&mut self.next_index, piece))
            .collect();
        self.buffer.drain(..consumed);
        sentences
    }

    /// Append then extract.
    pub fn push(&mut self, delta: &str) -> Vec<Sentence> {
        self.append(delta);
        self.extract()
    }

    /// End of stream: whatever is left becomes the final sentence, boundary
    /// or not.
    pub fn flush(&mut self) -> Option<Sentence> {
        let rest = std::mem::take(&mut self.buffer);
        number(&mut self.next_index, &rest)
    }

    /// Drop buffered text; numbering continues where it left off.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn remainder(&self) -> &str {
        &self.buffer
    }
}

fn number(next_index: &mut u64, piece: &str) -> Option<Sentence> {
    let text = piece.trim();
    if text.is_empty() {
        return None;
    }
    let sentence = Sentence {
        index: *next_index,
        text: text.to_string(),
    };
    *next_index += 1;
    Some(sentence)
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Scan `text` for boundaries. Returns the untrimmed sentence slices and the
/// number of bytes they cover (including the whitespace after each boundary).
pub fn split_complete<'a>(text: &'a str, abbreviations: &HashSet<String>) -> (Vec<&'a str>, usize) {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut run_start: Option<usize> = None;

    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if is_terminator(c) {
            run_start.get_or_insert(i);
        } else {
            run_start = None;
            continue;
        }

        let Some(&(next_i, next_c)) = chars.peek() else { break };
        if !next_c.is_whitespace() {
            continue;
        }

        let run = run_start.take().unwrap_or(i);
        let run_end = i + c.len_utf8();
        if &text[run..run_end] == "." && follows_abbreviation(&text[start..run], abbreviations) {
            continue;
        }

        pieces.push(&text[start..run_end]);
        start = next_i + next_c.len_utf8();
        chars.next();
    }

    (pieces, start)
}

/// Whether the word right before a period is in the exception set.
fn follows_abbreviation(before: &str, abbreviations: &HashSet<String>) -> bool {
    let token = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|c: char| !c.is_alphanumeric());
    !token.is_empty() && abbreviations.contains(&token.to_lowercase())
}
