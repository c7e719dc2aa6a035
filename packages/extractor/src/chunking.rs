//! Splitting of document text into bounded chunks for LLM calls.
//!
//! Chunk boundaries follow fee-section headers. Segments that are still too
//! large are cut at fixed character offsets. Once `max_chunks` chunks have
//! been produced the remaining text is dropped; a document with more fee
//! sections than the cap allows is only partially extracted.

/// Keywords that mark a line as a fee-section header.
pub const HEADER_KEYWORDS: [&str; 8] = [
    "tarif",
    "tariff",
    "fee",
    "commission",
    "kosten",
    "charges",
    "pricing",
    "courtage",
];

/// Header lines are short; long lines mentioning "fee" are body text.
const MAX_HEADER_CHARS: usize = 160;

/// Split `text` into at most `max_chunks` chunks of at most `max_chars` characters.
///
/// The returned iterator borrows `text`, is lazy, and can be cloned to
/// restart from the beginning.
#[must_use]
pub fn chunk(text: &str, max_chars: usize, max_chunks: usize) -> Chunks<'_> {
    let segments = if max_chars == 0 || max_chunks == 0 {
        Vec::new()
    } else if text.chars().count() <= max_chars {
        vec![(0, text.len())]
    } else {
        segment_bounds(text)
    };

    Chunks {
        text,
        segments,
        segment: 0,
        offset: 0,
        max_chars,
        remaining: max_chunks,
    }
}

/// Whether a line looks like the start of a fee section.
#[must_use]
pub fn is_header_line(line: &str) -> bool {
    let len = line.trim().chars().count();
    if len == 0 || len >= MAX_HEADER_CHARS {
        return false;
    }
    let lower = line.to_lowercase();
    HEADER_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Byte ranges of the sections delimited by header lines.
fn segment_bounds(text: &str) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        if is_header_line(line) {
            starts.push(pos);
        }
        pos += line.len();
    }

    if starts.first() != Some(&0) {
        // Preamble before the first header, or the whole text without headers
        starts.insert(0, 0);
    }

    let mut bounds = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        if !text[*start..end].trim().is_empty() {
            bounds.push((*start, end));
        }
    }
    bounds
}

/// Lazy iterator over the chunks of a text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    segments: Vec<(usize, usize)>,
    segment: usize,
    /// Byte offset inside the current segment.
    offset: usize,
    max_chars: usize,
    remaining: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let (start, end) = *self.segments.get(self.segment)?;
        let segment = &self.text[start..end];
        let rest = &segment[self.offset..];

        // Cut after `max_chars` characters, on a char boundary
        let cut = rest
            .char_indices()
            .nth(self.max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let piece = &rest[..cut];

        self.offset += cut;
        if self.offset >= segment.len() {
            self.segment += 1;
            self.offset = 0;
        }
        self.remaining -= 1;

        Some(piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: &str = "Bolero tarieven 2025\n\
        Introduction to our services.\n\
        Equity fees\n\
        Stocks on Euronext Brussels: EUR 7.50 up to 2,500\n\
        ETF tariff\n\
        ETF trades: flat EUR 15 per order\n\
        Custody charges\n\
        None.\n";

    #[test]
    fn test_small_text_is_single_chunk() {
        let chunks: Vec<_> = chunk(SCHEDULE, 10_000, 8).collect();
        assert_eq!(chunks, vec![SCHEDULE]);
    }

    #[test]
    fn test_splits_on_headers() {
        let chunks: Vec<_> = chunk(SCHEDULE, 80, 8).collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].starts_with("Bolero tarieven"));
        assert!(chunks[1].starts_with("Equity fees"));
        assert!(chunks[2].starts_with("ETF tariff"));
        assert!(chunks[3].starts_with("Custody charges"));
    }

    #[test]
    fn test_preamble_is_kept() {
        let text = "Welcome to the broker.\nSome intro text that is long enough.\nFee schedule\nEUR 5 per order\n";
        let chunks: Vec<_> = chunk(text, 70, 8).collect();
        assert_eq!(chunks[0], "Welcome to the broker.\nSome intro text that is long enough.\n");
        assert_eq!(chunks[1], "Fee schedule\nEUR 5 per order\n");
    }

    #[test]
    fn test_no_headers_hard_slices() {
        let text = "abcdefghij".repeat(5);
        let chunks: Vec<_> = chunk(&text, 20, 8).collect();
        assert_eq!(chunks, vec![&text[..20], &text[20..40], &text[40..]]);
    }

    #[test]
    fn test_oversized_section_is_sliced() {
        let body = "x".repeat(45);
        let text = format!("Fees\n{body}\nCommission\nEUR 2\n");
        let chunks: Vec<_> = chunk(&text, 20, 8).collect();
        assert_eq!(chunks[0].chars().count(), 20);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert!(chunks.last().is_some_and(|c| c.contains("EUR 2")));
    }

    #[test]
    fn test_stops_at_max_chunks() {
        let text = "z".repeat(100);
        let chunks: Vec<_> = chunk(&text, 10, 3).collect();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_completeness_bound() {
        let text = SCHEDULE.repeat(20);
        for (max_chars, max_chunks) in [(10, 3), (50, 7), (200, 2), (1, 1)] {
            let chunks: Vec<_> = chunk(&text, max_chars, max_chunks).collect();
            assert!(chunks.len() <= max_chunks);
            let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
            assert!(total <= max_chars * max_chunks);
        }
    }

    #[test]
    fn test_respects_char_boundaries() {
        let text = "€".repeat(30);
        let chunks: Vec<_> = chunk(&text, 7, 10).collect();
        assert_eq!(chunks.len(), 5);
        assert!(chunks[..4].iter().all(|c| c.chars().count() == 7));
    }

    #[test]
    fn test_iterator_is_restartable() {
        let chunks = chunk(SCHEDULE, 80, 8);
        let first: Vec<_> = chunks.clone().collect();
        let second: Vec<_> = chunks.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_limits_yield_nothing() {
        assert_eq!(chunk(SCHEDULE, 0, 8).count(), 0);
        assert_eq!(chunk(SCHEDULE, 80, 0).count(), 0);
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header_line("Tarieven en kosten"));
        assert!(is_header_line("COMMISSION"));
        assert!(!is_header_line(""));
        assert!(!is_header_line(&format!("fee {}", "x".repeat(200))));
        assert!(!is_header_line("Stocks: EUR 7.50"));
    }
}
