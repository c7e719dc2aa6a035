//! Line-level relevance filtering before a chunk is sent to the LLM.

use std::borrow::Cow;

const PRIMARY_KEYWORDS: [&str; 7] = [
    "fee",
    "commission",
    "tarif",
    "kosten",
    "charges",
    "pricing",
    "courtage",
];
const CURRENCY_MARKERS: [&str; 5] = ["%", "€", "$", "eur", "usd"];
const MARKET_KEYWORDS: [&str; 8] = [
    "euronext",
    "brussels",
    "bruxelles",
    "paris",
    "amsterdam",
    "xbru",
    "nyse",
    "nasdaq",
];

const PRIMARY_WEIGHT: u32 = 10;
const CURRENCY_WEIGHT: u32 = 5;
const MARKET_WEIGHT: u32 = 3;

/// Relevance score of a single line.
#[must_use]
pub fn score_line(line: &str) -> u32 {
    let lower = line.to_lowercase();
    let hits = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count() as u32;

    hits(&PRIMARY_KEYWORDS) * PRIMARY_WEIGHT
        + hits(&CURRENCY_MARKERS) * CURRENCY_WEIGHT
        + hits(&MARKET_KEYWORDS) * MARKET_WEIGHT
}

/// Keep the `max_lines` most relevant lines of `chunk`.
///
/// Selected lines are returned in their original order. A chunk with at
/// most `max_lines` lines is returned unchanged.
#[must_use]
pub fn focus(chunk: &str, max_lines: usize) -> Cow<'_, str> {
    let lines: Vec<&str> = chunk.lines().collect();
    if lines.len() <= max_lines {
        return Cow::Borrowed(chunk);
    }

    let mut ranked: Vec<(usize, u32)> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| (i, score_line(line)))
        .collect();
    // Stable: equal scores keep document order
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut keep: Vec<usize> = ranked.into_iter().take(max_lines).map(|(i, _)| i).collect();
    keep.sort_unstable();

    Cow::Owned(
        keep.into_iter()
            .map(|i| lines[i])
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
