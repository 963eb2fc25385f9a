//! Heading-aware text chunker.
//!
//! Splits a source's raw corpus into [`ChunkPiece`]s that respect a
//! configurable target size. The chunker streams the text line by line,
//! tracking the most recent heading so every chunk can carry the section
//! it belongs to. Oversized buffers are split at a paragraph boundary,
//! falling back to a sentence boundary, falling back to a hard cut, to
//! avoid severing sentences when avoidable.
//!
//! The algorithm is single-pass and deterministic: the same input always
//! yields the same chunk boundaries.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::ChunkPiece;

static MD_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());
static ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(artikel|art\.)\s+\d+").unwrap());
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(hoofdstuk|afdeling|boek|titel|paragraaf|section|chapter|§)\s+[0-9ivxlc]")
        .unwrap()
});
static BRACKETED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^\]]{2,100}\]$").unwrap());
static ECLI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ECLI:[A-Z]{2}:[A-Z0-9]+:\d{4}:[A-Z0-9.]+").unwrap());

/// Fraction of the target size the buffer must reach before a new heading
/// forces a flush. Below this, closely-spaced headings merge into one chunk.
const HEADING_FLUSH_NUM: usize = 3;
const HEADING_FLUSH_DEN: usize = 10;

/// Maximum length for the all-caps heading heuristic.
const ALL_CAPS_MAX_LEN: usize = 80;

/// Classify a line as a heading.
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    if MD_HEADING_RE.is_match(line)
        || ARTICLE_RE.is_match(line)
        || SECTION_RE.is_match(line)
        || BRACKETED_RE.is_match(line)
        || ECLI_RE.is_match(line)
    {
        return true;
    }

    // Short all-caps lines are section titles in most legal texts.
    line.len() <= ALL_CAPS_MAX_LEN
        && line.chars().any(|c| c.is_alphabetic())
        && line == line.to_uppercase()
}

/// Turn a heading line into a chunk label.
fn heading_label(line: &str) -> String {
    line.trim().trim_start_matches('#').trim().to_string()
}

/// Split text into heading-labeled chunks, respecting `target_chars`.
///
/// No characters of the input are dropped: concatenating all chunk
/// contents in order reproduces the text modulo whitespace trimmed at
/// split points.
pub fn chunk_text(text: &str, target_chars: usize) -> Vec<ChunkPiece> {
    let flush_threshold = target_chars * HEADING_FLUSH_NUM / HEADING_FLUSH_DEN;

    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut heading: Option<String> = None;

    for line in text.lines() {
        if is_heading(line) && buf.len() >= flush_threshold {
            flush(&mut pieces, &heading, &buf);
            heading = Some(heading_label(line));
            buf.clear();
        }
        // Below the threshold the heading line is merely appended, so the
        // chunk keeps its previous label and stays above a useful size.

        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);

        while buf.len() >= target_chars {
            let split_at = find_split_point(&buf, target_chars);
            let (head, tail) = buf.split_at(split_at);
            flush(&mut pieces, &heading, head);
            buf = tail.trim_start().to_string();
        }
    }

    if !buf.trim().is_empty() {
        flush(&mut pieces, &heading, &buf);
    }

    pieces
}

fn flush(pieces: &mut Vec<ChunkPiece>, heading: &Option<String>, content: &str) {
    let content = content.trim();
    if content.is_empty() {
        return;
    }
    pieces.push(ChunkPiece {
        heading: heading.clone(),
        content: content.to_string(),
    });
}

/// Pick a split point at or before `target`: nearest paragraph break, then
/// nearest sentence break, then a hard cut at the target itself.
///
/// Also used by the summarization windower, which applies the same
/// preference order at a much coarser scale.
pub(crate) fn find_split_point(buf: &str, target: usize) -> usize {
    let window_end = floor_char_boundary(buf, target.min(buf.len()));
    let window = &buf[..window_end];

    if let Some(pos) = window.rfind("\n\n") {
        if pos > 0 {
            return pos + 2;
        }
    }

    if let Some(pos) = window.rfind(". ").or_else(|| window.rfind(".\n")) {
        if pos > 0 {
            return pos + 2;
        }
    }

    window_end.max(1)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn heading_classification() {
        assert!(is_heading("# Introduction"));
        assert!(is_heading("## Nadere regels"));
        assert!(is_heading("Artikel 12"));
        assert!(is_heading("art. 3 lid 2"));
        assert!(is_heading("Hoofdstuk 4"));
        assert!(is_heading("Chapter 2"));
        assert!(is_heading("ALGEMENE BEPALINGEN"));
        assert!(is_heading("[Samenvatting]"));
        assert!(is_heading("ECLI:NL:HR:2023:1234"));

        assert!(!is_heading(""));
        assert!(!is_heading("De rechtbank overweegt als volgt."));
        assert!(!is_heading("#hashtag zonder spatie"));
        // Too long for the all-caps heuristic
        let long_caps = "A".repeat(120);
        assert!(!is_heading(&long_caps));
    }

    #[test]
    fn small_text_single_chunk() {
        let pieces = chunk_text("Hello, world!", 1000);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].content, "Hello, world!");
        assert_eq!(pieces[0].heading, None);
    }

    #[test]
    fn empty_text_no_chunks() {
        assert!(chunk_text("", 1000).is_empty());
        assert!(chunk_text("   \n\n  ", 1000).is_empty());
    }

    #[test]
    fn deterministic() {
        let text = "Artikel 1\nEerste bepaling over de zaak.\n\nArtikel 2\nTweede bepaling.";
        let a = chunk_text(text, 50);
        let b = chunk_text(text, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn size_bound_holds_for_all_chunks() {
        let paragraph = "Dit is een zin die ergens over gaat. ".repeat(20);
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let target = 400;
        let pieces = chunk_text(&text, target);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(
                piece.content.len() <= target,
                "chunk of {} chars exceeds target {}",
                piece.content.len(),
                target
            );
        }
    }

    #[test]
    fn reconstruction_loses_no_characters() {
        let text = "# Kop\nEerste alinea met wat inhoud.\n\nTweede alinea. Nog een zin hier.\n\nArtikel 5\nDe bepaling zelf, met een behoorlijke hoeveelheid tekst zodat er gesplitst moet worden. "
            .repeat(8);
        let pieces = chunk_text(&text, 200);
        let rebuilt: String = pieces
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(squash(&text), squash(&rebuilt));
    }

    #[test]
    fn chunk_order_matches_document_order() {
        let text = (0..40)
            .map(|i| format!("Alinea nummer {} met nog wat opvulling erachter.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let pieces = chunk_text(&text, 150);
        let positions: Vec<usize> = pieces
            .iter()
            .map(|p| {
                let probe = p.content.lines().next().unwrap();
                text.find(probe).unwrap()
            })
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn heading_flush_labels_chunks() {
        let body = "Inhoud van het artikel. ".repeat(10); // ~240 chars
        let text = format!("Artikel 1\n{}\nArtikel 2\n{}", body, body);
        let pieces = chunk_text(&text, 500);
        assert!(pieces.len() >= 2);
        // The first flush is triggered by "Artikel 2" and is tagged with the
        // heading that was current while the buffer accumulated.
        assert_eq!(pieces[0].heading, None);
        assert!(pieces[0].content.starts_with("Artikel 1"));
        assert_eq!(pieces[1].heading.as_deref(), Some("Artikel 2"));
    }

    #[test]
    fn closely_spaced_headings_merge() {
        // Headings arriving while the buffer is under 30% of target are
        // appended instead of flushed.
        let text = "Artikel 1\nKort.\nArtikel 2\nOok kort.\nArtikel 3\nNog korter.";
        let pieces = chunk_text(text, 1000);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].content.contains("Artikel 1"));
        assert!(pieces[0].content.contains("Artikel 3"));
    }

    #[test]
    fn prefers_paragraph_break_over_hard_cut() {
        let first = "Eerste alinea die behoorlijk wat tekst bevat om mee te werken.";
        let second = "Tweede alinea die er direct achteraan komt met nog meer tekst.";
        let text = format!("{}\n\n{}", first, second);
        let pieces = chunk_text(&text, first.len() + 10);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].content, first);
        assert_eq!(pieces[1].content, second);
    }

    #[test]
    fn multibyte_input_never_panics() {
        let text = "Overweging één: de éénduidige uitleg van artikel 6:162 BW. ".repeat(30);
        let pieces = chunk_text(&text, 100);
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert!(piece.content.len() <= 100 + 4);
        }
    }
}
