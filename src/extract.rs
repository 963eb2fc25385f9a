//! Main-content extraction from a loaded page.
//!
//! Walks a priority-ordered list of common content-container selectors and
//! takes the first whose text is substantial, falling back to the full
//! body. Boilerplate subtrees (navigation, footers, ads, cookie notices)
//! are removed from a clone before text extraction so the corpus stays
//! clean. The caller decides what counts as too thin; this module returns
//! whatever it found, empty-safe.

use tracing::warn;

use crate::browser::PageControl;

/// Content container candidates, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    "#content",
    ".content",
    "#main",
    ".article",
    ".post",
    ".entry-content",
];

/// Minimum text length for a container to win over the body fallback.
const MIN_CONTAINER_CHARS: usize = 200;

/// Extract `(title, text)` from the loaded page.
///
/// Both values may be empty when the page has no usable content; the
/// extraction itself never fails the run.
pub async fn extract_content(page: &dyn PageControl) -> (String, String) {
    let selectors_json =
        serde_json::to_string(CONTENT_SELECTORS).unwrap_or_else(|_| "[]".to_string());
    let js = format!(
        r#"(() => {{
            const SELECTORS = {selectors};
            const BOILERPLATE = 'script, style, nav, footer, header, aside, ' +
                '.sidebar, .menu, .ad, .ads, .advertisement, [class*="cookie"]';
            const textOf = (el) => {{
                const clone = el.cloneNode(true);
                clone.querySelectorAll(BOILERPLATE).forEach(n => n.remove());
                return clone.textContent || '';
            }};
            let text = null;
            for (const sel of SELECTORS) {{
                const el = document.querySelector(sel);
                if (!el) continue;
                const t = textOf(el);
                if (t.trim().length >= {min_chars}) {{ text = t; break; }}
            }}
            if (text === null && document.body) text = textOf(document.body);
            const h1 = document.querySelector('h1');
            const title = (document.title || (h1 ? h1.innerText : '') || '').trim();
            return {{ title: title, text: text || '' }};
        }})()"#,
        selectors = selectors_json,
        min_chars = MIN_CONTAINER_CHARS,
    );

    let value = match page.eval_json(&js).await {
        Ok(value) => value,
        Err(e) => {
            warn!("content extraction failed: {}", e);
            return (String::new(), String::new());
        }
    };

    let title = value["title"].as_str().unwrap_or("").to_string();
    let text = collapse_whitespace(value["text"].as_str().unwrap_or(""));
    (title, text)
}

/// Collapse runs of spaces and tabs, trim line ends, and squeeze blank-line
/// runs down to a single paragraph break. Line structure is preserved so
/// the chunker can still see headings.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;

    for line in text.lines() {
        let mut collapsed = String::with_capacity(line.len());
        let mut last_was_space = false;
        for c in line.trim().chars() {
            if c == ' ' || c == '\t' {
                if !last_was_space {
                    collapsed.push(' ');
                }
                last_was_space = true;
            } else {
                collapsed.push(c);
                last_was_space = false;
            }
        }

        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }

        if !out.is_empty() {
            if blank_run > 0 {
                out.push_str("\n\n");
            } else {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&collapsed);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_space_runs() {
        assert_eq!(
            collapse_whitespace("een   twee\t\tdrie"),
            "een twee drie"
        );
    }

    #[test]
    fn preserves_single_line_breaks() {
        assert_eq!(
            collapse_whitespace("regel een\nregel twee"),
            "regel een\nregel twee"
        );
    }

    #[test]
    fn squeezes_blank_line_runs() {
        assert_eq!(
            collapse_whitespace("alinea een\n\n\n\n\nalinea twee"),
            "alinea een\n\nalinea twee"
        );
    }

    #[test]
    fn trims_line_edges_and_outer_blanks() {
        assert_eq!(
            collapse_whitespace("\n\n   ingesprongen regel   \n\n"),
            "ingesprongen regel"
        );
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace(" \n \t \n "), "");
    }
}
