//! Article link discovery.
//!
//! Collects every anchor on the loaded page, then runs a pure filter chain
//! over them: same-host only, no static assets, no navigation chrome, no
//! fragment jumps. What survives is kept when its path looks like content
//! or its anchor text is long enough to be a real title. When the primary
//! pass comes up nearly empty, a secondary pass widens to anchors inside
//! the best-guess main-content container with a lower text bar — some
//! sites hide articles behind opaque ID URLs.

use tracing::warn;
use url::Url;

use crate::auth::host_matches;
use crate::browser::PageControl;
use crate::models::DiscoveredLink;

/// Static-asset extensions that are never articles.
const ASSET_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".woff", ".woff2",
    ".ttf", ".eot", ".pdf", ".zip", ".rar", ".gz", ".tar",
];

/// URL/text markers for navigation, account, and cart links.
const NAV_MARKERS: &[&str] = &[
    "login",
    "logout",
    "inloggen",
    "uitloggen",
    "account",
    "cart",
    "winkelwagen",
    "checkout",
    "contact",
    "privacy",
    "cookie",
    "voorwaarden",
    "terms",
    "sitemap",
    "zoeken",
    "search",
];

/// Path substrings that indicate content pages.
const CONTENT_PATH_MARKERS: &[&str] = &[
    "document",
    "article",
    "artikel",
    "uitspraak",
    "ruling",
    "publicat",
    "annotat",
    "jurisprudentie",
    "ecli",
    "nieuws",
];

/// Anchor text length that makes an opaque URL acceptable anyway.
const MIN_TEXT_LEN: usize = 30;
/// Lower bar for the widened secondary pass.
const MIN_TEXT_LEN_SECONDARY: usize = 15;
/// Below this many primary results the secondary pass kicks in.
const SECONDARY_PASS_THRESHOLD: usize = 5;

/// An anchor as collected from the page, href already made absolute.
#[derive(Debug, Clone)]
pub struct AnchorCandidate {
    pub url: String,
    pub text: String,
}

/// Discover candidate article links on the loaded page.
///
/// Returns at most `max_links` links, deduplicated by exact URL, in
/// document order. Collection failures degrade to an empty result.
pub async fn discover_links(
    page: &dyn PageControl,
    host: &str,
    max_links: usize,
) -> Vec<DiscoveredLink> {
    let js = r#"(() => {
        const collect = (root) => Array.from(root.querySelectorAll('a[href]'))
            .filter(a => {
                const raw = a.getAttribute('href') || '';
                return raw !== '' && !raw.startsWith('#');
            })
            .map(a => ({ url: a.href, text: (a.innerText || '').trim() }));
        const main = document.querySelector('main, article, #content, .content, #main')
            || document.body;
        return { all: collect(document), main: collect(main) };
    })()"#;

    let collected = match page.eval_json(js).await {
        Ok(value) => value,
        Err(e) => {
            warn!("link collection failed: {}", e);
            return Vec::new();
        }
    };

    let all = parse_anchors(&collected["all"]);
    let main = parse_anchors(&collected["main"]);

    filter_anchors(&all, &main, host, max_links)
}

fn parse_anchors(value: &serde_json::Value) -> Vec<AnchorCandidate> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(AnchorCandidate {
                        url: item["url"].as_str()?.to_string(),
                        text: item["text"].as_str().unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The pure filter chain over collected anchors.
pub fn filter_anchors(
    all: &[AnchorCandidate],
    main: &[AnchorCandidate],
    host: &str,
    max_links: usize,
) -> Vec<DiscoveredLink> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for anchor in all {
        if links.len() >= max_links {
            break;
        }
        if accepts(anchor, host, MIN_TEXT_LEN) {
            push_deduped(&mut links, &mut seen, anchor);
        }
    }

    // Widen the search when the primary pass found almost nothing.
    if links.len() < SECONDARY_PASS_THRESHOLD {
        for anchor in main {
            if links.len() >= max_links {
                break;
            }
            if passes_rejection(anchor, host) && anchor.text.len() >= MIN_TEXT_LEN_SECONDARY {
                push_deduped(&mut links, &mut seen, anchor);
            }
        }
    }

    links
}

fn push_deduped(
    links: &mut Vec<DiscoveredLink>,
    seen: &mut std::collections::HashSet<String>,
    anchor: &AnchorCandidate,
) {
    let url = strip_fragment(&anchor.url);
    if seen.insert(url.clone()) {
        links.push(DiscoveredLink {
            url,
            title: anchor.text.clone(),
        });
    }
}

/// Rejection rules shared by both passes.
fn passes_rejection(anchor: &AnchorCandidate, host: &str) -> bool {
    let Ok(parsed) = Url::parse(&anchor.url) else {
        return false;
    };
    let Some(link_host) = parsed.host_str() else {
        return false;
    };
    if !host_matches(&link_host.to_lowercase(), host) {
        return false;
    }

    let path = parsed.path().to_lowercase();
    if ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    let url_lower = anchor.url.to_lowercase();
    let text_lower = anchor.text.to_lowercase();
    if NAV_MARKERS
        .iter()
        .any(|m| url_lower.contains(m) || text_lower == *m)
    {
        return false;
    }

    // Fragment-only links point back into the same page.
    if parsed.fragment().is_some() && path == "/" && parsed.query().is_none() {
        return false;
    }

    true
}

/// Primary acceptance: rejection rules plus content-path or long-text.
fn accepts(anchor: &AnchorCandidate, host: &str, min_text_len: usize) -> bool {
    if !passes_rejection(anchor, host) {
        return false;
    }

    let path = Url::parse(&anchor.url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_default();

    CONTENT_PATH_MARKERS.iter().any(|m| path.contains(m)) || anchor.text.len() >= min_text_len
}

fn strip_fragment(url: &str) -> String {
    match url.split_once('#') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(url: &str, text: &str) -> AnchorCandidate {
        AnchorCandidate {
            url: url.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn rejects_foreign_hosts() {
        let anchors = vec![anchor("https://elders.nl/artikel/1", "Lange titel over een uitspraak")];
        let links = filter_anchors(&anchors, &[], "bron.nl", 20);
        assert!(links.is_empty());
    }

    #[test]
    fn rejects_assets_and_nav() {
        let anchors = vec![
            anchor("https://bron.nl/style/main.css", "stylesheet met lange naam erbij"),
            anchor("https://bron.nl/download/rapport.pdf", "Jaarrapport 2024 in PDF-vorm"),
            anchor("https://bron.nl/account/settings", "Mijn accountinstellingen hier"),
            anchor("https://bron.nl/winkelwagen", "Bekijk de inhoud van uw winkelwagen"),
        ];
        let links = filter_anchors(&anchors, &[], "bron.nl", 20);
        assert!(links.is_empty());
    }

    #[test]
    fn accepts_content_paths_and_long_text() {
        let anchors = vec![
            anchor("https://bron.nl/uitspraak/2023-441", "kort"),
            anchor("https://bron.nl/p/9f3a", "Hoge Raad verduidelijkt de maatstaf voor bestuurdersaansprakelijkheid"),
            anchor("https://bron.nl/p/9f3b", "kort"),
        ];
        let links = filter_anchors(&anchors, &[], "bron.nl", 20);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://bron.nl/uitspraak/2023-441");
        assert_eq!(links[1].url, "https://bron.nl/p/9f3a");
    }

    #[test]
    fn dedups_exact_urls() {
        let anchors = vec![
            anchor("https://bron.nl/artikel/1", "Eerste vermelding van dit artikel"),
            anchor("https://bron.nl/artikel/1", "Tweede vermelding van hetzelfde artikel"),
            anchor("https://bron.nl/artikel/1#reacties", "Nog een vermelding met fragment"),
        ];
        let links = filter_anchors(&anchors, &[], "bron.nl", 20);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Eerste vermelding van dit artikel");
    }

    #[test]
    fn caps_at_max_links() {
        let anchors: Vec<_> = (0..50)
            .map(|i| anchor(&format!("https://bron.nl/artikel/{}", i), "Een voldoende lange titel"))
            .collect();
        let links = filter_anchors(&anchors, &[], "bron.nl", 20);
        assert_eq!(links.len(), 20);
        // Document order preserved.
        assert_eq!(links[0].url, "https://bron.nl/artikel/0");
        assert_eq!(links[19].url, "https://bron.nl/artikel/19");
    }

    #[test]
    fn secondary_pass_widens_when_primary_thin() {
        let all = vec![anchor("https://bron.nl/artikel/1", "kort")];
        let main = vec![
            anchor("https://bron.nl/d/1a2b", "Opaque maar echt"),
            anchor("https://bron.nl/d/3c4d", "kort"),
        ];
        let links = filter_anchors(&all, &main, "bron.nl", 20);
        // Primary keeps the content path; secondary adds the 15+ char text.
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].url, "https://bron.nl/d/1a2b");
    }

    #[test]
    fn secondary_pass_skipped_when_primary_sufficient() {
        let all: Vec<_> = (0..6)
            .map(|i| anchor(&format!("https://bron.nl/artikel/{}", i), "Voldoende lange titel hier"))
            .collect();
        let main = vec![anchor("https://bron.nl/d/1a2b", "Opaque maar echt")];
        let links = filter_anchors(&all, &main, "bron.nl", 20);
        assert_eq!(links.len(), 6);
    }
}
