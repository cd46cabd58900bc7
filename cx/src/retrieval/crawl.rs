//! Score-guided website crawler
//!
//! Best-first BFS over a jurisdiction website: links are scored by a
//! keyword-weighted function, links under the score floor are dropped,
//! and the crawl stops at the page budget or when the caller-supplied
//! "found enough" callback fires.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use scraper::{Html, Selector};
use tracing::debug;

use docstore::Document;

use super::fetch::DocumentLoader;
use crate::services::base::ServiceError;

/// Keyword-weighted link scorer.
pub struct LinkScorer {
    keywords: Vec<(String, f64)>,
}

impl LinkScorer {
    pub fn new(keywords: Vec<(String, f64)>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(kw, w)| (kw.to_lowercase(), w))
                .collect(),
        }
    }

    /// Default scorer tuned for zoning/ordinance pages
    pub fn for_ordinances(tech_keyword: &str) -> Self {
        Self::new(vec![
            (tech_keyword.to_string(), 6.0),
            ("ordinance".to_string(), 5.0),
            ("zoning".to_string(), 4.0),
            ("code".to_string(), 2.0),
            ("planning".to_string(), 2.0),
            ("regulation".to_string(), 2.0),
            ("energy".to_string(), 1.0),
            ("pdf".to_string(), 1.0),
        ])
    }

    /// Score a link from its URL and anchor text
    pub fn score(&self, url: &str, anchor_text: &str) -> f64 {
        let haystack = format!("{} {}", url.to_lowercase(), anchor_text.to_lowercase());
        self.keywords
            .iter()
            .filter(|(kw, _)| haystack.contains(kw))
            .map(|(_, w)| w)
            .sum()
    }
}

#[derive(Debug)]
struct ScoredLink {
    score: f64,
    depth: usize,
    url: String,
}

impl PartialEq for ScoredLink {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.url == other.url
    }
}

impl Eq for ScoredLink {}

impl Ord for ScoredLink {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.depth.cmp(&self.depth))
    }
}

impl PartialOrd for ScoredLink {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first crawler bounded by a page budget.
pub struct WebsiteCrawler<'a> {
    loader: &'a DocumentLoader,
    scorer: LinkScorer,
    max_pages: usize,
    score_floor: f64,
}

impl<'a> WebsiteCrawler<'a> {
    pub fn new(loader: &'a DocumentLoader, scorer: LinkScorer, max_pages: usize) -> Self {
        Self {
            loader,
            scorer,
            max_pages,
            score_floor: 0.0,
        }
    }

    pub fn with_score_floor(mut self, floor: f64) -> Self {
        self.score_floor = floor;
        self
    }

    /// Crawl from `start_url`, collecting documents for which `keep`
    /// returns true. Stops at the page budget or once `found_enough`
    /// fires on the collected set.
    pub async fn crawl(
        &self,
        start_url: &str,
        keep: impl Fn(&Document) -> bool,
        found_enough: impl Fn(&[Document]) -> bool,
    ) -> Result<Vec<Document>, ServiceError> {
        let mut frontier = BinaryHeap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        frontier.push(ScoredLink {
            score: f64::MAX,
            depth: 0,
            url: start_url.to_string(),
        });

        let mut pages_fetched = 0;
        while let Some(link) = frontier.pop() {
            if pages_fetched >= self.max_pages {
                debug!(max_pages = self.max_pages, "crawl page budget exhausted");
                break;
            }
            if !visited.insert(normalize_url(&link.url)) {
                continue;
            }
            pages_fetched += 1;

            let Some((bytes, content_type, last_modified)) =
                self.loader.fetch_raw(&link.url).await?
            else {
                continue;
            };

            let is_html = content_type.contains("text/html")
                || (!content_type.contains("pdf") && !bytes.starts_with(b"%PDF"));
            if is_html {
                let html = String::from_utf8_lossy(&bytes).into_owned();
                for (href, anchor) in extract_links(&html, &link.url) {
                    if visited.contains(&normalize_url(&href)) {
                        continue;
                    }
                    let score = self.scorer.score(&href, &anchor);
                    if score <= self.score_floor {
                        continue;
                    }
                    frontier.push(ScoredLink {
                        score,
                        depth: link.depth + 1,
                        url: href,
                    });
                }
            }

            let Some(doc) = self
                .loader
                .document_from_bytes(&link.url, bytes, &content_type, last_modified)
                .await?
            else {
                continue;
            };
            if keep(&doc) {
                debug!(url = %link.url, "crawl kept document");
                out.push(doc);
                if found_enough(&out) {
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Extract `(absolute url, anchor text)` pairs from a page.
pub fn extract_links(html: &str, base_url: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let anchor = a.text().collect::<Vec<_>>().join(" ");
            absolutize(href, base_url).map(|url| (url, anchor))
        })
        .collect()
}

fn absolutize(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let (scheme, rest) = base_url.split_once("://")?;
    let host = rest.split('/').next()?;
    if let Some(tail) = href.strip_prefix("//") {
        return Some(format!("{scheme}://{tail}"));
    }
    if href.starts_with('/') {
        return Some(format!("{scheme}://{host}{href}"));
    }
    let base_dir = match base_url.rfind('/') {
        Some(idx) if idx > scheme.len() + 2 => &base_url[..idx],
        _ => base_url,
    };
    Some(format!("{base_dir}/{href}"))
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scorer_weighs_keywords() {
        let scorer = LinkScorer::for_ordinances("wind");
        let high = scorer.score("https://county.gov/zoning/wind-ordinance.pdf", "Wind Ordinance");
        let low = scorer.score("https://county.gov/parks", "Parks and Rec");
        assert!(high > low);
        assert_eq!(low, 0.0);
    }

    #[test]
    fn test_scored_link_ordering_prefers_high_scores() {
        let mut heap = BinaryHeap::new();
        heap.push(ScoredLink {
            score: 1.0,
            depth: 0,
            url: "low".to_string(),
        });
        heap.push(ScoredLink {
            score: 9.0,
            depth: 3,
            url: "high".to_string(),
        });
        assert_eq!(heap.pop().expect("link").url, "high");
    }

    #[test]
    fn test_extract_links_absolutizes() {
        let html = r##"
            <a href="/docs/ord.pdf">Ordinance</a>
            <a href="zoning.html">Zoning</a>
            <a href="https://other.gov/code">Code</a>
            <a href="#section">anchor</a>
            <a href="mailto:clerk@county.gov">mail</a>
        "##;
        let links = extract_links(html, "https://county.gov/planning/index.html");
        let urls: Vec<&str> = links.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://county.gov/docs/ord.pdf",
                "https://county.gov/planning/zoning.html",
                "https://other.gov/code",
            ]
        );
        assert_eq!(links[0].1.trim(), "Ordinance");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://County.gov/Zoning/"),
            "https://county.gov/zoning"
        );
    }
}
