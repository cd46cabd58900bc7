//! The retrieval funnel: ordered strategies, filtering, and ranking
//!
//! Strategies run in configured order; the first strategy whose candidates
//! survive both filters wins. Validation is supplied as values (the
//! [`DocumentFilter`] trait) so retrieval never depends on the extraction
//! stack directly.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use docstore::{Document, attrs};

use super::crawl::{LinkScorer, WebsiteCrawler};
use super::fetch::DocumentLoader;
use super::known::load_known_docs;
use super::search::SearchEngineChain;
use crate::config::ConfigError;
use crate::services::base::ServiceError;
use crate::text::TextSplitter;
use crate::validation::content::Heuristic;

/// A retrieval strategy, tried in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    SearchEngine,
    CrawlWebsite,
    KnownDocs,
}

impl FromStr for RetrievalStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search-engine" => Ok(Self::SearchEngine),
            "crawl-website" => Ok(Self::CrawlWebsite),
            "known-docs" => Ok(Self::KnownDocs),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// An async validation step applied to candidate documents. Implemented
/// by the location and content validators; retrieval only sees the trait.
#[async_trait]
pub trait DocumentFilter: Sync {
    async fn keep(&self, doc: &mut Document) -> Result<bool, ServiceError>;
}

/// Apply a filter to every document concurrently, preserving relative
/// order of survivors.
pub async fn filter_documents(
    docs: Vec<Document>,
    filter: &dyn DocumentFilter,
) -> Result<Vec<Document>, ServiceError> {
    let checks = docs.into_iter().map(|mut doc| async move {
        let keep = filter.keep(&mut doc).await?;
        Ok::<_, ServiceError>((doc, keep))
    });
    let outcomes = join_all(checks).await;
    let mut kept = Vec::new();
    for outcome in outcomes {
        let (doc, keep) = outcome?;
        if keep {
            kept.push(doc);
        }
    }
    Ok(kept)
}

/// Sort documents best-first by
/// `(year, is_pdf, jurisdiction_score, name_score, -text_length, month, day)`.
pub fn rank_documents(docs: &mut [Document]) {
    docs.sort_by(|a, b| sorting_key_cmp(b, a));
}

fn sorting_key_cmp(a: &Document, b: &Document) -> std::cmp::Ordering {
    let (a_year, a_month, a_day) = a.date();
    let (b_year, b_month, b_day) = b.date();
    a_year
        .unwrap_or(-1)
        .cmp(&b_year.unwrap_or(-1))
        .then_with(|| a.is_pdf().cmp(&b.is_pdf()))
        .then_with(|| {
            score(a, attrs::JURISDICTION_SCORE).total_cmp(&score(b, attrs::JURISDICTION_SCORE))
        })
        .then_with(|| score(a, attrs::NAME_SCORE).total_cmp(&score(b, attrs::NAME_SCORE)))
        .then_with(|| (b.text_len() as i64).cmp(&(a.text_len() as i64)))
        .then_with(|| a_month.unwrap_or(-1).cmp(&b_month.unwrap_or(-1)))
        .then_with(|| a_day.unwrap_or(-1).cmp(&b_day.unwrap_or(-1)))
}

fn score(doc: &Document, key: &str) -> f64 {
    doc.attr_f64(key).unwrap_or(0.0)
}

/// Everything one jurisdiction's retrieval needs.
pub struct RetrievalPlan<'a> {
    pub strategies: &'a [RetrievalStrategy],
    pub engines: &'a SearchEngineChain,
    /// Queries already formatted with the jurisdiction's full name
    pub queries: Vec<String>,
    pub num_urls: usize,
    pub loader: &'a DocumentLoader,
    pub splitter: &'a TextSplitter,
    /// Jurisdiction website, when the reference knows one
    pub website: Option<String>,
    pub crawl_max_pages: usize,
    pub known_docs: Vec<PathBuf>,
    pub heuristic: &'static Heuristic,
    /// Keyword the crawler's link scorer keys on (e.g. "wind")
    pub tech_keyword: &'a str,
}

impl RetrievalPlan<'_> {
    /// Run strategies in order; the first one whose candidates survive the
    /// location and content filters yields the ranked result list.
    pub async fn run(
        &self,
        location_filter: &dyn DocumentFilter,
        content_filter: &dyn DocumentFilter,
    ) -> Result<Vec<Document>, ServiceError> {
        for strategy in self.strategies {
            let candidates = match strategy {
                RetrievalStrategy::SearchEngine => self.from_search().await?,
                RetrievalStrategy::CrawlWebsite => self.from_crawl().await?,
                RetrievalStrategy::KnownDocs => {
                    load_known_docs(&self.known_docs, self.splitter).await?
                }
            };
            if candidates.is_empty() {
                debug!(?strategy, "strategy produced no candidates");
                continue;
            }

            let located = filter_documents(candidates, location_filter).await?;
            debug!(?strategy, survivors = located.len(), "location filter done");
            let mut validated = filter_documents(located, content_filter).await?;
            info!(
                ?strategy,
                survivors = validated.len(),
                "content filter done"
            );
            if !validated.is_empty() {
                rank_documents(&mut validated);
                return Ok(validated);
            }
        }
        Ok(Vec::new())
    }

    async fn from_search(&self) -> Result<Vec<Document>, ServiceError> {
        let mut urls: Vec<String> = Vec::new();
        for query in &self.queries {
            for url in self.engines.search(query, self.num_urls).await {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
            if urls.len() >= self.num_urls {
                break;
            }
        }
        urls.truncate(self.num_urls);
        self.loader.fetch_all(&urls).await
    }

    async fn from_crawl(&self) -> Result<Vec<Document>, ServiceError> {
        let Some(website) = &self.website else {
            return Ok(Vec::new());
        };
        let scorer = LinkScorer::for_ordinances(self.tech_keyword);
        let crawler = WebsiteCrawler::new(self.loader, scorer, self.crawl_max_pages);
        let heuristic = self.heuristic;
        crawler
            .crawl(
                website,
                |doc| heuristic.check(&doc.text()),
                |found| found.len() >= 2,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeepAll;

    #[async_trait]
    impl DocumentFilter for KeepAll {
        async fn keep(&self, _doc: &mut Document) -> Result<bool, ServiceError> {
            Ok(true)
        }
    }

    struct KeepMarked;

    #[async_trait]
    impl DocumentFilter for KeepMarked {
        async fn keep(&self, doc: &mut Document) -> Result<bool, ServiceError> {
            Ok(doc.text().contains("keep"))
        }
    }

    fn doc(text: &str) -> Document {
        Document::from_text(text)
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "search-engine".parse::<RetrievalStrategy>().expect("parse"),
            RetrievalStrategy::SearchEngine
        );
        assert!("google-maps".parse::<RetrievalStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_filter_preserves_order() {
        let docs = vec![doc("keep one"), doc("drop"), doc("keep two")];
        let kept = filter_documents(docs, &KeepMarked).await.expect("filter");
        assert_eq!(kept.len(), 2);
        assert!(kept[0].text().contains("one"));
        assert!(kept[1].text().contains("two"));
    }

    #[tokio::test]
    async fn test_filter_keep_all() {
        let docs = vec![doc("a"), doc("b")];
        let kept = filter_documents(docs, &KeepAll).await.expect("filter");
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_ranking_prefers_recent_pdfs() {
        let mut newest = doc("short");
        newest.set_date(Some(2023), Some(1), Some(1));
        newest.set_attr(attrs::IS_PDF, true);

        let mut older = doc("short");
        older.set_date(Some(2019), Some(6), Some(1));
        older.set_attr(attrs::IS_PDF, true);

        let mut html_same_year = doc("short");
        html_same_year.set_date(Some(2023), Some(1), Some(1));
        html_same_year.set_attr(attrs::IS_PDF, false);

        let mut docs = vec![older, html_same_year, newest];
        rank_documents(&mut docs);
        assert_eq!(docs[0].date().0, Some(2023));
        assert!(docs[0].is_pdf());
        assert!(!docs[1].is_pdf());
        assert_eq!(docs[2].date().0, Some(2019));
    }

    #[test]
    fn test_ranking_prefers_shorter_text_on_ties() {
        let mut long = doc(&"long text ".repeat(100));
        long.set_date(Some(2020), Some(1), Some(1));
        let mut short = doc("short text");
        short.set_date(Some(2020), Some(1), Some(1));

        let mut docs = vec![long, short];
        rank_documents(&mut docs);
        assert_eq!(docs[0].text(), "short text");
    }

    #[test]
    fn test_ranking_uses_scores() {
        let mut good = doc("same");
        good.set_attr(attrs::JURISDICTION_SCORE, 0.9);
        let mut bad = doc("same");
        bad.set_attr(attrs::JURISDICTION_SCORE, 0.2);

        let mut docs = vec![bad, good];
        rank_documents(&mut docs);
        assert_eq!(docs[0].attr_f64(attrs::JURISDICTION_SCORE), Some(0.9));
    }
}
