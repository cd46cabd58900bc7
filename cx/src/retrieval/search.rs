//! Search engine interface and implementations
//!
//! Engines return candidate URLs for a query. Multiple engines are
//! configured as an ordered fallback chain: the first engine that returns
//! any results wins for that query.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::{ConfigError, SearchConfig};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A web search backend
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return up to `max_results` result URLs for the query.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, String>;
}

fn search_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SEARCH_TIMEOUT)
        .user_agent("Mozilla/5.0 (compatible; ordinance-retrieval)")
        .build()
        .unwrap_or_default()
}

/// Key-less engine scraping the DuckDuckGo HTML endpoint.
pub struct DuckDuckGoSearch {
    http: reqwest::Client,
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self {
            http: search_client(),
        }
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, String> {
        let response = self
            .http
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("duckduckgo returned {}", response.status()));
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(parse_duckduckgo_results(&body, max_results))
    }
}

fn parse_duckduckgo_results(html: &str, max_results: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(decode_result_href)
        .take(max_results)
        .collect()
}

/// DuckDuckGo wraps result URLs in a redirect with a `uddg` parameter.
fn decode_result_href(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        if let Some((_, tail)) = href.split_once("uddg=") {
            let encoded = tail.split('&').next().unwrap_or(tail);
            return Some(percent_decode(encoded));
        }
        return Some(href.to_string());
    }
    if let Some((_, tail)) = href.split_once("uddg=") {
        let encoded = tail.split('&').next().unwrap_or(tail);
        return Some(percent_decode(encoded));
    }
    None
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| u8::from_str_radix(std::str::from_utf8(h).ok()?, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Tavily search API (requires `TAVILY_API_KEY`).
pub struct TavilySearch {
    http: reqwest::Client,
    api_key: String,
}

impl TavilySearch {
    pub fn from_env() -> Option<Self> {
        std::env::var("TAVILY_API_KEY").ok().map(|api_key| Self {
            http: search_client(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchEngine for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, String> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
        });
        let response = self
            .http
            .post("https://api.tavily.com/search")
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("tavily returned {}", response.status()));
        }
        let result: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(result["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r["url"].as_str().map(|u| u.to_string()))
                    .take(max_results)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Brave Search API (requires `BRAVE_API_KEY`).
pub struct BraveSearch {
    http: reqwest::Client,
    api_key: String,
}

impl BraveSearch {
    pub fn from_env() -> Option<Self> {
        std::env::var("BRAVE_API_KEY").ok().map(|api_key| Self {
            http: search_client(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchEngine for BraveSearch {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, String> {
        let response = self
            .http
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("brave returned {}", response.status()));
        }
        let result: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(result["web"]["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r["url"].as_str().map(|u| u.to_string()))
                    .take(max_results)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Ordered engine fallback chain.
pub struct SearchEngineChain {
    engines: Vec<Box<dyn SearchEngine>>,
}

impl SearchEngineChain {
    pub fn new(engines: Vec<Box<dyn SearchEngine>>) -> Self {
        Self { engines }
    }

    /// Query engines in preference order; the first non-empty result set
    /// wins. Engine failures fall through to the next engine.
    pub async fn search(&self, query: &str, max_results: usize) -> Vec<String> {
        for engine in &self.engines {
            match engine.search(query, max_results).await {
                Ok(urls) if !urls.is_empty() => {
                    debug!(engine = engine.name(), %query, n = urls.len(), "search hit");
                    return urls;
                }
                Ok(_) => debug!(engine = engine.name(), %query, "no results"),
                Err(err) => warn!(engine = engine.name(), %err, "search engine failed"),
            }
        }
        Vec::new()
    }
}

/// Build the engine chain from configured names. Unknown names are a
/// configuration error; engines missing their API key are skipped with a
/// warning.
pub fn build_engines(config: &SearchConfig) -> Result<SearchEngineChain, ConfigError> {
    let mut engines: Vec<Box<dyn SearchEngine>> = Vec::new();
    for name in &config.engines {
        match name.as_str() {
            "duckduckgo" => engines.push(Box::new(DuckDuckGoSearch::default())),
            "tavily" => match TavilySearch::from_env() {
                Some(engine) => engines.push(Box::new(engine)),
                None => warn!("TAVILY_API_KEY not set; skipping tavily"),
            },
            "brave" => match BraveSearch::from_env() {
                Some(engine) => engines.push(Box::new(engine)),
                None => warn!("BRAVE_API_KEY not set; skipping brave"),
            },
            other => {
                return Err(ConfigError::Value(format!(
                    "unknown search engine: {other:?}; supported: duckduckgo, tavily, brave"
                )));
            }
        }
    }
    Ok(SearchEngineChain::new(engines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duckduckgo_results() {
        let html = r#"
            <html><body>
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Ford.pdf&rut=abc">Ordinance</a>
            <a class="result__a" href="https://other.example.com/zoning">Zoning</a>
            <a class="other" href="https://ignored.example.com">skip</a>
            </body></html>
        "#;
        let urls = parse_duckduckgo_results(html, 5);
        assert_eq!(
            urls,
            vec![
                "https://example.com/ord.pdf".to_string(),
                "https://other.example.com/zoning".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_respects_max_results() {
        let html = r#"
            <a class="result__a" href="https://a.example.com">a</a>
            <a class="result__a" href="https://b.example.com">b</a>
        "#;
        assert_eq!(parse_duckduckgo_results(html, 1).len(), 1);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(
            percent_decode("https%3A%2F%2Fexample.com%2Fa+b"),
            "https://example.com/a b"
        );
        assert_eq!(percent_decode("plain"), "plain");
    }

    #[test]
    fn test_build_engines_unknown_is_config_error() {
        let config = SearchConfig {
            engines: vec!["askjeeves".to_string()],
            ..SearchConfig::default()
        };
        assert!(build_engines(&config).is_err());
    }

    #[tokio::test]
    async fn test_chain_falls_through_failures() {
        struct Failing;
        struct Fixed;

        #[async_trait]
        impl SearchEngine for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            async fn search(&self, _q: &str, _m: usize) -> Result<Vec<String>, String> {
                Err("offline".to_string())
            }
        }

        #[async_trait]
        impl SearchEngine for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            async fn search(&self, _q: &str, _m: usize) -> Result<Vec<String>, String> {
                Ok(vec!["https://example.com".to_string()])
            }
        }

        let chain = SearchEngineChain::new(vec![Box::new(Failing), Box::new(Fixed)]);
        let urls = chain.search("wind ordinance", 5).await;
        assert_eq!(urls, vec!["https://example.com".to_string()]);
    }
}
