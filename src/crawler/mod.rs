pub mod extractor;

#[cfg(test)]
mod tests;

use fancy_regex::Regex;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::ProductRecord;
use crate::config::Config;
use crate::{GuideError, Result};

/// Shopify publishes product URLs in these sitemaps.
const SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_products_1.xml"];

const USER_AGENT: &str = "Mozilla/5.0 (compatible; OrtahausBot/1.0; +https://ortahaus.com)";

/// Pause between page fetches to stay polite to the storefront.
const FETCH_DELAY: Duration = Duration::from_millis(200);

fn loc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<loc>(.*?)</loc>").expect("static pattern is valid"))
}

/// Batch scraper producing the catalog snapshot the indexer consumes.
pub struct CatalogCrawler {
    agent: ureq::Agent,
    base_url: Url,
    show_progress: bool,
}

/// Operator-facing summary of one crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub discovered: usize,
    pub scraped: usize,
    pub failed: Vec<(String, String)>,
}

impl CatalogCrawler {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.catalog.base_url)
            .map_err(|_| GuideError::Config(format!("invalid base url {}", config.catalog.base_url)))?;

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.openai.request_timeout_secs)))
            .build()
            .into();

        Ok(Self {
            agent,
            base_url,
            show_progress: false,
        })
    }

    #[inline]
    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Product page URLs from the storefront sitemaps, sorted and deduped so
    /// crawl order is reproducible.
    #[inline]
    pub fn product_urls(&self) -> Result<Vec<String>> {
        let mut urls = BTreeSet::new();

        for path in SITEMAP_PATHS {
            let sitemap_url = self
                .base_url
                .join(path)
                .map_err(|e| GuideError::Config(format!("invalid sitemap path {path}: {e}")))?;

            let xml = match self.fetch(sitemap_url.as_str()) {
                Ok(xml) => xml,
                Err(err) => {
                    debug!("Sitemap {} unavailable: {}", sitemap_url, err);
                    continue;
                }
            };

            collect_product_locs(&xml, &mut urls);
        }

        Ok(urls.into_iter().collect())
    }

    /// Fetch and extract every discovered product page. Individual page
    /// failures are recorded and skipped; the crawl continues.
    #[inline]
    pub fn crawl(&self) -> Result<(Vec<ProductRecord>, CrawlReport)> {
        let urls = self.product_urls()?;
        if urls.is_empty() {
            return Err(GuideError::Catalog(format!(
                "no product URLs discovered under {}",
                self.base_url
            )));
        }

        info!("Discovered {} product URLs", urls.len());
        let bar = self.progress_bar(urls.len() as u64);

        let mut records = Vec::with_capacity(urls.len());
        let mut failed = Vec::new();

        for url in &urls {
            match self.fetch(url) {
                Ok(html) => {
                    let record = extractor::extract_product(url, &html);
                    debug!("Scraped {}: {}", url, record.name);
                    records.push(record);
                }
                Err(err) => {
                    warn!("Failed to scrape {}: {}", url, err);
                    failed.push((url.clone(), err.to_string()));
                }
            }
            bar.inc(1);
            std::thread::sleep(FETCH_DELAY);
        }
        bar.finish_and_clear();

        let report = CrawlReport {
            discovered: urls.len(),
            scraped: records.len(),
            failed,
        };

        info!(
            "Crawl finished: {} scraped, {} failed of {} discovered",
            report.scraped,
            report.failed.len(),
            report.discovered
        );
        Ok((records, report))
    }

    fn fetch(&self, url: &str) -> Result<String> {
        self.agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| GuideError::Service(format!("failed to fetch {url}: {e}")))
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} pages scraped")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

/// Pull `/products/` locations out of one sitemap document.
fn collect_product_locs(xml: &str, urls: &mut BTreeSet<String>) {
    for capture in loc_pattern().captures_iter(xml) {
        let Ok(capture) = capture else { continue };
        if let Some(loc) = capture.get(1) {
            let url = loc.as_str().trim();
            if url.contains("/products/") {
                urls.insert(url.to_string());
            }
        }
    }
}
