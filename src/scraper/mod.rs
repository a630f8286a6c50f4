pub mod cleaner;
pub mod http_client;
pub mod pacing;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{
    DetailRecord, ListingRecord, NOT_AVAILABLE, OUTCOME_ERROR_KEY, QueryWindow, ReconciledRecord,
};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::cleaner::format_site_date;
use self::pacing::Pacer;
use self::parsers::{
    DetailFields, pair_debtors, parse_detail_page, parse_listing_page, parse_outcome,
    parse_page_count,
};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} returned an empty body")]
    EmptyBody { url: String },

    #[error("GET {url} gave up after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Server-side and transport trouble is worth another attempt; a 4xx
    /// other than 429 will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { .. } | FetchError::EmptyBody { .. } => true,
            FetchError::Exhausted { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("page indicator not found")]
    MissingPageCount,

    #[error("page indicator {0:?} has no total")]
    MalformedPageCount(String),

    #[error("label {0:?} not found")]
    MissingLabel(&'static str),

    #[error("label {0:?} present without a value")]
    MissingValue(&'static str),

    #[error("{names} debtor names but {vats} VAT numbers")]
    DebtorCountMismatch { names: usize, vats: usize },

    #[error("no debtors listed")]
    NoDebtors,

    #[error("listing has no detail link")]
    MissingLink,

    #[error("outcome block not found")]
    MissingOutcome,

    #[error("outcome block has {labels} labels but {values} values")]
    OutcomeMismatch { labels: usize, values: usize },
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// ── Fetcher seam ──────────────────────────────────────────────────────────────

/// Anything that turns a URL into page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── Source trait ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PageFailure {
    pub page: u32,
    pub error: ScrapeError,
}

/// Everything collected from one walk of the index.
#[derive(Debug, Default)]
pub struct IndexScrape {
    pub listings: Vec<ListingRecord>,
    pub pages: u32,
    pub failures: Vec<PageFailure>,
}

/// Swappable auction data source.
#[async_trait]
pub trait AuctionSource: Send + Sync {
    /// Walk index pages 1..=N for the window, N taken from `max_page` or the
    /// page indicator. Only a failure to learn N is fatal.
    async fn fetch_listings(
        &self,
        window: QueryWindow,
        max_page: Option<u32>,
    ) -> Result<IndexScrape, ScrapeError>;

    /// One record per debtor, or a single manual-review record per listing
    /// whose detail page could not be read.
    async fn fetch_details(&self, listings: &[ListingRecord]) -> Vec<DetailRecord>;

    /// Outcome block of each record's detail page, in input order. Unreadable
    /// pages yield the error marker.
    async fn fetch_outcomes(&self, records: &[ReconciledRecord]) -> Vec<BTreeMap<String, String>>;
}

// ── eauction.gr scraper ───────────────────────────────────────────────────────

pub struct EauctionScraper {
    fetcher: Arc<dyn PageFetcher>,
    pacer: Pacer,
    base_url: Url,
    sort_ascending: bool,
    category_id: u32,
}

impl EauctionScraper {
    pub fn new(
        config: &ScraperConfig,
        fetcher: Arc<dyn PageFetcher>,
        pacer: Pacer,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid scraper base_url {:?}", config.base_url))?;

        Ok(Self {
            fetcher,
            pacer,
            base_url,
            sort_ascending: config.sort_ascending,
            category_id: config.category_id,
        })
    }

    /// Index URL for one page of the window, e.g.
    /// `…?postFrom=11/03/2024&postTo=17/03/2024&sortAsc=True&sortId=1&conductedSubTypeId=1&page=2`
    pub fn index_url(&self, window: QueryWindow, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("postFrom", &format_site_date(window.from))
            .append_pair("postTo", &format_site_date(window.to))
            .append_pair("sortAsc", if self.sort_ascending { "True" } else { "False" })
            .append_pair("sortId", "1")
            .append_pair("conductedSubTypeId", &self.category_id.to_string())
            .append_pair("page", &page.to_string());
        url
    }

    async fn fetch_index_page(&self, window: QueryWindow, page: u32) -> Result<String, FetchError> {
        let url = self.index_url(window, page);
        info!("Fetching index page {} ({})", page, url);
        self.fetcher.fetch(url.as_str()).await
    }

    /// Standalone detail fields of a single auction page.
    pub async fn fetch_detail_fields(&self, url: &str) -> Result<DetailFields, ScrapeError> {
        let html = self.fetcher.fetch(url).await?;
        Ok(parse_detail_page(&html)?)
    }

    async fn expand_listing(&self, listing: &ListingRecord) -> Vec<DetailRecord> {
        let result = if listing.has_link() {
            match self.fetch_detail_fields(&listing.link).await {
                Ok(fields) => pair_debtors(listing, fields).map_err(ScrapeError::from),
                Err(e) => Err(e),
            }
        } else {
            Err(ParseError::MissingLink.into())
        };

        match result {
            Ok(rows) => {
                debug!("{}: {} debtor(s)", listing.link, rows.len());
                rows
            }
            Err(e) => {
                warn!("{}: {}; flagged for manual review", listing.link, e);
                vec![DetailRecord::manual_review(listing.clone())]
            }
        }
    }

    async fn fetch_outcome(&self, link: &str) -> Result<BTreeMap<String, String>, ScrapeError> {
        let html = self.fetcher.fetch(link).await?;
        Ok(parse_outcome(&html)?)
    }
}

#[async_trait]
impl AuctionSource for EauctionScraper {
    async fn fetch_listings(
        &self,
        window: QueryWindow,
        max_page: Option<u32>,
    ) -> Result<IndexScrape, ScrapeError> {
        let mut scrape = IndexScrape::default();

        // Page 1 is fetched once: it both answers the page count and yields cards.
        let mut first_page = None;
        scrape.pages = match max_page {
            Some(n) => n,
            None => {
                let html = self.fetch_index_page(window, 1).await?;
                let pages = match parse_page_count(&html) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("{}; assuming a single index page", e);
                        1
                    }
                };
                first_page = Some(html);
                pages
            }
        };
        info!("Index for {} spans {} page(s)", window, scrape.pages);

        for page in 1..=scrape.pages {
            let html = match first_page.take() {
                Some(html) => Ok(html),
                None => self.fetch_index_page(window, page).await,
            };

            match html {
                Ok(html) => {
                    let cards = parse_listing_page(&html, &self.base_url);
                    if cards.is_empty() {
                        warn!("Index page {} has no auction cards", page);
                    }
                    info!("  Page {}: {} listings", page, cards.len());
                    scrape.listings.extend(cards);
                }
                Err(e) => {
                    warn!("Index page {} failed: {}", page, e);
                    scrape.failures.push(PageFailure {
                        page,
                        error: e.into(),
                    });
                }
            }

            self.pacer.after_page(page).await;
        }

        info!(
            "Collected {} listings from {} page(s), {} failed",
            scrape.listings.len(),
            scrape.pages,
            scrape.failures.len()
        );
        Ok(scrape)
    }

    async fn fetch_details(&self, listings: &[ListingRecord]) -> Vec<DetailRecord> {
        let mut rows = Vec::with_capacity(listings.len());

        for (i, listing) in listings.iter().enumerate() {
            self.pacer.before_row(i).await;
            debug!("Detail {}/{}: {}", i + 1, listings.len(), listing.link);
            rows.extend(self.expand_listing(listing).await);
        }

        let flagged = rows.iter().filter(|r| r.needs_manual_review()).count();
        info!(
            "Expanded {} listings into {} rows ({} for manual review)",
            listings.len(),
            rows.len(),
            flagged
        );
        rows
    }

    async fn fetch_outcomes(&self, records: &[ReconciledRecord]) -> Vec<BTreeMap<String, String>> {
        let mut states = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            self.pacer.before_row(i).await;
            let link = &record.detail.listing.link;

            let state = match self.fetch_outcome(link).await {
                Ok(state) => state,
                Err(e) => {
                    warn!("{}: no outcome ({})", link, e);
                    BTreeMap::from([(OUTCOME_ERROR_KEY.to_string(), NOT_AVAILABLE.to_string())])
                }
            };
            states.push(state);
        }

        states
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
