//! Pipeline orchestrator: ties scraper → reconciliation → storage → reports together.
//!
//! ## Run modes
//!
//! `run_scrape()`: daily mode (cron use):
//!   1. Load every configured reference table (store first, CSV fallback)
//!   2. Walk the index for the query window, expand each listing via its detail page
//!   3. Join against each reference table, append to its auction table
//!      (rows the store rejects go to a local CSV instead)
//!   4. Write the report directory and notify every recipient
//!   Idempotent per window: re-running appends 0 new rows (ON CONFLICT DO NOTHING).
//!
//! `run_results()`: weekly mode: revisit auctions held in the window, read their
//!   outcome block, pivot, report.
//!
//! `run_daily()`: `run_scrape()` for the default window, followed on Mondays by
//!   `run_results()` for the previous week.

use crate::config::{AppConfig, ReferenceTableConfig};
use crate::loader;
use crate::models::{QueryWindow, ReferenceTable};
use crate::notify::{
    self, ListingDigest, Notifier, compose_listing_report, compose_results_report,
};
use crate::reconcile::{self, ReconciliationSummary};
use crate::report::{self, ResultsSheet, TableSheet};
use crate::results::{self, Pivot};
use crate::scraper::http_client::{HttpFetcher, RetryingFetcher};
use crate::scraper::pacing::{Pacer, TokioSleeper};
use crate::scraper::{AuctionSource, EauctionScraper};
use crate::storage::{Repository, RunCounts, RunKind};
use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate, Weekday};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    repo: Repository,
    source: Arc<dyn AuctionSource>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let fetcher = RetryingFetcher::new(HttpFetcher::new(&config.scraper)?, &config.scraper);
        let pacer = Pacer::new(&config.pacing, Arc::new(TokioSleeper));
        let source = EauctionScraper::new(&config.scraper, Arc::new(fetcher), pacer)
            .context("Failed to build scraper")?;
        let notifier = notify::notifier_from_config(&config.notify)?;

        Ok(Self::with_parts(config, repo, Arc::new(source), Arc::from(notifier)))
    }

    pub fn with_parts(
        config: AppConfig,
        repo: Repository,
        source: Arc<dyn AuctionSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            repo,
            source,
            notifier,
        }
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    /// Reference rows from the store, or from the CSV fallback when the store
    /// cannot serve them. Fails only when neither source works.
    pub fn load_reference(&self, table: &ReferenceTableConfig) -> Result<ReferenceTable> {
        let rows = match self.repo.load_reference_table(&table.source_table) {
            Ok(rows) => rows,
            Err(e) => {
                let Some(file) = &table.fallback_file else {
                    return Err(e).with_context(|| {
                        format!("{}: store failed and no fallback file configured", table.name)
                    });
                };
                warn!("{}: {:#}; falling back to {:?}", table.name, e, file);
                loader::load_reference_csv(file)
                    .with_context(|| format!("{}: both reference sources failed", table.name))?
            }
        };

        let reference = ReferenceTable::from_raw(&table.name, &table.id_column, rows);
        info!(
            "{}: {} reference debtors keyed on {:?}",
            reference.name,
            reference.rows.len(),
            reference.id_column
        );
        Ok(reference)
    }

    /// Store table first, then the text file. An unreadable list means nobody
    /// is notified, never a failed run.
    pub fn recipients(&self) -> Vec<String> {
        let report = &self.config.report;
        match self.repo.load_mailing_list(&report.mailing_list_table) {
            Ok(list) if !list.is_empty() => return list,
            Ok(_) => warn!("Mailing list table {} is empty", report.mailing_list_table),
            Err(e) => warn!("Mailing list table {}: {:#}", report.mailing_list_table, e),
        }

        loader::load_mailing_list(&report.mailing_list_file).unwrap_or_else(|e| {
            warn!("No recipients: {:#}", e);
            Vec::new()
        })
    }

    // ── Daily scrape ──────────────────────────────────────────────────────────

    pub async fn run_scrape(&self, window: QueryWindow, max_page: Option<u32>) -> Result<ScrapeStats> {
        let run_id = self
            .repo
            .begin_scrape_run(RunKind::Scrape, window)
            .map_err(|e| warn!("Run log unavailable: {:#}", e))
            .ok();

        let result = self.scrape(window, max_page).await;

        if let Some(id) = run_id {
            let (counts, err) = match &result {
                Ok(stats) => (stats.run_counts(), None),
                Err(e) => (RunCounts::default(), Some(format!("{:#}", e))),
            };
            if let Err(e) = self.repo.finish_scrape_run(id, counts, err.as_deref()) {
                warn!("Could not close run {}: {:#}", id, e);
            }
        }

        result
    }

    async fn scrape(&self, window: QueryWindow, max_page: Option<u32>) -> Result<ScrapeStats> {
        let tables = &self.config.reconciliation.tables;
        if tables.is_empty() {
            warn!("No reference tables configured; nothing will be reconciled");
        }

        // ── 1. Reference data ─────────────────────────────────────────────────
        let references = tables
            .iter()
            .map(|t| self.load_reference(t))
            .collect::<Result<Vec<_>>>()?;

        // ── 2. Index + details ────────────────────────────────────────────────
        info!("=== Step 1: Index pages for {} ===", window);
        let index = self
            .source
            .fetch_listings(window, max_page)
            .await
            .context("Index scrape failed")?;
        for f in &index.failures {
            warn!("Page {} skipped: {}", f.page, f.error);
        }

        info!("=== Step 2: Detail pages ({} listings) ===", index.listings.len());
        let details = self.source.fetch_details(&index.listings).await;
        let manual = reconcile::manual_review(&details);

        // ── 3. Reconcile + persist ────────────────────────────────────────────
        info!("=== Step 3: Reconciliation ===");
        let mut reconciled = Vec::with_capacity(tables.len());
        let mut summaries = Vec::with_capacity(tables.len());
        let mut persisted = 0usize;
        let mut fallbacks = Vec::new();
        let mut unsaved = Vec::new();

        for (table, reference) in tables.iter().zip(&references) {
            let records = reconcile::reconcile(&details, reference);

            match self.repo.append_reconciled(&table.auction_table, window, &records) {
                Ok(n) => persisted += n,
                Err(e) => {
                    error!("{}: could not persist: {:#}", table.auction_table, e);
                    match report::write_fallback(
                        &self.config.storage.fallback_dir,
                        &table.auction_table,
                        window,
                        &records,
                    ) {
                        Ok(path) => {
                            warn!("{}: rows written to {:?} instead", table.auction_table, path);
                            fallbacks.push(path);
                        }
                        Err(e) => {
                            error!(
                                "{}: fallback export failed, {} rows only in the report: {:#}",
                                table.auction_table,
                                records.len(),
                                e
                            );
                            unsaved.push(table.auction_table.clone());
                        }
                    }
                }
            }

            summaries.push(reconcile::summarize(&table.name, &records));
            reconciled.push(records);
        }

        // ── 4. Report + notify ────────────────────────────────────────────────
        let sheets: Vec<TableSheet<'_>> = tables
            .iter()
            .zip(&reconciled)
            .map(|(t, records)| TableSheet {
                name: &t.name,
                records,
            })
            .collect();
        let report_dir = report::write_listing_report(
            &self.config.report.output_dir,
            window,
            &details,
            &sheets,
            &manual,
        )?;

        let digest = ListingDigest {
            window,
            listings: index.listings.len(),
            summaries: &summaries,
            manual_review: manual.len(),
            attachment: report_dir.clone(),
        };
        let today = chrono::Local::now().date_naive();
        let messages: Vec<_> = self
            .recipients()
            .iter()
            .map(|to| {
                compose_listing_report(
                    &self.config.notify.sender,
                    to,
                    today,
                    &digest,
                    self.config.report.contact.as_deref(),
                )
            })
            .collect();
        let notified = notify::deliver(self.notifier.as_ref(), &messages).await;

        let stats = ScrapeStats {
            pages: index.pages,
            page_failures: index.failures.len(),
            listings: index.listings.len(),
            detail_rows: details.len(),
            manual_review: manual.len(),
            summaries,
            persisted,
            fallbacks,
            unsaved,
            report_dir,
            notified,
        };
        info!(
            "=== Done: {} listings | {} rows | {} manual | {} new stored | {} notified ===",
            stats.listings, stats.detail_rows, stats.manual_review, stats.persisted, stats.notified
        );
        Ok(stats)
    }

    // ── Weekly results ────────────────────────────────────────────────────────

    pub async fn run_results(&self, window: QueryWindow) -> Result<ResultsStats> {
        let run_id = self
            .repo
            .begin_scrape_run(RunKind::Results, window)
            .map_err(|e| warn!("Run log unavailable: {:#}", e))
            .ok();

        let result = self.results(window).await;

        if let Some(id) = run_id {
            let (counts, err) = match &result {
                Ok(stats) => (
                    RunCounts {
                        listings: stats.records,
                        detail_rows: stats.records,
                        manual_review: stats.errors,
                        page_failures: 0,
                    },
                    None,
                ),
                Err(e) => (RunCounts::default(), Some(format!("{:#}", e))),
            };
            if let Err(e) = self.repo.finish_scrape_run(id, counts, err.as_deref()) {
                warn!("Could not close run {}: {:#}", id, e);
            }
        }

        result
    }

    async fn results(&self, window: QueryWindow) -> Result<ResultsStats> {
        let tables = &self.config.reconciliation.tables;
        info!("=== Auction results for {} ===", window);

        let mut per_table = Vec::with_capacity(tables.len());
        for table in tables {
            let records = self
                .repo
                .load_reconciled(&table.auction_table, window)
                .unwrap_or_else(|e| {
                    warn!("{}: {:#}", table.auction_table, e);
                    Vec::new()
                });
            info!("{}: {} auctions to revisit", table.name, records.len());

            let states = self.source.fetch_outcomes(&records).await;
            let outcomes = results::enrich(records, states);
            let pivots = results::strats(&outcomes);
            if let Some(total) = pivots.first().and_then(Pivot::total) {
                info!(
                    "{}: {} auctions, {:.2} awarded",
                    table.name, total.auctions, total.award_sum
                );
            }
            per_table.push((table.name.as_str(), outcomes, pivots));
        }

        let sheets: Vec<ResultsSheet<'_>> = per_table
            .iter()
            .map(|(name, outcomes, pivots)| ResultsSheet {
                name,
                outcomes,
                pivots,
            })
            .collect();
        let report_dir =
            report::write_results_report(&self.config.report.output_dir, window, &sheets)?;

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        let messages: Vec<_> = self
            .recipients()
            .iter()
            .map(|to| {
                compose_results_report(
                    &self.config.notify.sender,
                    to,
                    window,
                    &names,
                    report_dir.clone(),
                    self.config.report.contact.as_deref(),
                )
            })
            .collect();
        let notified = notify::deliver(self.notifier.as_ref(), &messages).await;

        let stats = ResultsStats {
            records: per_table.iter().map(|(_, o, _)| o.len()).sum(),
            errors: per_table
                .iter()
                .flat_map(|(_, o, _)| o)
                .filter(|o| o.is_error())
                .count(),
            report_dir,
            notified,
        };
        info!(
            "=== Done: {} auctions | {} without outcome | {} notified ===",
            stats.records, stats.errors, stats.notified
        );
        Ok(stats)
    }

    // ── Daily entry point ─────────────────────────────────────────────────────

    /// Scrape `window` (default: derived from `today`); on Mondays also run
    /// last week's results. A failed results run does not fail the scrape.
    pub async fn run_daily(
        &self,
        today: NaiveDate,
        window: Option<QueryWindow>,
        max_page: Option<u32>,
    ) -> Result<ScrapeStats> {
        let window = window.unwrap_or_else(|| QueryWindow::daily(today));
        if window.from > window.to {
            bail!("Window starts after it ends: {}", window);
        }

        let stats = self.run_scrape(window, max_page).await?;

        if self.config.pipeline.weekly_results_on_monday && today.weekday() == Weekday::Mon {
            let week = QueryWindow::previous_week(today);
            if let Err(e) = self.run_results(week).await {
                error!("Weekly results for {} failed: {:#}", week, e);
            }
        }

        Ok(stats)
    }
}

#[derive(Debug)]
pub struct ScrapeStats {
    pub pages: u32,
    pub page_failures: usize,
    pub listings: usize,
    pub detail_rows: usize,
    pub manual_review: usize,
    pub summaries: Vec<ReconciliationSummary>,
    pub persisted: usize,
    pub fallbacks: Vec<PathBuf>,
    /// Auction tables whose rows reached neither the store nor a fallback file.
    pub unsaved: Vec<String>,
    pub report_dir: PathBuf,
    pub notified: usize,
}

impl ScrapeStats {
    fn run_counts(&self) -> RunCounts {
        RunCounts {
            listings: self.listings,
            detail_rows: self.detail_rows,
            manual_review: self.manual_review,
            page_failures: self.page_failures,
        }
    }
}

#[derive(Debug)]
pub struct ResultsStats {
    pub records: usize,
    /// Auctions whose outcome block could not be read.
    pub errors: usize,
    pub report_dir: PathBuf,
    pub notified: usize,
}
