mod config;
mod loader;
mod models;
mod notify;
mod pipeline;
mod reconcile;
mod report;
mod results;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::models::QueryWindow;
use crate::pipeline::Pipeline;
use crate::storage::Repository;
use crate::utils::parse_cli_date;

#[derive(Parser)]
#[command(name = "eauction-monitor", about = "eauction.gr listing monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape, reconcile, store and report listings (daily mode)
    Scrape {
        /// First posting date, DD/MM/YYYY (default: yesterday, Friday on Mondays)
        #[arg(long, value_parser = parse_cli_date)]
        from: Option<NaiveDate>,

        /// Last posting date, DD/MM/YYYY (default: yesterday)
        #[arg(long, value_parser = parse_cli_date)]
        to: Option<NaiveDate>,

        /// Stop after this many index pages instead of reading the page count
        #[arg(long)]
        max_page: Option<u32>,
    },

    /// Fetch outcomes for auctions held in a week and send the strats
    Results {
        /// Any date one week after the target week, DD/MM/YYYY (default: today)
        #[arg(long, value_parser = parse_cli_date)]
        week_of: Option<NaiveDate>,
    },

    /// Load a reference table from a CSV export into the store
    ImportReference {
        /// Store table name, or the display name of a configured reference table
        #[arg(short, long)]
        table: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without scraping
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "eauction_monitor=info,warn",
        1 => "eauction_monitor=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Command::Scrape { from, to, max_page } => {
            let _t = utils::Timer::start("Daily scrape");
            let window = match (from, to) {
                (None, None) => None,
                (from, to) => {
                    let default = QueryWindow::daily(today);
                    Some(QueryWindow::new(from.unwrap_or(default.from), to.unwrap_or(default.to)))
                }
            };

            let stats = Pipeline::new(config)?.run_daily(today, window, max_page).await?;
            info!(
                "Done: {} listings over {} pages ({} failed), {} rows, {} for manual review",
                stats.listings, stats.pages, stats.page_failures, stats.detail_rows, stats.manual_review
            );
            for s in &stats.summaries {
                info!("  {}", s);
            }
        }

        Command::Results { week_of } => {
            let _t = utils::Timer::start("Weekly results");
            let window = QueryWindow::previous_week(week_of.unwrap_or(today));
            let stats = Pipeline::new(config)?.run_results(window).await?;
            info!(
                "Done: {} auctions, {} without outcome, report at {:?}",
                stats.records, stats.errors, stats.report_dir
            );
        }

        Command::ImportReference { table, file } => {
            let _t = utils::Timer::start("Reference import");
            let target = config
                .reference_table(&table)
                .map(|t| t.source_table.clone())
                .unwrap_or(table);

            let rows = loader::load_reference_csv(&file)?;
            if rows.is_empty() {
                bail!("{:?} has no rows", file);
            }
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let n = repo
                .replace_reference_table(&target, &rows)
                .with_context(|| format!("import into {}", target))?;
            info!("Imported {} rows into {}", n, target);
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            println!("─────────────────────────────────");
            println!("  eauction monitor — Database Stats");
            println!("─────────────────────────────────");
            for t in &config.reconciliation.tables {
                println!(
                    "  {:<10}: {} debtors, {} stored auctions",
                    t.name,
                    utils::fmt_number(repo.row_count(&t.source_table)?),
                    utils::fmt_number(repo.row_count(&t.auction_table)?),
                );
            }
            println!("  Recipients: {}", repo.row_count(&config.report.mailing_list_table)?);
            println!("─────────────────────────────────");
            for run in repo.recent_runs(5).unwrap_or_default() {
                println!(
                    "  #{} {:<7} {} → {}  {} ({} listings, {} manual)  {}",
                    run.id,
                    run.kind,
                    run.window_from,
                    run.window_to,
                    run.status,
                    run.listings,
                    run.manual_review,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
