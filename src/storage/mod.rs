use crate::loader::RawRow;
use crate::models::{DetailRecord, ListingRecord, NOT_AVAILABLE, QueryWindow, ReconciledRecord, ReferenceEntity};
use crate::scraper::cleaner::{format_site_date, parse_site_date};
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    kind            VARCHAR NOT NULL,
    window_from     DATE NOT NULL,
    window_to       DATE NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    listings        INTEGER DEFAULT 0,
    detail_rows     INTEGER DEFAULT 0,
    manual_review   INTEGER DEFAULT 0,
    page_failures   INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS mailing_list (
    email       VARCHAR PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_runs_started ON scrape_runs (started_at);
"#;

/// One table per reference source. Reference attributes ride along as a JSON
/// document since every source has its own column set.
const AUCTION_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    status                  VARCHAR,
    starting_bid            VARCHAR,
    debtor                  VARCHAR,
    auction_date            DATE,
    auction_time            VARCHAR,
    object_to_be_auctioned  VARCHAR,
    regional_unit           VARCHAR,
    date_of_posting         VARCHAR,
    unique_code             VARCHAR,
    member_of_auction       VARCHAR,
    link                    VARCHAR NOT NULL,
    debtor_name             VARCHAR,
    debtor_vat              VARCHAR NOT NULL,
    date_of_conduct         VARCHAR,
    unique_code_1           VARCHAR,
    hastener_name           VARCHAR,
    tax_id                  BIGINT NOT NULL,
    reference               VARCHAR NOT NULL,
    window_from             DATE NOT NULL,
    window_to               DATE NOT NULL,
    scraped_at              TIMESTAMP NOT NULL,
    PRIMARY KEY (link, debtor_vat, window_from, window_to)
)
"#;

/// Double-quoted SQL identifier for configured table and column names.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Run log ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Scrape,
    Results,
}

impl RunKind {
    fn as_str(self) -> &'static str {
        match self {
            RunKind::Scrape => "scrape",
            RunKind::Results => "results",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounts {
    pub listings: usize,
    pub detail_rows: usize,
    pub manual_review: usize,
    pub page_failures: usize,
}

#[derive(Debug, Clone)]
pub struct ScrapeRunRow {
    pub id: i64,
    pub kind: String,
    pub window_from: NaiveDate,
    pub window_to: NaiveDate,
    pub started_at: NaiveDateTime,
    pub status: String,
    pub listings: i64,
    pub manual_review: i64,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            params![table],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    // ── Reconciled auctions ───────────────────────────────────────────────────

    pub fn ensure_auction_table(&self, table: &str) -> Result<()> {
        let ddl = AUCTION_TABLE_DDL.replace("{table}", &quote_ident(table));
        self.conn
            .execute_batch(&ddl)
            .with_context(|| format!("create auction table {}", table))
    }

    /// Append reconciled rows. A row already stored for the same link, debtor
    /// and window is left as is; returns how many rows were new.
    pub fn append_reconciled(
        &self,
        table: &str,
        window: QueryWindow,
        records: &[ReconciledRecord],
    ) -> Result<usize> {
        self.ensure_auction_table(table)?;
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            r#"INSERT INTO {} VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT DO NOTHING"#,
            quote_ident(table)
        );
        let now = Utc::now().naive_utc();

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        for r in records {
            let l = &r.detail.listing;
            let d = &r.detail;
            let reference = serde_json::to_string(&r.reference.attributes)?;
            inserted += tx
                .execute(
                    &sql,
                    params![
                        l.status,
                        l.starting_bid,
                        l.debtor,
                        parse_site_date(&l.auction_date),
                        l.auction_time,
                        l.object_to_be_auctioned,
                        l.regional_unit,
                        l.date_of_posting,
                        l.unique_code,
                        l.member_of_auction,
                        l.link,
                        d.debtor_name,
                        d.debtor_vat,
                        d.date_of_conduct,
                        d.unique_code_1,
                        d.hastener_name,
                        r.reference.tax_id,
                        reference,
                        window.from,
                        window.to,
                        now,
                    ],
                )
                .with_context(|| format!("insert {} {}", l.link, d.debtor_vat))?;
        }
        tx.commit()?;

        debug!("{}: {} of {} rows new", table, inserted, records.len());
        Ok(inserted)
    }

    /// Reconciled rows whose auction date falls inside `window`.
    pub fn load_reconciled(&self, table: &str, window: QueryWindow) -> Result<Vec<ReconciledRecord>> {
        if !self.table_exists(table)? {
            bail!("auction table {} does not exist", table);
        }

        let sql = format!(
            r#"SELECT status, starting_bid, debtor, auction_date, auction_time,
                      object_to_be_auctioned, regional_unit, date_of_posting, unique_code,
                      member_of_auction, link, debtor_name, debtor_vat, date_of_conduct,
                      unique_code_1, hastener_name, tax_id, reference
               FROM {}
               WHERE auction_date BETWEEN ? AND ?
               ORDER BY auction_date, link, debtor_vat"#,
            quote_ident(table)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![window.from, window.to], |r| {
            let text = |i: usize| -> duckdb::Result<String> {
                Ok(r.get::<_, Option<String>>(i)?
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()))
            };
            let auction_date: Option<NaiveDate> = r.get(3)?;
            let listing = ListingRecord {
                status: text(0)?,
                starting_bid: text(1)?,
                debtor: text(2)?,
                auction_date: auction_date
                    .map(format_site_date)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                auction_time: text(4)?,
                object_to_be_auctioned: text(5)?,
                regional_unit: text(6)?,
                date_of_posting: text(7)?,
                unique_code: text(8)?,
                member_of_auction: text(9)?,
                link: text(10)?,
            };
            let detail = DetailRecord {
                listing,
                debtor_name: text(11)?,
                debtor_vat: text(12)?,
                date_of_conduct: text(13)?,
                unique_code_1: text(14)?,
                hastener_name: text(15)?,
            };
            Ok((detail, r.get::<_, i64>(16)?, r.get::<_, String>(17)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (detail, tax_id, reference) = row?;
            let attributes = serde_json::from_str(&reference)
                .with_context(|| format!("bad reference document for {}", detail.listing.link))?;
            records.push(ReconciledRecord {
                detail,
                reference: ReferenceEntity { tax_id, attributes },
            });
        }
        Ok(records)
    }

    // ── Reference tables ──────────────────────────────────────────────────────

    /// Replace a reference table with `rows`; every column is stored as text.
    pub fn replace_reference_table(&self, table: &str, rows: &[RawRow]) -> Result<usize> {
        let columns: BTreeSet<&str> = rows
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .collect();
        if columns.is_empty() {
            bail!("no columns to import into {}", table);
        }

        let column_defs = columns
            .iter()
            .map(|c| format!("{} VARCHAR", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {} ({})",
            quote_ident(table),
            column_defs
        ))?;

        let sql = format!("INSERT INTO {} VALUES ({})", quote_ident(table), placeholders);
        for row in rows {
            let values = columns.iter().map(|c| row.get(*c).map(String::as_str));
            tx.execute(&sql, params_from_iter(values))?;
        }
        tx.commit()?;

        info!("{}: {} reference rows imported", table, rows.len());
        Ok(rows.len())
    }

    /// Every row of a reference table, cells rendered as text. NULL cells are
    /// left out of the row.
    pub fn load_reference_table(&self, table: &str) -> Result<Vec<RawRow>> {
        let columns = self.columns_of(table)?;
        if columns.is_empty() {
            bail!("reference table {} does not exist", table);
        }

        let select = columns
            .iter()
            .map(|c| format!("CAST({} AS VARCHAR)", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", select, quote_ident(table));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| {
            let mut row = RawRow::new();
            for (i, column) in columns.iter().enumerate() {
                if let Some(v) = r.get::<_, Option<String>>(i)? {
                    row.insert(column.clone(), v);
                }
            }
            Ok(row)
        })?;

        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn columns_of(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let cols = stmt
            .query_map(params![table], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(cols)
    }

    // ── Mailing list ──────────────────────────────────────────────────────────

    pub fn load_mailing_list(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT email FROM {} WHERE email IS NOT NULL ORDER BY email",
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let emails = stmt
            .query_map([], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(emails)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, kind: RunKind, window: QueryWindow) -> Result<i64> {
        let id = self.conn.query_row(
            r#"INSERT INTO scrape_runs (kind, window_from, window_to, started_at, status)
               VALUES (?, ?, ?, ?, 'running') RETURNING id"#,
            params![kind.as_str(), window.from, window.to, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, counts: RunCounts, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               listings = ?, detail_rows = ?, manual_review = ?, page_failures = ?,
               error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                counts.listings as i64,
                counts.detail_rows as i64,
                counts.manual_review as i64,
                counts.page_failures as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRunRow>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, kind, window_from, window_to, started_at, status, listings, manual_review
               FROM scrape_runs ORDER BY id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(ScrapeRunRow {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    window_from: r.get(2)?,
                    window_to: r.get(3)?,
                    started_at: r.get(4)?,
                    status: r.get(5)?,
                    listings: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    manual_review: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(runs)
    }
}
