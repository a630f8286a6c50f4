//! CSV exports: the daily listing report, the weekly results with their
//! strats, and the fallback dump used when the store rejects rows.

use crate::models::{AuctionOutcome, DetailRecord, QueryWindow, ReconciledRecord};
use crate::results::Pivot;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Reconciled rows of one reference table.
pub struct TableSheet<'a> {
    pub name: &'a str,
    pub records: &'a [ReconciledRecord],
}

pub struct ResultsSheet<'a> {
    pub name: &'a str,
    pub outcomes: &'a [AuctionOutcome],
    pub pivots: &'a [Pivot],
}

/// Lowercase file stem: "Frame Borrowers" → "frame_borrowers"
fn file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    csv::Writer::from_path(path).with_context(|| format!("Cannot create {:?}", path))
}

fn fresh_dir(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path).with_context(|| format!("Could not create dir {:?}", path))?;
    Ok(path)
}

// ── Sheets ────────────────────────────────────────────────────────────────────

fn write_details(path: &Path, rows: &[DetailRecord]) -> Result<()> {
    let mut w = writer(path)?;
    w.write_record(DetailRecord::columns())?;
    for r in rows {
        w.write_record(r.values())?;
    }
    w.flush()?;
    Ok(())
}

fn write_reconciled(path: &Path, records: &[ReconciledRecord]) -> Result<()> {
    let attributes: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.reference.attributes.keys().map(String::as_str))
        .collect();

    let mut w = writer(path)?;
    let mut header = DetailRecord::columns();
    header.extend(attributes.iter().copied());
    w.write_record(&header)?;

    for r in records {
        let mut row = r.detail.values();
        row.extend(
            attributes
                .iter()
                .map(|a| r.reference.attributes.get(*a).map(String::as_str).unwrap_or("")),
        );
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

fn write_outcomes(path: &Path, outcomes: &[AuctionOutcome]) -> Result<()> {
    let attributes: BTreeSet<&str> = outcomes
        .iter()
        .flat_map(|o| o.record.reference.attributes.keys().map(String::as_str))
        .collect();
    let labels: BTreeSet<&str> = outcomes
        .iter()
        .flat_map(|o| o.state.keys().map(String::as_str))
        .collect();

    let mut w = writer(path)?;
    let mut header = DetailRecord::columns();
    header.extend(attributes.iter().copied());
    header.extend(labels.iter().copied());
    header.extend(["min_bid", "award"]);
    w.write_record(&header)?;

    for o in outcomes {
        let mut row: Vec<String> = o.record.detail.values().into_iter().map(String::from).collect();
        row.extend(attributes.iter().map(|a| {
            o.record.reference.attributes.get(*a).cloned().unwrap_or_default()
        }));
        row.extend(labels.iter().map(|l| o.state.get(*l).cloned().unwrap_or_default()));
        row.push(o.min_bid.to_string());
        row.push(o.award.map(|a| a.to_string()).unwrap_or_default());
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

/// Every pivot of every table, one block after another, blank line between.
fn write_strats(path: &Path, sheets: &[ResultsSheet<'_>]) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Cannot create {:?}", path))?;

    for sheet in sheets {
        w.write_record([sheet.name])?;
        for pivot in sheet.pivots {
            w.write_record([pivot.dimension.label(), "no of auctions", "avg starting bid", "award"])?;
            for row in &pivot.rows {
                w.write_record([
                    row.key.clone(),
                    row.auctions.to_string(),
                    format!("{:.2}", row.avg_starting_bid),
                    format!("{:.2}", row.award_sum),
                ])?;
            }
            w.write_record([""])?;
        }
    }
    w.flush()?;
    Ok(())
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// Daily report directory `eauctions_gr_<to>` holding all listings, one sheet
/// per reference table and the manual-check sheet.
pub fn write_listing_report(
    root: &Path,
    window: QueryWindow,
    all: &[DetailRecord],
    tables: &[TableSheet<'_>],
    manual: &[DetailRecord],
) -> Result<PathBuf> {
    let dir = fresh_dir(root.join(format!("eauctions_gr_{}", window.to)))?;

    write_details(&dir.join("all_listings.csv"), all)?;
    for t in tables {
        write_reconciled(&dir.join(format!("{}.csv", file_stem(t.name))), t.records)?;
    }
    write_details(&dir.join("manual_check.csv"), manual)?;

    info!("Listing report written to {:?}", dir);
    Ok(dir)
}

/// Weekly report directory `eauctions_gr_results_<to>`: per-table results and
/// `strats.csv`.
pub fn write_results_report(
    root: &Path,
    window: QueryWindow,
    sheets: &[ResultsSheet<'_>],
) -> Result<PathBuf> {
    let dir = fresh_dir(root.join(format!("eauctions_gr_results_{}", window.to)))?;

    for s in sheets {
        write_outcomes(&dir.join(format!("{}_results.csv", file_stem(s.name))), s.outcomes)?;
    }
    write_strats(&dir.join("strats.csv"), sheets)?;

    info!("Results report written to {:?}", dir);
    Ok(dir)
}

/// Local copy of rows the store could not take: `<table>_<to>.csv`.
pub fn write_fallback(
    dir: &Path,
    table: &str,
    window: QueryWindow,
    records: &[ReconciledRecord],
) -> Result<PathBuf> {
    let dir = fresh_dir(dir.to_path_buf())?;
    let path = dir.join(format!("{}_{}.csv", file_stem(table), window.to));
    write_reconciled(&path, records)?;
    Ok(path)
}
