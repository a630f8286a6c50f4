//! File loaders: reference-table CSV exports and the plain-text mailing list.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// One CSV row keyed by header. Cells are kept as text; identifier
/// coercion happens at reconciliation.
pub type RawRow = BTreeMap<String, String>;

/// Load a reference-table CSV export (header row required).
pub fn load_reference_csv(path: &Path) -> Result<Vec<RawRow>> {
    debug!("Loading reference rows from {:?}", path);

    let file = std::fs::File::open(path).with_context(|| format!("Cannot open {:?}", path))?;
    let rows = read_reference_rows(file).with_context(|| format!("Cannot read {:?}", path))?;

    info!("{:?}: {} reference rows loaded", path, rows.len());
    Ok(rows)
}

pub fn read_reference_rows<R: Read>(input: R) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {}: {}", i + 1, e);
                continue;
            }
        };

        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Recipients from a text file, one address per line.
pub fn load_mailing_list(path: &Path) -> Result<Vec<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
    let recipients = parse_mailing_list(&text);
    info!("{:?}: {} recipients", path, recipients.len());
    Ok(recipients)
}

/// Blank lines, a leading `email` header and lines without `@` are skipped.
pub fn parse_mailing_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("email"))
        .filter(|l| {
            let ok = l.contains('@');
            if !ok {
                warn!("Skipping mailing list entry {:?}", l);
            }
            ok
        })
        .map(str::to_string)
        .collect()
}
