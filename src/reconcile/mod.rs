//! Inner join of scraped debtor rows against business reference tables.

use crate::loader::RawRow;
use crate::models::{DetailRecord, NOT_AVAILABLE, ReconciledRecord, ReferenceEntity, ReferenceTable};
use crate::scraper::cleaner::{coerce_tax_id, parse_site_date};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

impl ReferenceTable {
    /// Build a table from raw rows, dropping every row whose identifier
    /// column is missing or not an integer.
    pub fn from_raw(name: impl Into<String>, id_column: impl Into<String>, rows: Vec<RawRow>) -> Self {
        let name = name.into();
        let id_column = id_column.into();
        let total = rows.len();

        let rows: Vec<ReferenceEntity> = rows
            .into_iter()
            .filter_map(|attributes| {
                let tax_id = attributes.get(&id_column).and_then(|v| coerce_tax_id(v))?;
                Some(ReferenceEntity { tax_id, attributes })
            })
            .collect();

        if rows.len() < total {
            debug!(
                "{}: dropped {} rows without a numeric {:?}",
                name,
                total - rows.len(),
                id_column
            );
        }

        Self { name, id_column, rows }
    }
}

/// Every (detail, reference) pair sharing a tax identifier. Detail rows whose
/// identifier is not numeric never match.
pub fn reconcile(details: &[DetailRecord], table: &ReferenceTable) -> Vec<ReconciledRecord> {
    let mut by_id: HashMap<i64, Vec<&ReferenceEntity>> = HashMap::new();
    for entity in &table.rows {
        by_id.entry(entity.tax_id).or_default().push(entity);
    }

    let matched: Vec<ReconciledRecord> = details
        .iter()
        .filter_map(|d| Some((d, coerce_tax_id(&d.debtor_vat)?)))
        .flat_map(|(d, id)| {
            by_id
                .get(&id)
                .into_iter()
                .flatten()
                .map(move |entity| ReconciledRecord {
                    detail: d.clone(),
                    reference: (*entity).clone(),
                })
        })
        .collect();

    info!(
        "{}: {} of {} scraped rows matched",
        table.name,
        matched.len(),
        details.len()
    );
    matched
}

/// Rows operations staff must resolve by hand.
pub fn manual_review(details: &[DetailRecord]) -> Vec<DetailRecord> {
    details
        .iter()
        .filter(|d| d.needs_manual_review())
        .cloned()
        .collect()
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationSummary {
    pub name: String,
    pub records: usize,
    pub unique_debtors: usize,
    pub first_conduction: Option<NaiveDate>,
}

pub fn summarize(name: &str, records: &[ReconciledRecord]) -> ReconciliationSummary {
    let unique_debtors = records
        .iter()
        .map(|r| r.reference.tax_id)
        .collect::<HashSet<_>>()
        .len();

    let first_conduction = records
        .iter()
        .filter_map(|r| parse_site_date(&r.detail.date_of_conduct))
        .min();

    ReconciliationSummary {
        name: name.to_string(),
        records: records.len(),
        unique_debtors,
        first_conduction,
    }
}

impl fmt::Display for ReconciliationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self
            .first_conduction
            .map(|d| d.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        write!(
            f,
            "{} auctions: {} w/ {} unique debtors and first auction is held on {}",
            self.name, self.records, self.unique_debtors, first
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ListingRecord;

    pub fn detail(link: &str, vat: &str, conduct: &str) -> DetailRecord {
        DetailRecord {
            listing: ListingRecord {
                link: link.to_string(),
                ..Default::default()
            },
            debtor_name: format!("Debtor {vat}"),
            debtor_vat: vat.to_string(),
            date_of_conduct: conduct.to_string(),
            unique_code_1: "1".into(),
            hastener_name: "ALPHA BANK".into(),
        }
    }

    pub fn raw(id: &str, servicer: &str) -> RawRow {
        RawRow::from([
            ("VAT Number".to_string(), id.to_string()),
            ("Servicer".to_string(), servicer.to_string()),
            ("Case Manager".to_string(), "A. Person".to_string()),
        ])
    }

    fn pairs(records: &[ReconciledRecord]) -> Vec<(String, i64, String)> {
        let mut p: Vec<_> = records
            .iter()
            .map(|r| {
                (
                    r.detail.listing.link.clone(),
                    r.reference.tax_id,
                    r.reference.attributes["Servicer"].clone(),
                )
            })
            .collect();
        p.sort();
        p
    }

    #[test]
    fn non_numeric_reference_ids_are_dropped() {
        let table = ReferenceTable::from_raw(
            "Frame",
            "VAT Number",
            vec![raw("094000001", "S1"), raw("N/A", "S2"), raw("", "S3"), raw("12.0", "S4")],
        );
        let ids: Vec<i64> = table.rows.iter().map(|r| r.tax_id).collect();
        assert_eq!(ids, vec![94000001, 12]);
    }

    #[test]
    fn joins_on_coerced_identifier() {
        let table = ReferenceTable::from_raw("Frame", "VAT Number", vec![raw("94000001.0", "S1")]);
        let details = vec![
            detail("a", "094000001", "20/03/2024"),
            detail("b", "n/a", "20/03/2024"),
            detail("c", "094000002", "20/03/2024"),
        ];

        let joined = reconcile(&details, &table);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].detail.listing.link, "a");
        assert_eq!(joined[0].reference.attributes["Servicer"], "S1");
    }

    #[test]
    fn duplicate_reference_rows_multiply() {
        let table = ReferenceTable::from_raw(
            "Frame",
            "VAT Number",
            vec![raw("1", "S1"), raw("1", "S2")],
        );
        let joined = reconcile(&[detail("a", "1", "20/03/2024")], &table);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn join_ignores_row_order() {
        let refs = vec![raw("1", "S1"), raw("2", "S2"), raw("2", "S3"), raw("N/A", "S4")];
        let details = vec![
            detail("a", "1", "20/03/2024"),
            detail("b", "2", "21/03/2024"),
            detail("c", "3", "22/03/2024"),
        ];

        let forward = reconcile(&details, &ReferenceTable::from_raw("F", "VAT Number", refs.clone()));

        let mut refs_rev = refs;
        refs_rev.reverse();
        let mut details_rev = details;
        details_rev.reverse();
        let backward = reconcile(&details_rev, &ReferenceTable::from_raw("F", "VAT Number", refs_rev));

        assert_eq!(pairs(&forward), pairs(&backward));
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn summary_counts_and_earliest_date() {
        let table = ReferenceTable::from_raw(
            "Frame",
            "VAT Number",
            vec![raw("1", "S1"), raw("2", "S2")],
        );
        let details = vec![
            detail("a", "1", "25/03/2024"),
            detail("b", "1", "21/03/2024"),
            detail("c", "2", "n/a"),
        ];
        let summary = summarize("Frame", &reconcile(&details, &table));

        assert_eq!(summary.records, 3);
        assert_eq!(summary.unique_debtors, 2);
        assert_eq!(summary.first_conduction, NaiveDate::from_ymd_opt(2024, 3, 21));
        assert_eq!(
            summary.to_string(),
            "Frame auctions: 3 w/ 2 unique debtors and first auction is held on 2024-03-21"
        );

        let empty = summarize("Arctos", &[]);
        assert_eq!(
            empty.to_string(),
            "Arctos auctions: 0 w/ 0 unique debtors and first auction is held on n/a"
        );
    }

    #[test]
    fn manual_review_rows_are_split_out() {
        let flagged = DetailRecord::manual_review(ListingRecord::default());
        let rows = vec![detail("a", "1", "n/a"), flagged.clone()];
        assert_eq!(manual_review(&rows), vec![flagged]);
    }
}
