//! Weekly result enrichment: outcome amounts and the pivot "strats".

use crate::models::{AuctionOutcome, NOT_AVAILABLE, ReconciledRecord};
use crate::scraper::cleaner::{parse_amount, parse_site_date};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

pub const STATUS_LABEL: &str = "Status:";
/// Spelled as the site prints it.
pub const AWARD_LABEL: &str = "Award ammount:";

pub fn build_outcome(record: ReconciledRecord, state: BTreeMap<String, String>) -> AuctionOutcome {
    let min_bid = parse_amount(&record.detail.listing.starting_bid);
    let award = state.get(AWARD_LABEL).map(|v| parse_amount(v));
    AuctionOutcome {
        record,
        state,
        min_bid,
        award,
    }
}

/// Pair each record with the outcome state fetched for it, in order.
pub fn enrich(
    records: Vec<ReconciledRecord>,
    states: Vec<BTreeMap<String, String>>,
) -> Vec<AuctionOutcome> {
    if records.len() != states.len() {
        warn!(
            "{} records but {} outcome states; extra entries ignored",
            records.len(),
            states.len()
        );
    }
    records
        .into_iter()
        .zip(states)
        .map(|(record, state)| build_outcome(record, state))
        .collect()
}

// ── Pivots ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Status,
    Hastener,
    AuctionDate,
    Servicer,
    CaseManager,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Status,
        Dimension::Hastener,
        Dimension::AuctionDate,
        Dimension::Servicer,
        Dimension::CaseManager,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Status => "Status",
            Dimension::Hastener => "Hastener name",
            Dimension::AuctionDate => "Auction date",
            Dimension::Servicer => "Servicer",
            Dimension::CaseManager => "Case Manager",
        }
    }

    fn key(self, outcome: &AuctionOutcome) -> String {
        let value = match self {
            Dimension::Status => outcome.state.get(STATUS_LABEL),
            Dimension::Hastener => Some(&outcome.record.detail.hastener_name),
            Dimension::AuctionDate => Some(&outcome.record.detail.listing.auction_date),
            Dimension::Servicer => outcome.record.reference.attributes.get("Servicer"),
            Dimension::CaseManager => outcome.record.reference.attributes.get("Case Manager"),
        };
        value
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Dates sort chronologically, with unparseable ones last; everything else
    /// sorts as text.
    fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Dimension::AuctionDate => match (parse_site_date(a), parse_site_date(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            },
            _ => a.cmp(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub key: String,
    pub auctions: usize,
    pub avg_starting_bid: f64,
    pub award_sum: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    pub dimension: Dimension,
    /// Group rows in key order, then the `Total` row.
    pub rows: Vec<PivotRow>,
}

impl Pivot {
    pub fn total(&self) -> Option<&PivotRow> {
        self.rows.last()
    }
}

pub const TOTAL_KEY: &str = "Total";

#[derive(Default)]
struct Acc {
    auctions: usize,
    bid_sum: f64,
    award_sum: f64,
}

impl Acc {
    fn add(&mut self, o: &AuctionOutcome) {
        self.auctions += 1;
        self.bid_sum += o.min_bid;
        // a page without an award amount counts as zero
        self.award_sum += o.award.unwrap_or(0.0);
    }

    fn row(&self, key: String) -> PivotRow {
        PivotRow {
            key,
            auctions: self.auctions,
            avg_starting_bid: if self.auctions == 0 {
                0.0
            } else {
                self.bid_sum / self.auctions as f64
            },
            award_sum: self.award_sum,
        }
    }
}

/// Count, mean starting bid and summed award per key, plus a `Total` row.
pub fn pivot(outcomes: &[AuctionOutcome], dimension: Dimension) -> Pivot {
    let mut groups: HashMap<String, Acc> = HashMap::new();
    let mut total = Acc::default();

    for o in outcomes {
        groups.entry(dimension.key(o)).or_default().add(o);
        total.add(o);
    }

    let mut rows: Vec<PivotRow> = groups.into_iter().map(|(k, acc)| acc.row(k)).collect();
    rows.sort_by(|a, b| dimension.compare(&a.key, &b.key));
    rows.push(total.row(TOTAL_KEY.to_string()));

    Pivot { dimension, rows }
}

pub fn strats(outcomes: &[AuctionOutcome]) -> Vec<Pivot> {
    Dimension::ALL.iter().map(|d| pivot(outcomes, *d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OUTCOME_ERROR_KEY, ReferenceEntity};
    use crate::reconcile::tests::{detail, raw};

    fn record(bid: &str, auction_date: &str, hastener: &str) -> ReconciledRecord {
        let mut d = detail("https://example.org/a", "1", "20/03/2024");
        d.listing.starting_bid = bid.to_string();
        d.listing.auction_date = auction_date.to_string();
        d.hastener_name = hastener.to_string();
        ReconciledRecord {
            detail: d,
            reference: ReferenceEntity {
                tax_id: 1,
                attributes: raw("1", "Frame Servicing"),
            },
        }
    }

    fn state(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn outcome_amounts() {
        let o = build_outcome(
            record("10.000,00 €", "20/03/2024", "ALPHA"),
            state(&[(STATUS_LABEL, "Completed"), (AWARD_LABEL, "12.500,50 €")]),
        );
        assert_eq!(o.min_bid, 10000.0);
        assert_eq!(o.award, Some(12500.5));

        let missing = build_outcome(record("n/a", "20/03/2024", "ALPHA"), state(&[]));
        assert_eq!(missing.min_bid, -1.0);
        assert_eq!(missing.award, None);

        let failed = build_outcome(
            record("1,00 €", "20/03/2024", "ALPHA"),
            state(&[(OUTCOME_ERROR_KEY, NOT_AVAILABLE)]),
        );
        assert!(failed.is_error());
    }

    #[test]
    fn pivot_by_status_with_total() {
        let outcomes = enrich(
            vec![
                record("10.000,00 €", "20/03/2024", "ALPHA"),
                record("20.000,00 €", "21/03/2024", "ALPHA"),
                record("30.000,00 €", "21/03/2024", "BETA"),
            ],
            vec![
                state(&[(STATUS_LABEL, "Completed"), (AWARD_LABEL, "15.000,00 €")]),
                state(&[(STATUS_LABEL, "Unsuccessful")]),
                state(&[(STATUS_LABEL, "Completed"), (AWARD_LABEL, "35.000,00 €")]),
            ],
        );

        let p = pivot(&outcomes, Dimension::Status);
        assert_eq!(p.rows.len(), 3);

        assert_eq!(p.rows[0].key, "Completed");
        assert_eq!(p.rows[0].auctions, 2);
        assert_eq!(p.rows[0].avg_starting_bid, 20000.0);
        assert_eq!(p.rows[0].award_sum, 50000.0);

        assert_eq!(p.rows[1].key, "Unsuccessful");
        assert_eq!(p.rows[1].award_sum, 0.0);

        let total = p.total().unwrap();
        assert_eq!(total.key, TOTAL_KEY);
        assert_eq!(total.auctions, 3);
        assert_eq!(total.avg_starting_bid, 20000.0);
        assert_eq!(total.award_sum, 50000.0);
    }

    #[test]
    fn dates_sort_chronologically() {
        let outcomes = enrich(
            vec![
                record("1", "02/04/2024", "A"),
                record("1", "28/03/2024", "A"),
                record("1", "n/a", "A"),
            ],
            vec![state(&[]), state(&[]), state(&[])],
        );
        let keys: Vec<_> = pivot(&outcomes, Dimension::AuctionDate)
            .rows
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["28/03/2024", "02/04/2024", "n/a", TOTAL_KEY]);
    }

    #[test]
    fn reference_attributes_drive_servicer_pivots() {
        let outcomes = enrich(vec![record("1", "20/03/2024", "A")], vec![state(&[])]);
        let all = strats(&outcomes);
        assert_eq!(all.len(), 5);

        let servicer = all.iter().find(|p| p.dimension == Dimension::Servicer).unwrap();
        assert_eq!(servicer.rows[0].key, "Frame Servicing");

        // no status label on the page
        let status = &all[0];
        assert_eq!(status.rows[0].key, NOT_AVAILABLE);
    }

    #[test]
    fn empty_input_has_zero_total() {
        let p = pivot(&[], Dimension::Hastener);
        assert_eq!(p.rows.len(), 1);
        assert_eq!(p.rows[0].auctions, 0);
        assert_eq!(p.rows[0].avg_starting_bid, 0.0);
    }
}
