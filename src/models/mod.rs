use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder for any field the page did not provide.
pub const NOT_AVAILABLE: &str = "n/a";

/// Debtor name carried by records that operations staff must resolve by hand.
pub const MANUAL_REVIEW: &str = "please check manually";

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

// ── Query window ──────────────────────────────────────────────────────────────

/// Inclusive posting-date range a run covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl QueryWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Yesterday only, or Friday..Sunday when `today` is a Monday.
    pub fn daily(today: NaiveDate) -> Self {
        let to = today - Duration::days(1);
        let from = if today.weekday() == Weekday::Mon {
            today - Duration::days(3)
        } else {
            to
        };
        Self { from, to }
    }

    /// Monday..Sunday of the week that contains `reference - 7 days`.
    pub fn previous_week(reference: NaiveDate) -> Self {
        let dt = reference - Duration::days(7);
        let from = dt - Duration::days(dt.weekday().num_days_from_monday() as i64);
        Self {
            from,
            to: from + Duration::days(6),
        }
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

// ── Index card ────────────────────────────────────────────────────────────────

/// One auction card from an index page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub status: String,
    pub starting_bid: String,
    pub debtor: String,
    pub auction_date: String,
    pub auction_time: String,
    pub object_to_be_auctioned: String,
    pub regional_unit: String,
    pub date_of_posting: String,
    pub unique_code: String,
    pub member_of_auction: String,
    pub link: String,
}

impl Default for ListingRecord {
    fn default() -> Self {
        Self {
            status: not_available(),
            starting_bid: not_available(),
            debtor: not_available(),
            auction_date: not_available(),
            auction_time: not_available(),
            object_to_be_auctioned: not_available(),
            regional_unit: not_available(),
            date_of_posting: not_available(),
            unique_code: not_available(),
            member_of_auction: not_available(),
            link: not_available(),
        }
    }
}

impl ListingRecord {
    pub const COLUMNS: [&'static str; 11] = [
        "status",
        "starting_bid",
        "debtor",
        "auction_date",
        "auction_time",
        "object_to_be_auctioned",
        "regional_unit",
        "date_of_posting",
        "unique_code",
        "member_of_auction",
        "link",
    ];

    pub fn values(&self) -> [&str; 11] {
        [
            self.status.as_str(),
            self.starting_bid.as_str(),
            self.debtor.as_str(),
            self.auction_date.as_str(),
            self.auction_time.as_str(),
            self.object_to_be_auctioned.as_str(),
            self.regional_unit.as_str(),
            self.date_of_posting.as_str(),
            self.unique_code.as_str(),
            self.member_of_auction.as_str(),
            self.link.as_str(),
        ]
    }

    pub fn has_link(&self) -> bool {
        self.link != NOT_AVAILABLE
    }
}

// ── Detail row ────────────────────────────────────────────────────────────────

/// A listing paired with one of the debtors named on its detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRecord {
    #[serde(flatten)]
    pub listing: ListingRecord,
    pub debtor_name: String,
    pub debtor_vat: String,
    pub date_of_conduct: String,
    pub unique_code_1: String,
    pub hastener_name: String,
}

impl DetailRecord {
    pub const DETAIL_COLUMNS: [&'static str; 5] = [
        "debtor_name",
        "debtor_vat",
        "date_of_conduct",
        "unique_code_1",
        "hastener_name",
    ];

    /// Sentinel row standing in for a listing whose detail page could not be read.
    pub fn manual_review(listing: ListingRecord) -> Self {
        Self {
            listing,
            debtor_name: MANUAL_REVIEW.to_string(),
            debtor_vat: not_available(),
            date_of_conduct: not_available(),
            unique_code_1: not_available(),
            hastener_name: not_available(),
        }
    }

    pub fn needs_manual_review(&self) -> bool {
        self.debtor_name == MANUAL_REVIEW
    }

    pub fn columns() -> Vec<&'static str> {
        ListingRecord::COLUMNS
            .iter()
            .chain(Self::DETAIL_COLUMNS.iter())
            .copied()
            .collect()
    }

    pub fn values(&self) -> Vec<&str> {
        let mut values = self.listing.values().to_vec();
        values.extend([
            self.debtor_name.as_str(),
            self.debtor_vat.as_str(),
            self.date_of_conduct.as_str(),
            self.unique_code_1.as_str(),
            self.hastener_name.as_str(),
        ]);
        values
    }
}

// ── Reference data ────────────────────────────────────────────────────────────

/// A known debtor from one of the business reference tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceEntity {
    pub tax_id: i64,
    /// Every source column, the identifier column included, as text.
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTable {
    pub name: String,
    pub id_column: String,
    pub rows: Vec<ReferenceEntity>,
}

/// Inner-join result of a detail row and a reference row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciledRecord {
    pub detail: DetailRecord,
    pub reference: ReferenceEntity,
}

// ── Auction outcome ───────────────────────────────────────────────────────────

/// Marker stored under `error` when a detail page had no readable outcome block.
pub const OUTCOME_ERROR_KEY: &str = "error";

/// A reconciled record revisited after its auction concluded.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuctionOutcome {
    pub record: ReconciledRecord,
    /// Outcome labels exactly as printed on the page, e.g. `Status:`.
    pub state: BTreeMap<String, String>,
    pub min_bid: f64,
    /// `None` when the page carried no award amount at all.
    pub award: Option<f64>,
}

impl AuctionOutcome {
    pub fn is_error(&self) -> bool {
        self.state.contains_key(OUTCOME_ERROR_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn daily_window_spans_weekend_on_monday() {
        // 2024-03-18 is a Monday
        let w = QueryWindow::daily(d(2024, 3, 18));
        assert_eq!(w, QueryWindow::new(d(2024, 3, 15), d(2024, 3, 17)));

        let w = QueryWindow::daily(d(2024, 3, 20));
        assert_eq!(w, QueryWindow::new(d(2024, 3, 19), d(2024, 3, 19)));
    }

    #[test]
    fn previous_week_is_monday_to_sunday() {
        let w = QueryWindow::previous_week(d(2024, 3, 18));
        assert_eq!(w, QueryWindow::new(d(2024, 3, 11), d(2024, 3, 17)));

        let w = QueryWindow::previous_week(d(2024, 3, 21));
        assert_eq!(w, QueryWindow::new(d(2024, 3, 11), d(2024, 3, 17)));
    }

    #[test]
    fn listing_defaults_to_sentinel() {
        let l = ListingRecord::default();
        assert!(l.values().iter().all(|v| *v == NOT_AVAILABLE));
        assert!(!l.has_link());
    }

    #[test]
    fn manual_review_keeps_listing() {
        let listing = ListingRecord {
            starting_bid: "10.000,00 €".into(),
            link: "https://example.org/a/1".into(),
            ..Default::default()
        };
        let row = DetailRecord::manual_review(listing.clone());
        assert!(row.needs_manual_review());
        assert_eq!(row.listing, listing);
        assert_eq!(row.debtor_vat, NOT_AVAILABLE);
        assert_eq!(DetailRecord::columns().len(), row.values().len());
    }
}
