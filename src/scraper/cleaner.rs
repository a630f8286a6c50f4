use crate::models::NOT_AVAILABLE;
use chrono::{NaiveDate, NaiveDateTime};

// ── Text ──────────────────────────────────────────────────────────────────────

/// Drop non-breaking spaces and newlines, then trim.
/// "Status:\u{a0}Active\n" → "Status:Active"
pub fn clean_text(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '\u{a0}' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn or_sentinel(value: Option<String>) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Value half of a "Label: Value" block, `None` when there is no colon.
/// "Status: Active" → "Active"
pub fn label_value(block: &str) -> Option<String> {
    let (_, value) = block.split_once(':')?;
    let value = value.trim();
    if value.is_empty() { None } else { Some(value.to_string()) }
}

/// Split "Object: Land plot Regional Unit: Attica" into (object, regional unit).
/// Both halves are the sentinel when either separator is missing.
pub fn split_object_and_region(block: Option<&str>) -> (String, String) {
    let parsed = block.and_then(|b| {
        let (object, region) = b.split_once("Regional Unit:")?;
        Some((label_value(object)?, region.trim().to_string()))
    });

    match parsed {
        Some((object, region)) => (object, or_sentinel(Some(region))),
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
    }
}

/// Split the card footer "Date of Posting: 12/03/2024 Unique Code: 123 Member of auction..."
/// into (date of posting, unique code, member of auction).
pub fn split_posting(block: Option<&str>) -> (String, String, String) {
    let sentinel = || {
        (
            NOT_AVAILABLE.to_string(),
            NOT_AVAILABLE.to_string(),
            NOT_AVAILABLE.to_string(),
        )
    };

    let Some(block) = block else { return sentinel() };
    let Some((posting, code)) = block.split_once("Unique Code:") else {
        return sentinel();
    };

    let date_of_posting = or_sentinel(label_value(posting));
    let (unique_code, member) = match code.split_once("Member of auction") {
        Some((code, member)) => {
            let member = member.trim().trim_start_matches(':').trim().to_string();
            (code.trim().to_string(), Some(member))
        }
        None => (code.trim().to_string(), None),
    };

    (date_of_posting, or_sentinel(Some(unique_code)), or_sentinel(member))
}

/// Total from a "current of total" indicator. "3 of 12" → 12
pub fn parse_page_total(s: &str) -> Option<u32> {
    let (_, total) = s.split_once("of")?;
    total.trim().parse().ok()
}

// ── Numbers ───────────────────────────────────────────────────────────────────

/// Returned for amounts that cannot be read as a number.
pub const AMOUNT_UNPARSEABLE: f64 = -1.0;

/// Euro-formatted amount to a float.
/// "1.234,56 €" → 1234.56 | "" → -1 | "n/a" → -1
pub fn parse_amount(s: &str) -> f64 {
    let cleaned = s.replace('€', "").replace('.', "").replace(',', ".");
    cleaned.trim().parse().unwrap_or(AMOUNT_UNPARSEABLE)
}

/// Tax identifier as an integer, accepting integral float spellings.
/// "094123456" → 94123456 | "123.0" → 123 | "N/A" → None
pub fn coerce_tax_id(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let f: f64 = s.parse().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Day-first site dates: "20/03/2024", "20/03/2024 10:00", or ISO.
pub fn parse_site_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%d/%m/%Y %H:%M") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%d/%m/%Y %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }

    None
}

/// Site date format, as used in index query parameters.
pub fn format_site_date(d: NaiveDate) -> String {
    d.format("%d/%m/%Y").to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
