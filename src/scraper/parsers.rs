use crate::models::{DetailRecord, ListingRecord};
use crate::scraper::ParseError;
use crate::scraper::cleaner::{
    clean_text, label_value, or_sentinel, parse_page_total, split_object_and_region,
    split_posting,
};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

// ── Index page ────────────────────────────────────────────────────────────────

static CARD: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxContainer"));
static CARD_STATUS: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxheaderLeft"));
static CARD_PRICE: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxTextPrice"));
static CARD_DEBTOR: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxMainCell3"));
static CARD_OBJECT: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxMainCell4"));
static CARD_DATE: LazyLock<Selector> = LazyLock::new(|| selector(".DateIcon"));
static CARD_TIME: LazyLock<Selector> = LazyLock::new(|| selector(".TimeIcon"));
static CARD_FOOTER: LazyLock<Selector> = LazyLock::new(|| selector(".AList-BoxFooterLeft"));
static CARD_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.AList-BoxFooterMore"));
static PAGE_CURRENT: LazyLock<Selector> = LazyLock::new(|| selector(".AList-GridPageCurrent"));

/// Cleaned text of the first element under `el` matching `sel`.
fn class_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|found| clean_text(&found.text().collect::<String>()))
}

/// One record per auction card. A card never fails as a whole: each field
/// falls back to the sentinel on its own.
pub fn parse_listing_page(html: &str, base: &Url) -> Vec<ListingRecord> {
    let doc = Html::parse_document(html);
    doc.select(&CARD).map(|card| parse_card(card, base)).collect()
}

fn parse_card(card: ElementRef<'_>, base: &Url) -> ListingRecord {
    let object_block = class_text(card, &CARD_OBJECT);
    let (object_to_be_auctioned, regional_unit) = split_object_and_region(object_block.as_deref());

    let footer = class_text(card, &CARD_FOOTER);
    let (date_of_posting, unique_code, member_of_auction) = split_posting(footer.as_deref());

    ListingRecord {
        status: or_sentinel(class_text(card, &CARD_STATUS).as_deref().and_then(label_value)),
        starting_bid: or_sentinel(class_text(card, &CARD_PRICE)),
        debtor: or_sentinel(class_text(card, &CARD_DEBTOR).as_deref().and_then(label_value)),
        auction_date: or_sentinel(class_text(card, &CARD_DATE)),
        auction_time: or_sentinel(class_text(card, &CARD_TIME)),
        object_to_be_auctioned,
        regional_unit,
        date_of_posting,
        unique_code,
        member_of_auction,
        link: or_sentinel(card_link(card, base)),
    }
}

fn card_link(card: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = card.select(&CARD_LINK).next()?.value().attr("href")?;
    match base.join(href.trim()) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!("Unresolvable listing link {:?}: {}", href, e);
            None
        }
    }
}

/// Total page count from the "current of total" indicator.
pub fn parse_page_count(html: &str) -> Result<u32, ParseError> {
    let doc = Html::parse_document(html);
    let text = doc
        .select(&PAGE_CURRENT)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
        .ok_or(ParseError::MissingPageCount)?;

    parse_page_total(&text).ok_or(ParseError::MalformedPageCount(text))
}

// ── Detail page ───────────────────────────────────────────────────────────────

static DETAIL_RIGHT: LazyLock<Selector> = LazyLock::new(|| selector(".AuctionDetailsDivR"));
static DETAIL_BLOCK: LazyLock<Selector> = LazyLock::new(|| selector(".AuctionDetailsDiv"));
static LABEL: LazyLock<Selector> = LazyLock::new(|| selector("label"));
static INPUT: LazyLock<Selector> = LazyLock::new(|| selector("label.ADetailsinput"));
static INPUT_CELL: LazyLock<Selector> = LazyLock::new(|| selector("label.ADetailsinput3Cell"));
static INPUT_DATE: LazyLock<Selector> = LazyLock::new(|| selector("label.ADetailsinputDateOn"));

const VAT_LABELS: [&str; 2] = ["Debtors' Vat Numbers", "Debtor`s VAT Number"];
const NAME_LABELS: [&str; 2] = ["Debtors' Names and Surnames", "Debtor`s Name and Surname"];
const CONDUCTION_LABEL: &str = "Date of Conduction";
const UNIQUE_CODE_LABEL: &str = "Unique Code";
const HASTENER_LABEL: &str = "Hastener";
const NAMES_FIELD: &str = "debtor names";
const VATS_FIELD: &str = "debtor VAT numbers";

/// Fields read from a listing's own page, before pairing with the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailFields {
    pub debtor_names: Vec<String>,
    pub debtor_vats: Vec<String>,
    pub date_of_conduct: String,
    pub unique_code: String,
    pub hastener_name: String,
}

/// Per-page extraction state; every slot starts empty and is filled once.
#[derive(Debug, Default)]
struct FoundLabels {
    debtor_names: Option<Vec<String>>,
    debtor_vats: Option<Vec<String>>,
    date_of_conduct: Option<String>,
    unique_code: Option<String>,
    hastener_name: Option<String>,
    /// Labels seen without their value element.
    bare: Vec<&'static str>,
}

fn fill<T>(
    slot: &mut Option<T>,
    bare: &mut Vec<&'static str>,
    label: &'static str,
    value: Option<T>,
) {
    match (slot.is_some(), value) {
        (false, Some(v)) => *slot = Some(v),
        (true, Some(_)) => debug!("Ignoring repeated label {:?}", label),
        (_, None) => {
            debug!("Label {:?} present without a value", label);
            bare.push(label);
        }
    }
}

fn required<T>(
    slot: Option<T>,
    bare: &[&'static str],
    label: &'static str,
) -> Result<T, ParseError> {
    slot.ok_or(if bare.contains(&label) {
        ParseError::MissingValue(label)
    } else {
        ParseError::MissingLabel(label)
    })
}

fn block_label(block: ElementRef<'_>) -> Option<String> {
    block.select(&LABEL).next().map(|l| {
        l.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn all_texts(block: ElementRef<'_>, sel: &Selector) -> Vec<String> {
    block
        .select(sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .collect()
}

fn first_text(block: ElementRef<'_>, sel: &Selector) -> Option<String> {
    block
        .select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Extract the detail fields. Fails with the first required label that
/// never appeared on the page.
pub fn parse_detail_page(html: &str) -> Result<DetailFields, ParseError> {
    let doc = Html::parse_document(html);
    let mut found = FoundLabels::default();

    for block in doc.select(&DETAIL_RIGHT) {
        let Some(label) = block_label(block) else { continue };
        if VAT_LABELS.contains(&label.as_str()) {
            let vats = Some(all_texts(block, &INPUT));
            fill(&mut found.debtor_vats, &mut found.bare, VATS_FIELD, vats);
        }
    }

    for block in doc.select(&DETAIL_BLOCK) {
        let Some(label) = block_label(block) else { continue };
        match label.as_str() {
            l if NAME_LABELS.contains(&l) => {
                let names = Some(all_texts(block, &INPUT_CELL));
                fill(&mut found.debtor_names, &mut found.bare, NAMES_FIELD, names);
            }
            CONDUCTION_LABEL => {
                let date = first_text(block, &INPUT_DATE);
                fill(&mut found.date_of_conduct, &mut found.bare, CONDUCTION_LABEL, date);
            }
            UNIQUE_CODE_LABEL => {
                let code = first_text(block, &INPUT);
                fill(&mut found.unique_code, &mut found.bare, UNIQUE_CODE_LABEL, code);
            }
            HASTENER_LABEL => {
                let name = first_text(block, &INPUT_CELL);
                fill(&mut found.hastener_name, &mut found.bare, HASTENER_LABEL, name);
            }
            _ => {}
        }
    }

    let bare = &found.bare;
    Ok(DetailFields {
        debtor_names: required(found.debtor_names, bare, NAMES_FIELD)?,
        debtor_vats: required(found.debtor_vats, bare, VATS_FIELD)?,
        date_of_conduct: required(found.date_of_conduct, bare, CONDUCTION_LABEL)?,
        unique_code: required(found.unique_code, bare, UNIQUE_CODE_LABEL)?,
        hastener_name: required(found.hastener_name, bare, HASTENER_LABEL)?,
    })
}

/// Pair the Nth debtor name with the Nth VAT number, one record per debtor.
pub fn pair_debtors(
    listing: &ListingRecord,
    fields: DetailFields,
) -> Result<Vec<DetailRecord>, ParseError> {
    let (names, vats) = (fields.debtor_names.len(), fields.debtor_vats.len());
    if names != vats {
        return Err(ParseError::DebtorCountMismatch { names, vats });
    }
    if names == 0 {
        return Err(ParseError::NoDebtors);
    }

    Ok(fields
        .debtor_names
        .into_iter()
        .zip(fields.debtor_vats)
        .map(|(debtor_name, debtor_vat)| DetailRecord {
            listing: listing.clone(),
            debtor_name: or_sentinel(Some(debtor_name)),
            debtor_vat: or_sentinel(Some(debtor_vat)),
            date_of_conduct: or_sentinel(Some(fields.date_of_conduct.clone())),
            unique_code_1: or_sentinel(Some(fields.unique_code.clone())),
            hastener_name: or_sentinel(Some(fields.hastener_name.clone())),
        })
        .collect())
}

// ── Outcome block ─────────────────────────────────────────────────────────────

static STATE_BOX: LazyLock<Selector> = LazyLock::new(|| selector(".StateBox"));
static STATE_LABEL: LazyLock<Selector> = LazyLock::new(|| selector(".Statelabel"));
static STATE_VALUE: LazyLock<Selector> = LazyLock::new(|| selector(".StateValue"));

/// Label → value pairs from the concluded-auction state box.
pub fn parse_outcome(html: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let doc = Html::parse_document(html);
    let state = doc.select(&STATE_BOX).next().ok_or(ParseError::MissingOutcome)?;

    let labels = all_texts(state, &STATE_LABEL);
    let values = all_texts(state, &STATE_VALUE);
    if labels.len() > values.len() {
        return Err(ParseError::OutcomeMismatch {
            labels: labels.len(),
            values: values.len(),
        });
    }

    Ok(labels.into_iter().zip(values).collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{MANUAL_REVIEW, NOT_AVAILABLE};

    pub const BASE: &str = "https://www.eauction.gr/en/Home/HlektronikoiPleistiriasmoi";

    pub fn card(status: &str, price: Option<&str>, object: &str, link: &str) -> String {
        let price = price
            .map(|p| format!(r#"<div class="AList-BoxTextPrice">{p}</div>"#))
            .unwrap_or_default();
        format!(
            r#"<div class="AList-BoxContainer">
                <div class="AList-BoxheaderLeft">{status}</div>
                {price}
                <div class="AList-BoxMainCell3">Debtor: PAPADOPOULOS GEORGIOS</div>
                <div class="AList-BoxMainCell4">{object}</div>
                <span class="DateIcon">20/03/2024</span>
                <span class="TimeIcon">10:00</span>
                <div class="AList-BoxFooterLeft">Date of Posting: 12/03/2024
                    Unique Code: 291234 Member of auction: 1</div>
                <a class="AList-BoxFooterMore" href="{link}">More</a>
            </div>"#
        )
    }

    pub fn index_page(cards: &[String], indicator: Option<&str>) -> String {
        let indicator = indicator
            .map(|i| format!(r#"<span class="AList-GridPageCurrent">{i}</span>"#))
            .unwrap_or_default();
        format!("<html><body>{}{}</body></html>", cards.join("\n"), indicator)
    }

    pub fn detail_page(names: &[&str], vats: &[&str], plural: bool) -> String {
        let (name_label, vat_label) = if plural {
            (NAME_LABELS[0], VAT_LABELS[0])
        } else {
            (NAME_LABELS[1], VAT_LABELS[1])
        };
        let names: String = names
            .iter()
            .map(|n| format!(r#"<label class="ADetailsinput3Cell">{n}</label>"#))
            .collect();
        let vats: String = vats
            .iter()
            .map(|v| format!(r#"<label class="ADetailsinput"> {v} </label>"#))
            .collect();
        format!(
            r#"<html><body>
            <div class="AuctionDetailsDiv"><label>{name_label}</label>{names}</div>
            <div class="AuctionDetailsDivR"><label>{vat_label}</label>{vats}</div>
            <div class="AuctionDetailsDiv"><label>Date of Conduction</label>
                <label class="ADetailsinputDateOn">20/03/2024</label></div>
            <div class="AuctionDetailsDiv"><label>Unique Code</label>
                <label class="ADetailsinput">291234</label></div>
            <div class="AuctionDetailsDiv"><label>Hastener</label>
                <label class="ADetailsinput3Cell">ALPHA BANK</label></div>
            </body></html>"#
        )
    }

    fn base() -> Url {
        Url::parse(BASE).unwrap()
    }

    #[test]
    fn parses_well_formed_card() {
        let html = index_page(
            &[card(
                "Status: Active",
                Some("12.500,00\u{a0}€"),
                "Object: Apartment Regional Unit: Attica",
                "/en/Home/AuctionDetails/1001",
            )],
            None,
        );
        let rows = parse_listing_page(&html, &base());
        assert_eq!(rows.len(), 1);

        let r = &rows[0];
        assert_eq!(r.status, "Active");
        assert_eq!(r.starting_bid, "12.500,00€");
        assert_eq!(r.debtor, "PAPADOPOULOS GEORGIOS");
        assert_eq!(r.auction_date, "20/03/2024");
        assert_eq!(r.auction_time, "10:00");
        assert_eq!(r.object_to_be_auctioned, "Apartment");
        assert_eq!(r.regional_unit, "Attica");
        assert_eq!(r.date_of_posting, "12/03/2024");
        assert_eq!(r.unique_code, "291234");
        assert_eq!(r.member_of_auction, "1");
        assert_eq!(r.link, "https://www.eauction.gr/en/Home/AuctionDetails/1001");
    }

    #[test]
    fn missing_fields_fall_back_per_field() {
        let html = index_page(
            &[card("Active without colon", None, "Object: Apartment", "/a/1")],
            None,
        );
        let r = &parse_listing_page(&html, &base())[0];
        assert_eq!(r.status, NOT_AVAILABLE);
        assert_eq!(r.starting_bid, NOT_AVAILABLE);
        assert_eq!(r.object_to_be_auctioned, NOT_AVAILABLE);
        assert_eq!(r.regional_unit, NOT_AVAILABLE);
        // untouched by the broken fields
        assert_eq!(r.debtor, "PAPADOPOULOS GEORGIOS");
        assert_eq!(r.unique_code, "291234");
    }

    #[test]
    fn empty_card_is_all_sentinel() {
        let html = r#"<div class="AList-BoxContainer"></div>"#;
        let rows = parse_listing_page(html, &base());
        assert_eq!(rows, vec![ListingRecord::default()]);
    }

    #[test]
    fn page_count_from_indicator() {
        assert_eq!(parse_page_count(&index_page(&[], Some("1 of 7"))).unwrap(), 7);
        assert!(matches!(
            parse_page_count(&index_page(&[], None)),
            Err(ParseError::MissingPageCount)
        ));
        assert!(matches!(
            parse_page_count(&index_page(&[], Some("page one"))),
            Err(ParseError::MalformedPageCount(_))
        ));
    }

    #[test]
    fn detail_page_accepts_both_label_spellings() {
        for plural in [true, false] {
            let html = detail_page(&["A", "B"], &["094000001", "094000002"], plural);
            let fields = parse_detail_page(&html).unwrap();
            assert_eq!(fields.debtor_names, vec!["A", "B"]);
            assert_eq!(fields.debtor_vats, vec!["094000001", "094000002"]);
            assert_eq!(fields.date_of_conduct, "20/03/2024");
            assert_eq!(fields.unique_code, "291234");
            assert_eq!(fields.hastener_name, "ALPHA BANK");
        }
    }

    #[test]
    fn pairs_debtors_by_position() {
        let listing = ListingRecord {
            link: "https://example.org/1".into(),
            ..Default::default()
        };
        let fields = parse_detail_page(&detail_page(&["A", "B"], &["1", "2"], true)).unwrap();
        let rows = pair_debtors(&listing, fields).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].debtor_name.as_str(), rows[0].debtor_vat.as_str()), ("A", "1"));
        assert_eq!((rows[1].debtor_name.as_str(), rows[1].debtor_vat.as_str()), ("B", "2"));
        assert!(rows.iter().all(|r| r.listing == listing && r.debtor_name != MANUAL_REVIEW));
    }

    #[test]
    fn unequal_debtor_counts_are_rejected() {
        let fields = parse_detail_page(&detail_page(&["A", "B"], &["1"], true)).unwrap();
        assert!(matches!(
            pair_debtors(&ListingRecord::default(), fields),
            Err(ParseError::DebtorCountMismatch { names: 2, vats: 1 })
        ));
    }

    #[test]
    fn missing_label_is_reported() {
        let html = detail_page(&["A"], &["1"], true).replace("Hastener", "Something else");
        assert!(matches!(
            parse_detail_page(&html),
            Err(ParseError::MissingLabel(HASTENER_LABEL))
        ));

        assert!(matches!(
            parse_detail_page("<html><body><p>Not found</p></body></html>"),
            Err(ParseError::MissingLabel(_))
        ));
    }

    #[test]
    fn label_without_value_is_told_apart() {
        let html = detail_page(&["A"], &["1"], true).replace("ADetailsinputDateOn", "Blank");
        let err = parse_detail_page(&html).unwrap_err();
        assert!(matches!(err, ParseError::MissingValue(CONDUCTION_LABEL)));
        assert_eq!(err.to_string(), r#"label "Date of Conduction" present without a value"#);
    }

    #[test]
    fn first_occurrence_of_a_label_wins() {
        let html = detail_page(&["A"], &["1"], true).replace(
            "</body>",
            r#"<div class="AuctionDetailsDiv"><label>Hastener</label>
               <label class="ADetailsinput3Cell">OTHER</label></div></body>"#,
        );
        assert_eq!(parse_detail_page(&html).unwrap().hastener_name, "ALPHA BANK");
    }

    #[test]
    fn outcome_box_pairs_labels_and_values() {
        let html = r#"<div class="StateBox">
            <span class="Statelabel">Status:</span><span class="StateValue">Completed</span>
            <span class="Statelabel">Award ammount:</span><span class="StateValue">15.000,00 €</span>
        </div>"#;
        let state = parse_outcome(html).unwrap();
        assert_eq!(state["Status:"], "Completed");
        assert_eq!(state["Award ammount:"], "15.000,00 €");

        assert!(matches!(parse_outcome("<p></p>"), Err(ParseError::MissingOutcome)));
    }

    #[test]
    fn outcome_with_unmatched_label_is_rejected() {
        let html = r#"<div class="StateBox">
            <span class="Statelabel">Status:</span><span class="StateValue">Completed</span>
            <span class="Statelabel">Award ammount:</span>
        </div>"#;
        assert!(matches!(
            parse_outcome(html),
            Err(ParseError::OutcomeMismatch { labels: 2, values: 1 })
        ));
    }
}
