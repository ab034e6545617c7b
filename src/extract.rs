//! Multi-strategy field extraction over raw listing pages.
//!
//! Strategies run in trust order: embedded structured payload first,
//! structural markup second, free-text regex last. The first strategy to
//! produce a value for a field wins; later strategies only fill what is
//! still missing. Extraction never fails; a page that matches nothing
//! yields an empty record.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::deepsearch::{as_f64, as_i64, as_string, deep_find_field, find_object};
use crate::models::{PropertyRecord, RawContent};

static EXTERNAL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+)_zpid").unwrap());

/// Pull the source-assigned listing id out of a detail-page URL.
pub fn external_id_from_url(url: &str) -> Option<String> {
    EXTERNAL_ID_RE
        .captures(url)
        .map(|c| c[1].to_string())
}

pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, content: &RawContent) -> PropertyRecord {
        let mut record = PropertyRecord::default();

        if let Some(url) = &content.source_url {
            record.source_url = Some(url.clone());
            record.external_id = external_id_from_url(url);
        }
        if record.external_id.is_none() && content.key.chars().all(|c| c.is_ascii_digit()) {
            record.external_id = Some(content.key.clone());
        }

        let document = Html::parse_document(&content.body);

        if let Some(payload) = embedded_payload(&document) {
            record.merge_missing(from_payload(&payload));
        }
        record.merge_missing(from_markup(&document));
        record.merge_missing(from_text(&content.body));

        record
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

// ---- strategy 1: embedded structured payload ----

static NEXT_DATA_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script#__NEXT_DATA__").unwrap());

/// Parse the hydration payload script tag, unwrapping the stringified
/// client-cache blob when present so its contents are searchable too.
fn embedded_payload(document: &Html) -> Option<Value> {
    let script = document.select(&NEXT_DATA_SEL).next()?;
    let text: String = script.text().collect();
    let mut payload: Value = serde_json::from_str(text.trim()).ok()?;

    if let Some(cache_str) = deep_find_field(&payload, "gdpClientCache").and_then(|v| v.as_str()) {
        if let Ok(unwrapped) = serde_json::from_str::<Value>(cache_str) {
            if let Some(map) = payload.as_object_mut() {
                map.insert("gdpClientCacheParsed".to_string(), unwrapped);
            }
        }
    }

    Some(payload)
}

fn from_payload(payload: &Value) -> PropertyRecord {
    let mut record = PropertyRecord::default();

    // Anchor on the property object itself rather than the whole document,
    // so sibling listings ("similar homes" carousels) cannot bleed in.
    let root = find_object(payload, &|m| {
        m.contains_key("zpid") && (m.contains_key("price") || m.contains_key("homeStatus"))
    })
    .unwrap_or(payload);

    record.external_id = deep_find_field(root, "zpid").and_then(as_string);
    record.address = deep_find_field(root, "streetAddress").and_then(as_string);
    record.city = deep_find_field(root, "city").and_then(as_string);
    record.state = deep_find_field(root, "state").and_then(as_string);
    record.zip_code = deep_find_field(root, "zipcode").and_then(as_string);
    record.latitude = deep_find_field(root, "latitude").and_then(as_f64);
    record.longitude = deep_find_field(root, "longitude").and_then(as_f64);
    record.price = deep_find_field(root, "price").and_then(as_i64);
    record.estimated_value = deep_find_field(root, "zestimate").and_then(as_i64);
    record.monthly_fee = deep_find_field(root, "monthlyHoaFee").and_then(as_i64);
    record.bedrooms = deep_find_field(root, "bedrooms").and_then(as_f64);
    record.bathrooms = deep_find_field(root, "bathrooms").and_then(as_f64);
    record.living_area_sqft = deep_find_field(root, "livingArea").and_then(as_i64);
    record.lot_area_value = deep_find_field(root, "lotAreaValue").and_then(as_f64);
    record.lot_area_units = deep_find_field(root, "lotAreaUnits").and_then(as_string);
    record.year_built = deep_find_field(root, "yearBuilt").and_then(as_i64);
    record.property_subtype = deep_find_field(root, "homeType").and_then(as_string);
    record.status = deep_find_field(root, "homeStatus").and_then(as_string);
    record.days_listed = deep_find_field(root, "daysOnMarket").and_then(as_i64);
    record.view_count = deep_find_field(root, "pageViewCount").and_then(as_i64);
    record.favorite_count = deep_find_field(root, "favoriteCount").and_then(as_i64);
    record.raw_description = deep_find_field(root, "description").and_then(as_string);

    record.price_history = deep_find_field(root, "priceHistory")
        .filter(|v| v.is_array())
        .map(|v| v.to_string());

    record
}

// ---- strategy 2: structural markup ----

static META_DESC_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static OG_TITLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static ADDRESS_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h1, address").unwrap());

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?),\s*([A-Za-z .'-]+),\s*([A-Z]{2})\s+(\d{5})").unwrap()
});

fn from_markup(document: &Html) -> PropertyRecord {
    let mut record = PropertyRecord::default();

    let title = document
        .select(&OG_TITLE_SEL)
        .next()
        .and_then(|m| m.value().attr("content").map(str::to_string))
        .or_else(|| {
            document
                .select(&TITLE_SEL)
                .next()
                .map(|t| t.text().collect::<String>())
        });

    let heading = document
        .select(&ADDRESS_SEL)
        .next()
        .map(|h| h.text().collect::<String>());

    for candidate in [heading, title].into_iter().flatten() {
        if let Some(caps) = ADDRESS_RE.captures(candidate.trim()) {
            record.address = Some(caps[1].trim().to_string());
            record.city = Some(caps[2].trim().to_string());
            record.state = Some(caps[3].to_string());
            record.zip_code = Some(caps[4].to_string());
            break;
        }
    }

    if record.raw_description.is_none() {
        record.raw_description = document
            .select(&META_DESC_SEL)
            .next()
            .and_then(|m| m.value().attr("content"))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    record
}

// ---- strategy 3: regex over free text ----

static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([\d,]{4,})").unwrap());
static BEDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:bd|beds?|bedrooms?)\b").unwrap());
static BATHS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:ba|baths?|bathrooms?)\b").unwrap());
static SQFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d,]{3,})\s*(?:sq\.?\s*ft|sqft|square feet)").unwrap());
static YEAR_BUILT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)built in (\d{4})").unwrap());

fn from_text(text: &str) -> PropertyRecord {
    let mut record = PropertyRecord::default();

    record.price = PRICE_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok());
    record.bedrooms = BEDS_RE.captures(text).and_then(|c| c[1].parse().ok());
    record.bathrooms = BATHS_RE.captures(text).and_then(|c| c[1].parse().ok());
    record.living_area_sqft = SQFT_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok());
    record.year_built = YEAR_BUILT_RE.captures(text).and_then(|c| c[1].parse().ok());

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn content(body: &str, url: &str) -> RawContent {
        RawContent {
            key: "test".to_string(),
            source_url: Some(url.to_string()),
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn external_id_parsed_from_detail_url() {
        assert_eq!(
            external_id_from_url("https://example.com/homedetails/10-Canal-Dr/44123_zpid/"),
            Some("44123".to_string())
        );
        assert_eq!(external_id_from_url("https://example.com/about"), None);
    }

    #[test]
    fn payload_strategy_beats_text_strategy() {
        let body = r#"<html><head>
            <script id="__NEXT_DATA__" type="application/json">
            {"props":{"home":{"zpid":44123,"price":985000,"homeStatus":"FOR_SALE",
             "bedrooms":4,"bathrooms":3,"livingArea":2850,
             "streetAddress":"10 Canal Dr","city":"Stuart","state":"FL","zipcode":"34994"}}}
            </script></head>
            <body>Charming home, $1 and 2 beds says the ad copy</body></html>"#;
        let record = Extractor::new().extract(&content(body, "https://x.com/44123_zpid/"));
        assert_eq!(record.price, Some(985000));
        assert_eq!(record.bedrooms, Some(4.0));
        assert_eq!(record.city.as_deref(), Some("Stuart"));
        assert_eq!(record.external_id.as_deref(), Some("44123"));
    }

    #[test]
    fn client_cache_blob_is_unwrapped() {
        let body = r#"<html><head>
            <script id="__NEXT_DATA__" type="application/json">
            {"props":{"gdpClientCache":"{\"q\":{\"property\":{\"zpid\":7,\"price\":450000,\"yearBuilt\":1987}}}"}}
            </script></head><body></body></html>"#;
        let record = Extractor::new().extract(&content(body, "https://x.com/7_zpid/"));
        assert_eq!(record.price, Some(450000));
        assert_eq!(record.year_built, Some(1987));
    }

    #[test]
    fn markup_fills_what_payload_missed() {
        let body = r#"<html><head>
            <meta property="og:title" content="12 Harbor Way, Jupiter, FL 33477 | Listing">
            <meta name="description" content="Deep water canal home with 80' dock.">
            </head><body>3 bd 2 ba home, 1,900 sqft, built in 1995, asking $725,000</body></html>"#;
        let record = Extractor::new().extract(&content(body, "https://x.com/99_zpid/"));
        assert_eq!(record.address.as_deref(), Some("12 Harbor Way"));
        assert_eq!(record.city.as_deref(), Some("Jupiter"));
        assert_eq!(record.zip_code.as_deref(), Some("33477"));
        assert_eq!(record.price, Some(725_000));
        assert_eq!(record.bedrooms, Some(3.0));
        assert_eq!(record.living_area_sqft, Some(1900));
        assert_eq!(record.year_built, Some(1995));
        assert!(record
            .raw_description
            .as_deref()
            .unwrap()
            .contains("80' dock"));
    }

    #[test]
    fn hopeless_page_yields_empty_record_not_error() {
        let record = Extractor::new().extract(&content("<html><body>404</body></html>", "https://x.com/gone"));
        assert_eq!(record.populated_fields(), 1); // source_url only
        assert!(record.price.is_none());
    }
}
