//! Per-registry extractors mapping heterogeneous source formats (XML, JSON,
//! HTML) onto the canonical trial record.
//!
//! Each extractor declares a [`FailureMode`]: best-effort sources degrade to
//! an empty batch when they fail, the strict source aborts the run. The
//! HTML/regex extractors (EUCTR, EMA CDP) scrape pages with no formal
//! contract and are best-effort by nature.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use trialflow_core::{Source, TrialRecord};
use trialflow_storage::{FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "trialflow-extract";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// A failure aborts the whole run.
    Strict,
    /// A failure degrades to an empty batch.
    BestEffort,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed {format} from {source_id}: {detail}")]
    Parse {
        source_id: &'static str,
        format: &'static str,
        detail: String,
    },
}

fn parse_error(
    source_id: &'static str,
    format: &'static str,
    detail: impl ToString,
) -> ExtractError {
    ExtractError::Parse {
        source_id,
        format,
        detail: detail.to_string(),
    }
}

#[async_trait]
pub trait RegistryExtractor: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn failure_mode(&self) -> FailureMode;
    async fn extract(&self, http: &HttpFetcher) -> Result<Vec<TrialRecord>, ExtractError>;
}

/// The four registries in pipeline order. Later batches win ties in the
/// combiner, which only matters for intra-source duplicates since trial ids
/// carry a per-source prefix.
pub fn default_extractors() -> Vec<Box<dyn RegistryExtractor>> {
    vec![
        Box::new(IsrctnExtractor),
        Box::new(CtgovExtractor::default()),
        Box::new(EuctrExtractor::default()),
        Box::new(EmaCdpExtractor),
    ]
}

/// Flattens a document's text nodes, preserving whatever whitespace the
/// markup carried.
fn flattened_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document.root_element().text().collect::<String>()
}

/// Flattens a document's text nodes with newline joins so downstream
/// line-oriented scans see one entry per rendered line.
fn rendered_lines(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── ISRCTN ─────────────────────────────────────────────────────────────────

const ISRCTN_QUERY_URL: &str = "https://www.isrctn.com/api/query/format/default?q=heart&limit=5";
const ISRCTN_TIMEOUT: Duration = Duration::from_secs(30);

/// One bounded query against the ISRCTN XML API. Non-success status, a
/// non-XML content type, or a malformed document all degrade to an empty
/// batch.
#[derive(Debug, Default)]
pub struct IsrctnExtractor;

#[async_trait]
impl RegistryExtractor for IsrctnExtractor {
    fn source_id(&self) -> &'static str {
        Source::Isrctn.tag()
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::BestEffort
    }

    async fn extract(&self, http: &HttpFetcher) -> Result<Vec<TrialRecord>, ExtractError> {
        let response = match http
            .fetch_bytes_with_timeout(self.source_id(), ISRCTN_QUERY_URL, ISRCTN_TIMEOUT)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "isrctn query failed");
                return Ok(Vec::new());
            }
        };

        let is_xml = response
            .content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("xml"))
            .unwrap_or(false);
        if !is_xml {
            warn!(content_type = ?response.content_type, "isrctn did not return xml");
            return Ok(Vec::new());
        }

        match parse_isrctn_xml(&response.body) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(error = %err, "isrctn parse failed");
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Debug, Default)]
struct IsrctnPartial {
    saw_trial: bool,
    registry_id: Option<String>,
    title: Option<String>,
    condition: Option<String>,
    country: Option<String>,
    conditions_seen: u32,
}

impl IsrctnPartial {
    fn into_record(self) -> Option<TrialRecord> {
        if !self.saw_trial {
            return None;
        }
        Some(TrialRecord {
            trial_id: Source::Isrctn.trial_id(self.registry_id.as_deref()),
            source: Source::Isrctn.tag().to_string(),
            registry_id: self.registry_id,
            title: self.title,
            condition: self.condition,
            country: self.country,
            ingestion_ts: Utc::now(),
        })
    }
}

fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path
            .iter()
            .rev()
            .zip(suffix.iter().rev())
            .all(|(elem, expected)| elem == expected)
}

/// Event-driven parse of the namespaced ISRCTN result document. Elements are
/// matched by local name; only the first condition description and the first
/// recruitment country of each trial are kept, and missing nodes leave their
/// fields null.
pub fn parse_isrctn_xml(xml: &[u8]) -> Result<Vec<TrialRecord>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<IsrctnPartial> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.push(name);

                if path_ends_with(&path, &["fullTrial"]) {
                    current = Some(IsrctnPartial::default());
                } else if let Some(partial) = current.as_mut() {
                    if path_ends_with(&path, &["fullTrial", "trial"]) {
                        partial.saw_trial = true;
                    } else if path_ends_with(&path, &["trial", "conditions", "condition"]) {
                        partial.conditions_seen += 1;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let Some(partial) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|err| parse_error(Source::Isrctn.tag(), "xml", err))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    buf.clear();
                    continue;
                }

                if path_ends_with(&path, &["trial", "isrctn"]) {
                    partial.registry_id.get_or_insert(text);
                } else if path_ends_with(&path, &["trial", "trialDescription", "title"]) {
                    partial.title.get_or_insert(text);
                } else if path_ends_with(&path, &["conditions", "condition", "description"])
                    && partial.conditions_seen == 1
                {
                    partial.condition.get_or_insert(text);
                } else if path_ends_with(
                    &path,
                    &["participants", "recruitmentCountries", "country"],
                ) {
                    partial.country.get_or_insert(text);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "fullTrial" {
                    if let Some(record) = current.take().and_then(IsrctnPartial::into_record) {
                        records.push(record);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(parse_error(Source::Isrctn.tag(), "xml", err)),
        }
        buf.clear();
    }

    Ok(records)
}

// ─── ClinicalTrials.gov ─────────────────────────────────────────────────────

const CTGOV_STUDIES_URL: &str = "https://clinicaltrials.gov/api/v2/studies";
const CTGOV_CONDITION: &str = "heart attack";
const CTGOV_PAGE_SIZE: usize = 100;

/// Cursor-paginated retrieval from the v2 studies API. This is the primary
/// high-volume source with no fallback, so any failure aborts the run.
#[derive(Debug)]
pub struct CtgovExtractor {
    condition: &'static str,
}

impl Default for CtgovExtractor {
    fn default() -> Self {
        Self {
            condition: CTGOV_CONDITION,
        }
    }
}

#[async_trait]
impl RegistryExtractor for CtgovExtractor {
    fn source_id(&self) -> &'static str {
        Source::Ctgov.tag()
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::Strict
    }

    async fn extract(&self, http: &HttpFetcher) -> Result<Vec<TrialRecord>, ExtractError> {
        let pages = HttpStudyPages {
            http,
            condition: self.condition,
        };
        collect_studies(&pages).await
    }
}

/// Seam between pagination and transport so the page-following logic is
/// testable without a live endpoint.
#[async_trait]
pub trait StudyPageFetcher: Send + Sync {
    async fn fetch_page(&self, page_token: Option<&str>) -> Result<JsonValue, ExtractError>;
}

struct HttpStudyPages<'a> {
    http: &'a HttpFetcher,
    condition: &'a str,
}

#[async_trait]
impl StudyPageFetcher for HttpStudyPages<'_> {
    async fn fetch_page(&self, page_token: Option<&str>) -> Result<JsonValue, ExtractError> {
        let mut url = format!(
            "{CTGOV_STUDIES_URL}?query.cond={}&pageSize={CTGOV_PAGE_SIZE}",
            self.condition.replace(' ', "+")
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(token);
        }
        let response = self.http.fetch_bytes(Source::Ctgov.tag(), &url).await?;
        serde_json::from_slice(&response.body)
            .map_err(|err| parse_error(Source::Ctgov.tag(), "json", err))
    }
}

/// Follows `nextPageToken` cursors until absent, accumulating every page.
/// All rows of one run share a single `ingestion_ts` stamped after the full
/// fetch completes.
pub async fn collect_studies(
    pages: &dyn StudyPageFetcher,
) -> Result<Vec<TrialRecord>, ExtractError> {
    let mut rows = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = pages.fetch_page(page_token.as_deref()).await?;
        for study in page
            .get("studies")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            rows.push(study_to_record(study));
        }
        match page.get("nextPageToken").and_then(JsonValue::as_str) {
            Some(token) => page_token = Some(token.to_string()),
            None => break,
        }
    }

    let ingestion_ts = Utc::now();
    for row in &mut rows {
        row.ingestion_ts = ingestion_ts;
    }
    Ok(rows)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str()
}

fn study_to_record(study: &JsonValue) -> TrialRecord {
    let registry_id = json_str(study, &["protocolSection", "identificationModule", "nctId"])
        .map(str::to_string);
    let title = json_str(study, &["protocolSection", "identificationModule", "briefTitle"])
        .map(str::to_string);

    let condition = study
        .pointer("/protocolSection/conditionsModule/conditions")
        .and_then(JsonValue::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .filter_map(JsonValue::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty());

    // Set semantics: duplicate countries collapse and source order is not
    // preserved.
    let country = study
        .pointer("/protocolSection/contactsLocationsModule/locations")
        .and_then(JsonValue::as_array)
        .map(|locations| {
            locations
                .iter()
                .filter_map(|location| json_str(location, &["country"]))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty());

    TrialRecord {
        trial_id: Source::Ctgov.trial_id(registry_id.as_deref()),
        source: Source::Ctgov.tag().to_string(),
        registry_id,
        title,
        condition,
        country,
        ingestion_ts: Utc::now(),
    }
}

// ─── EU Clinical Trials Register ────────────────────────────────────────────

const EUCTR_BASE_URL: &str = "https://www.clinicaltrialsregister.eu";
const EUCTR_KEYWORD: &str = "heart attack";
const EUCTR_MAX_TRIALS: usize = 50;
const EUCTR_PAGE_DELAY: Duration = Duration::from_secs(1);
const EUDRACT_LABEL: &str = "EudraCT Number:";

/// Scrapes the register's HTML search results for detail-page links, then
/// each detail page for the identifier following the EudraCT label. Title,
/// condition and country are left null. Detail fetches are serialized with a
/// fixed delay to respect the register's load tolerance.
#[derive(Debug)]
pub struct EuctrExtractor {
    keyword: &'static str,
    max_trials: usize,
}

impl Default for EuctrExtractor {
    fn default() -> Self {
        Self {
            keyword: EUCTR_KEYWORD,
            max_trials: EUCTR_MAX_TRIALS,
        }
    }
}

#[async_trait]
impl RegistryExtractor for EuctrExtractor {
    fn source_id(&self) -> &'static str {
        Source::Euctr.tag()
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::BestEffort
    }

    async fn extract(&self, http: &HttpFetcher) -> Result<Vec<TrialRecord>, ExtractError> {
        let search_url = format!(
            "{EUCTR_BASE_URL}/ctr-search/search?query={}",
            self.keyword.replace(' ', "+")
        );
        let response = http.fetch_bytes(self.source_id(), &search_url).await?;
        let html = String::from_utf8_lossy(&response.body).into_owned();
        let links = collect_trial_links(&html, EUCTR_BASE_URL, self.max_trials);

        let mut rows = Vec::new();
        for url in &links {
            match http.fetch_bytes(self.source_id(), url).await {
                Ok(page) => {
                    let text = flattened_text(&String::from_utf8_lossy(&page.body));
                    let registry_id = eudract_number_from_text(&text);
                    rows.push(TrialRecord {
                        trial_id: Source::Euctr.trial_id(registry_id.as_deref()),
                        source: Source::Euctr.tag().to_string(),
                        registry_id,
                        title: None,
                        condition: None,
                        country: None,
                        ingestion_ts: Utc::now(),
                    });
                }
                Err(err) => {
                    warn!(url, error = %err, "skipping euctr detail page");
                }
            }
            tokio::time::sleep(EUCTR_PAGE_DELAY).await;
        }
        Ok(rows)
    }
}

/// Candidate detail-page links from a search-results page: anchors whose
/// href contains the trial path segment, absolutized, deduplicated and
/// capped deterministically.
pub fn collect_trial_links(html: &str, base_url: &str, max_trials: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = BTreeSet::new();
    for node in document.select(&selector) {
        let Some(href) = node.value().attr("href") else {
            continue;
        };
        if !href.contains("trial/") {
            continue;
        }
        let full = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{base_url}{href}")
        };
        links.insert(full);
    }
    links.into_iter().take(max_trials).collect()
}

/// The identifier token following the EudraCT label on a detail page, up to
/// end of line. `None` when the label is absent or the remainder of the line
/// is blank.
pub fn eudract_number_from_text(text: &str) -> Option<String> {
    let (_, rest) = text.split_once(EUDRACT_LABEL)?;
    let id = rest.lines().next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

// ─── EMA Clinical Data Publication feed ─────────────────────────────────────

const EMA_CDP_HOME: &str = "https://clinicaldata.ema.europa.eu/web/cdp";
const EMA_TIMEOUT: Duration = Duration::from_secs(60);
const EMA_MAX_ITEMS: usize = 20;
const EMA_ENTRY_PATTERN: &str = r"(?i)(\d{2}/\d{2}/\d{4})\s+Clinical data published";
const EMA_MEDICINE_PATTERN: &str = r"(?i)refer to\s+([A-Za-z0-9][A-Za-z0-9\- ]+?),\s+a\s";

/// Scans the CDP home page's rendered text for "Clinical data published"
/// feed entries. Registry ids are synthesized from the publication date and
/// the best available title text; the region marker is fixed.
#[derive(Debug, Default)]
pub struct EmaCdpExtractor;

#[async_trait]
impl RegistryExtractor for EmaCdpExtractor {
    fn source_id(&self) -> &'static str {
        Source::EmaCdp.tag()
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::BestEffort
    }

    async fn extract(&self, http: &HttpFetcher) -> Result<Vec<TrialRecord>, ExtractError> {
        let response = http
            .fetch_bytes_with_timeout(self.source_id(), EMA_CDP_HOME, EMA_TIMEOUT)
            .await?;
        let text = rendered_lines(&String::from_utf8_lossy(&response.body));
        parse_cdp_feed(&text, EMA_MAX_ITEMS)
    }
}

struct FeedHit {
    start: usize,
    end: usize,
    date: String,
}

/// Splits the rendered feed text into per-entry blocks (each running to the
/// next date marker or end of text), takes the first non-blank line as a
/// summary, and prefers a medicine name extracted from the "refer to ..."
/// phrase as the title.
pub fn parse_cdp_feed(text: &str, max_items: usize) -> Result<Vec<TrialRecord>, ExtractError> {
    let entry_re = Regex::new(EMA_ENTRY_PATTERN)
        .map_err(|err| parse_error(Source::EmaCdp.tag(), "regex", err))?;
    let medicine_re = Regex::new(EMA_MEDICINE_PATTERN)
        .map_err(|err| parse_error(Source::EmaCdp.tag(), "regex", err))?;

    let hits: Vec<FeedHit> = entry_re
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let date = caps.get(1)?.as_str().to_string();
            Some(FeedHit {
                start: whole.start(),
                end: whole.end(),
                date,
            })
        })
        .collect();

    let ingestion_ts = Utc::now();
    let mut rows = Vec::new();
    for (index, hit) in hits.iter().take(max_items).enumerate() {
        let block_end = hits.get(index + 1).map(|next| next.start).unwrap_or(text.len());
        let block = text[hit.end..block_end].trim();

        let summary = block
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        let medicine = medicine_re
            .captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        let label = medicine
            .clone()
            .or_else(|| summary.clone())
            .unwrap_or_else(|| "clinical-data".to_string());
        let registry_id = format!("{}:{}", hit.date, label);

        rows.push(TrialRecord {
            trial_id: Source::EmaCdp.trial_id(Some(&registry_id)),
            source: Source::EmaCdp.tag().to_string(),
            registry_id: Some(registry_id),
            title: medicine.or(summary),
            condition: None,
            country: Some("EU".to_string()),
            ingestion_ts,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    // ── ISRCTN ──

    const ISRCTN_FULL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<allTrials xmlns="http://www.67bricks.com/isrctn" totalCount="1">
  <fullTrial>
    <trial>
      <isrctn>12345678</isrctn>
      <trialDescription>
        <title>Aspirin after myocardial infarction</title>
      </trialDescription>
      <conditions>
        <condition>
          <description>Myocardial infarction</description>
        </condition>
        <condition>
          <description>Second condition ignored</description>
        </condition>
      </conditions>
      <participants>
        <recruitmentCountries>
          <country>United Kingdom</country>
          <country>Ireland</country>
        </recruitmentCountries>
      </participants>
    </trial>
  </fullTrial>
</allTrials>"#;

    #[test]
    fn isrctn_takes_first_condition_and_first_country_only() {
        let records = parse_isrctn_xml(ISRCTN_FULL.as_bytes()).expect("parse");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.trial_id.as_deref(), Some("isrctn:12345678"));
        assert_eq!(record.source, "isrctn");
        assert_eq!(record.registry_id.as_deref(), Some("12345678"));
        assert_eq!(
            record.title.as_deref(),
            Some("Aspirin after myocardial infarction")
        );
        assert_eq!(record.condition.as_deref(), Some("Myocardial infarction"));
        assert_eq!(record.country.as_deref(), Some("United Kingdom"));
    }

    #[test]
    fn isrctn_missing_nested_elements_yield_null_fields() {
        let xml = r#"<allTrials xmlns="http://www.67bricks.com/isrctn">
  <fullTrial>
    <trial>
      <isrctn>87654321</isrctn>
    </trial>
  </fullTrial>
</allTrials>"#;
        let records = parse_isrctn_xml(xml.as_bytes()).expect("parse");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.trial_id.as_deref(), Some("isrctn:87654321"));
        assert_eq!(record.title, None);
        assert_eq!(record.condition, None);
        assert_eq!(record.country, None);
    }

    #[test]
    fn isrctn_full_trial_without_trial_element_is_skipped() {
        let xml = r#"<allTrials xmlns="http://www.67bricks.com/isrctn">
  <fullTrial><contact>someone</contact></fullTrial>
</allTrials>"#;
        let records = parse_isrctn_xml(xml.as_bytes()).expect("parse");
        assert!(records.is_empty());
    }

    #[test]
    fn isrctn_malformed_xml_is_a_parse_error() {
        let result = parse_isrctn_xml(b"<allTrials><fullTrial></allTrials>");
        assert!(matches!(result, Err(ExtractError::Parse { .. })));
    }

    // ── CTGOV ──

    struct TwoPageFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StudyPageFetcher for TwoPageFetcher {
        async fn fetch_page(&self, page_token: Option<&str>) -> Result<JsonValue, ExtractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match call {
                0 => {
                    assert_eq!(page_token, None);
                    Ok(json!({
                        "studies": [
                            {"protocolSection": {"identificationModule": {"nctId": "NCT001", "briefTitle": "First"}}}
                        ],
                        "nextPageToken": "abc"
                    }))
                }
                1 => {
                    assert_eq!(page_token, Some("abc"));
                    Ok(json!({
                        "studies": [
                            {"protocolSection": {"identificationModule": {"nctId": "NCT002", "briefTitle": "Second"}}}
                        ]
                    }))
                }
                _ => panic!("fetched past the final page"),
            }
        }
    }

    #[tokio::test]
    async fn ctgov_follows_the_cursor_until_token_is_absent() {
        let pages = TwoPageFetcher {
            calls: AtomicUsize::new(0),
        };
        let rows = collect_studies(&pages).await.expect("collect");

        assert_eq!(pages.calls.load(Ordering::SeqCst), 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trial_id.as_deref(), Some("CTGOV:NCT001"));
        assert_eq!(rows[1].trial_id.as_deref(), Some("CTGOV:NCT002"));
        // One shared stamp for the whole run.
        assert_eq!(rows[0].ingestion_ts, rows[1].ingestion_ts);
    }

    #[test]
    fn ctgov_study_joins_conditions_and_deduplicates_countries() {
        let study = json!({
            "protocolSection": {
                "identificationModule": {"nctId": "NCT123", "briefTitle": "Statin trial"},
                "conditionsModule": {"conditions": ["Heart Attack", "Hypertension"]},
                "contactsLocationsModule": {"locations": [
                    {"country": "France"},
                    {"country": "Germany"},
                    {"country": "France"},
                    {"facility": "no country here"}
                ]}
            }
        });
        let record = study_to_record(&study);
        assert_eq!(record.trial_id.as_deref(), Some("CTGOV:NCT123"));
        assert_eq!(record.condition.as_deref(), Some("Heart Attack, Hypertension"));
        assert_eq!(record.country.as_deref(), Some("France, Germany"));
    }

    #[test]
    fn ctgov_study_without_id_gets_no_trial_id() {
        let study = json!({"protocolSection": {"identificationModule": {"briefTitle": "Orphan"}}});
        let record = study_to_record(&study);
        assert_eq!(record.trial_id, None);
        assert_eq!(record.registry_id, None);
        assert_eq!(record.title.as_deref(), Some("Orphan"));
    }

    // ── EUCTR ──

    #[test]
    fn euctr_links_are_absolutized_deduplicated_and_capped() {
        let html = r#"<html><body>
            <a href="/ctr-search/trial/2020-001234-56/GB">Trial A</a>
            <a href="/ctr-search/trial/2020-001234-56/GB">Trial A again</a>
            <a href="https://www.clinicaltrialsregister.eu/ctr-search/trial/2021-000777-11/DE">Trial B</a>
            <a href="/ctr-search/search?page=2">Next page</a>
        </body></html>"#;

        let links = collect_trial_links(html, EUCTR_BASE_URL, 10);
        assert_eq!(links.len(), 2);
        assert!(links
            .iter()
            .all(|link| link.starts_with("https://www.clinicaltrialsregister.eu")));

        let capped = collect_trial_links(html, EUCTR_BASE_URL, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn eudract_number_follows_the_label_to_end_of_line() {
        let text = "Summary\nEudraCT Number: 2020-001234-56\nSponsor Name: Acme";
        assert_eq!(
            eudract_number_from_text(text).as_deref(),
            Some("2020-001234-56")
        );
        assert_eq!(eudract_number_from_text("no label here"), None);
        assert_eq!(eudract_number_from_text("EudraCT Number:   \nnext line"), None);
    }

    // ── EMA CDP ──

    #[test]
    fn ema_feed_entries_are_blocked_by_date_markers() {
        let text = "\
19/02/2026 Clinical data published\n\
The published data refer to Cardiolin, a treatment for heart failure.\n\
12/01/2026 Clinical data published\n\
Summary line only, no medicine phrase.\n";

        let rows = parse_cdp_feed(text, 25).expect("parse");
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.title.as_deref(), Some("Cardiolin"));
        assert_eq!(first.registry_id.as_deref(), Some("19/02/2026:Cardiolin"));
        assert_eq!(
            first.trial_id.as_deref(),
            Some("EMA_CDP:19/02/2026:Cardiolin")
        );
        assert_eq!(first.country.as_deref(), Some("EU"));
        assert_eq!(first.condition, None);

        let second = &rows[1];
        assert_eq!(
            second.title.as_deref(),
            Some("Summary line only, no medicine phrase.")
        );
    }

    #[test]
    fn ema_entry_without_any_text_falls_back_to_placeholder() {
        let text = "19/02/2026 Clinical data published\n   \n";
        let rows = parse_cdp_feed(text, 25).expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].registry_id.as_deref(),
            Some("19/02/2026:clinical-data")
        );
        assert_eq!(rows[0].title, None);
    }

    #[test]
    fn ema_feed_honors_the_item_cap() {
        let mut text = String::new();
        for day in 1..=5 {
            text.push_str(&format!("0{day}/03/2026 Clinical data published\nentry {day}\n"));
        }
        let rows = parse_cdp_feed(&text, 3).expect("parse");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn rendered_lines_joins_text_nodes() {
        let html = "<html><body><div>19/02/2026 Clinical data published</div><p>refer to Cardiolin, a treatment</p></body></html>";
        let text = rendered_lines(html);
        assert!(text.contains("Clinical data published"));
        assert!(text.contains("refer to Cardiolin"));
    }
}
