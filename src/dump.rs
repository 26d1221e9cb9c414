//! MediaWiki XML dump reading and per-page processing.

use crate::lines::oneline_templates;
use crate::schema::{PageEntry, Schema, SchemaRules};
use crate::template::parse_one_template;
use crate::walker::parse_multi;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::io::BufRead;
use std::time::Duration;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    pub static ref TITLE_PATTERN: Regex = Regex::new(r"<title>([^<]+)</title>").unwrap();
    pub static ref NS_PATTERN: Regex = Regex::new(r"<ns>(\d+)</ns>").unwrap();
    pub static ref TEXT_PATTERN: Regex = Regex::new(r"(?s)<text[^>]*>(.+?)</text>").unwrap();
    pub static ref REDIRECT_PATTERN: Regex = Regex::new(r#"<redirect\s+title="[^"]+""#).unwrap();
}

/// Processing mode for each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Walk the language section and emit one record per entry
    Entries,
    /// Parse every template line in the language section and emit failures
    TemplateReport,
}

/// Page as cut out of the dump, text already unescaped
#[derive(Debug)]
pub struct RawPage {
    pub title: String,
    pub ns: Option<u32>,
    pub is_redirect: bool,
    pub text: String,
    pub page_id: usize,
}

/// One output line in entries mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRecord {
    #[serde(rename = "id")]
    pub word: String,
    #[serde(flatten)]
    pub entry: PageEntry,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// One output line in template-report mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateFailure {
    #[serde(rename = "id")]
    pub word: String,
    pub template: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputRecord {
    Entry(EntryRecord),
    Failure(TemplateFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Parsed,
    Special,
    Redirect,
    NoLanguage,
    Empty,
}

/// Result of page processing
#[derive(Debug)]
pub struct ProcessedPage {
    pub page_id: usize,
    pub title: String,
    pub outcome: PageOutcome,
    pub templates_checked: usize,
    pub records: Vec<OutputRecord>,
}

impl ProcessedPage {
    /// Placeholder for a `<page>` element with no title
    pub fn unreadable(page_id: usize) -> Self {
        ProcessedPage {
            page_id,
            title: String::new(),
            outcome: PageOutcome::Empty,
            templates_checked: 0,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub pages_processed: usize,
    pub pages_parsed: usize,
    pub records_written: usize,
    pub special: usize,
    pub redirects: usize,
    pub no_language: usize,
    pub skipped: usize,
    pub templates_checked: usize,
    pub elapsed: Duration,
}

impl Stats {
    pub fn record_page(&mut self, page: &ProcessedPage) {
        self.pages_processed += 1;
        self.templates_checked += page.templates_checked;
        match page.outcome {
            PageOutcome::Parsed => self.pages_parsed += 1,
            PageOutcome::Special => self.special += 1,
            PageOutcome::Redirect => self.redirects += 1,
            PageOutcome::NoLanguage => self.no_language += 1,
            PageOutcome::Empty => self.skipped += 1,
        }
    }
}

/// Decode the five predefined XML entities. `&amp;` goes last so that
/// `&amp;lt;` becomes `&lt;`, not `<`.
pub fn unescape_xml(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&#39;", "'")
            .replace("&amp;", "&"),
    )
}

/// Cut title, namespace, redirect flag and text out of one `<page>` element.
pub fn extract_page(page_xml: &str, page_id: usize) -> Option<RawPage> {
    let title = TITLE_PATTERN.captures(page_xml)?;
    let title: String = unescape_xml(&title[1]).nfc().collect();

    let ns = NS_PATTERN
        .captures(page_xml)
        .and_then(|cap| cap[1].parse().ok());

    let text = TEXT_PATTERN
        .captures(page_xml)
        .map(|cap| unescape_xml(&cap[1]).into_owned())
        .unwrap_or_default();

    Some(RawPage {
        title,
        ns,
        is_redirect: REDIRECT_PATTERN.is_match(page_xml),
        text,
        page_id,
    })
}

fn is_special(raw: &RawPage, schema: &Schema) -> bool {
    raw.ns.is_some_and(|ns| ns != 0)
        || schema
            .special_page_prefixes()
            .iter()
            .any(|prefix| raw.title.starts_with(prefix.as_str()))
}

fn walk_entries(raw: &RawPage, schema: &Schema) -> Vec<OutputRecord> {
    let mut rules = SchemaRules::new(schema);
    let mut entries = Vec::new();
    let stats = parse_multi(&raw.text, schema.walk_config(), &mut rules, &mut entries);
    if stats.templates_dropped > 0 {
        log::debug!("{}: {} lines dropped", raw.title, stats.templates_dropped);
    }

    let categories = rules.into_categories();
    entries
        .into_iter()
        .map(|entry| {
            OutputRecord::Entry(EntryRecord {
                word: raw.title.clone(),
                entry,
                categories: categories.clone(),
            })
        })
        .collect()
}

/// Parse every logical line inside the language section that is a single
/// template. Returns how many were checked and the failures.
pub fn template_report(raw: &RawPage, schema: &Schema) -> (usize, Vec<TemplateFailure>) {
    let mut in_language = false;
    let mut headings = 0;
    let mut checked = 0;
    let mut failures = Vec::new();

    for line in oneline_templates(&raw.text) {
        let line = line.trim();
        if schema.is_language_heading(line) {
            headings += 1;
            in_language = headings == 1;
            continue;
        }
        if schema.is_other_language_heading(line) {
            in_language = false;
            continue;
        }
        if !in_language || !line.starts_with("{{") || !line.ends_with("}}") {
            continue;
        }
        checked += 1;
        if let Err(e) = parse_one_template(line) {
            failures.push(TemplateFailure {
                word: raw.title.clone(),
                template: line.to_string(),
                error: e.to_string(),
            });
        }
    }

    (checked, failures)
}

/// Process a raw page into output records
pub fn process_page(raw: RawPage, schema: &Schema, mode: ScanMode) -> ProcessedPage {
    let mut page = ProcessedPage {
        page_id: raw.page_id,
        title: raw.title.clone(),
        outcome: PageOutcome::Parsed,
        templates_checked: 0,
        records: Vec::new(),
    };

    if is_special(&raw, schema) {
        page.outcome = PageOutcome::Special;
        return page;
    }
    if raw.is_redirect {
        page.outcome = PageOutcome::Redirect;
        return page;
    }
    if !schema.has_language_section(&raw.text) {
        page.outcome = PageOutcome::NoLanguage;
        return page;
    }

    match mode {
        ScanMode::Entries => {
            page.records = walk_entries(&raw, schema);
        }
        ScanMode::TemplateReport => {
            let (checked, failures) = template_report(&raw, schema);
            page.templates_checked = checked;
            page.records = failures.into_iter().map(OutputRecord::Failure).collect();
        }
    }

    if page.records.is_empty() && mode == ScanMode::Entries {
        page.outcome = PageOutcome::Empty;
    }
    page
}

/// Move complete `<page>...</page>` elements out of `buffer`.
fn drain_pages(buffer: &mut String, mut callback: impl FnMut(String) -> bool) -> bool {
    while let Some(start) = buffer.find("<page>") {
        if let Some(end_offset) = buffer[start..].find("</page>") {
            let end = start + end_offset + "</page>".len();
            let page_xml = buffer[start..end].to_string();
            buffer.drain(..end);

            if !callback(page_xml) {
                return false;
            }
        } else {
            buffer.drain(..start);
            break;
        }
    }

    if buffer.len() > 10 && !buffer.contains("<page>") {
        let mut cut = buffer.len() - 10;
        while !buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        buffer.drain(..cut);
    }
    true
}

/// Move the decodable part of `pending` into `buffer`. Invalid bytes become
/// U+FFFD; an incomplete sequence at the end stays for the next read.
fn decode_utf8(pending: &mut Vec<u8>, buffer: &mut String) {
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(text) => {
                buffer.push_str(text);
                start = pending.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                buffer.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        buffer.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
}

/// Stream `<page>` elements out of a dump. The callback returns `false` to stop.
pub fn scan_pages(
    mut reader: impl BufRead,
    mut callback: impl FnMut(String) -> bool,
) -> std::io::Result<()> {
    let mut buffer = String::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 1024 * 1024]; // 1MB chunks

    loop {
        let bytes_read = reader.read(&mut chunk)?;
        if bytes_read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..bytes_read]);
        decode_utf8(&mut pending, &mut buffer);

        if !drain_pages(&mut buffer, &mut callback) {
            return Ok(());
        }
    }

    if !pending.is_empty() {
        buffer.push_str(&String::from_utf8_lossy(&pending));
        drain_pages(&mut buffer, &mut callback);
    }

    Ok(())
}
