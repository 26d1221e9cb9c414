//! YAML schema that configures the entry walker for one language.
//!
//! Example (`schema/english.yaml`):
//!
//! ```yaml
//! language: English
//! entry_headings: [Noun, Verb, Adjective]
//! attrib_prefixes: ["{{", "#"]
//! allow_prefix_match: true
//! templates:
//!   "#": definition
//!   "#:": example
//! ignore_templates: [wikipedia, was wotd]
//! capture_templates: [en-noun, en-verb]
//! ```

use crate::template::parse_one_template;
use crate::walker::{AttribEntry, EntryRules, WalkConfig};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    // == Language ==
    static ref LANGUAGE_HEADING: Regex = Regex::new(r"^==\s*([^=]+?)\s*==\s*$").unwrap();
    // === Noun === and deeper
    static ref SUB_HEADING: Regex = Regex::new(r"^===+\s*(.+?)\s*===+\s*$").unwrap();
    static ref TEMPLATE_NAME: Regex = Regex::new(r"^\s*\{\{\s*([^|{}]+?)\s*(?:\||\}\})").unwrap();
    static ref CATEGORY: Regex = Regex::new(r"\[\[Category:([^\]|]+)").unwrap();
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse schema YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Could not find schema/{0}. Use --schema to specify path.")]
    NotFound(String),

    #[error("Schema language must not be empty")]
    EmptyLanguage,
}

fn default_attrib_prefixes() -> Vec<String> {
    vec!["{{".to_string(), "#".to_string()]
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    language: String,
    #[serde(default)]
    entry_headings: Vec<String>,
    #[serde(default = "default_attrib_prefixes")]
    attrib_prefixes: Vec<String>,
    #[serde(default)]
    allow_prefix_match: bool,
    #[serde(default)]
    templates: HashMap<String, String>,
    #[serde(default)]
    ignore_templates: Vec<String>,
    #[serde(default)]
    capture_templates: Vec<String>,
    #[serde(default)]
    special_page_prefixes: Vec<String>,
}

/// Loaded schema. Shared read-only across pages and threads.
#[derive(Debug, Clone)]
pub struct Schema {
    language: String,
    entry_headings: HashSet<String>,
    attrib_prefixes: Vec<String>,
    walk_config: WalkConfig,
    ignore_templates: HashSet<String>,
    capture_templates: HashSet<String>,
    special_page_prefixes: Vec<String>,
}

/// Lowercase and collapse internal whitespace: "Proper  noun" -> "proper noun"
fn normalize_heading(heading: &str) -> String {
    heading
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Schema {
    pub fn parse(contents: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(contents)?;

        let language = file.language.trim().to_string();
        if language.is_empty() {
            return Err(SchemaError::EmptyLanguage);
        }

        Ok(Schema {
            language,
            entry_headings: file
                .entry_headings
                .iter()
                .map(|h| normalize_heading(h))
                .collect(),
            attrib_prefixes: file.attrib_prefixes,
            walk_config: WalkConfig {
                temp_to_attrib: file.templates,
                allow_prefix_match: file.allow_prefix_match,
            },
            ignore_templates: file.ignore_templates.into_iter().collect(),
            capture_templates: file.capture_templates.into_iter().collect(),
            special_page_prefixes: file.special_page_prefixes,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn walk_config(&self) -> &WalkConfig {
        &self.walk_config
    }

    pub fn special_page_prefixes(&self) -> &[String] {
        &self.special_page_prefixes
    }

    /// Whether `text` has a `== Language ==` heading for the schema language.
    pub fn has_language_section(&self, text: &str) -> bool {
        text.lines().any(|line| self.is_language_heading(line))
    }

    pub(crate) fn is_language_heading(&self, line: &str) -> bool {
        LANGUAGE_HEADING
            .captures(line)
            .is_some_and(|cap| cap[1].eq_ignore_ascii_case(&self.language))
    }

    pub(crate) fn is_other_language_heading(&self, line: &str) -> bool {
        LANGUAGE_HEADING.is_match(line) && !self.is_language_heading(line)
    }
}

/// Look for `name` under `schema/` in the working directory or two levels up.
pub fn find_schema_file(name: &str) -> Result<PathBuf, SchemaError> {
    let candidates = [
        PathBuf::from(format!("schema/{}", name)),
        PathBuf::from(format!("../../schema/{}", name)),
    ];
    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| SchemaError::NotFound(name.to_string()))
}

/// Name of the template a line starts with, if any.
pub fn leading_template_name(line: &str) -> Option<&str> {
    TEMPLATE_NAME
        .captures(line)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// One entry of a page: the heading that opened it and its attributes.
///
/// An attribute set more than once keeps every value, joined with `;`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageEntry {
    pub heading: String,
    #[serde(flatten)]
    pub attribs: BTreeMap<String, String>,
}

impl AttribEntry for PageEntry {
    fn set_attrib(&mut self, name: &str, value: String) {
        self.attribs
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push(';');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
}

/// Walker rules backed by a [`Schema`]. Build one per page.
pub struct SchemaRules<'s> {
    schema: &'s Schema,
    categories: Vec<String>,
}

impl<'s> SchemaRules<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        SchemaRules {
            schema,
            categories: Vec::new(),
        }
    }

    /// Category links seen in captured lines, in order of first appearance.
    pub fn into_categories(self) -> Vec<String> {
        self.categories
    }
}

impl EntryRules for SchemaRules<'_> {
    type Entry = PageEntry;

    fn in_target_lang(&self, line: &str) -> bool {
        self.schema.is_language_heading(line)
    }

    fn out_target_lang(&self, line: &str) -> bool {
        LANGUAGE_HEADING.is_match(line)
    }

    fn start_new_entry(&self, line: &str) -> bool {
        SUB_HEADING
            .captures(line)
            .is_some_and(|cap| self.schema.entry_headings.contains(&normalize_heading(&cap[1])))
    }

    fn new_entry(&mut self, line: &str) -> PageEntry {
        let heading = SUB_HEADING
            .captures(line)
            .map(|cap| cap[1].to_string())
            .unwrap_or_default();
        PageEntry {
            heading,
            attribs: BTreeMap::new(),
        }
    }

    fn start_new_attrib(&self, line: &str) -> bool {
        self.schema
            .attrib_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
    }

    fn ignore_template(&self, line: &str) -> bool {
        leading_template_name(line).is_some_and(|name| self.schema.ignore_templates.contains(name))
    }

    fn other_template(&mut self, line: &str, entry: &mut PageEntry) -> bool {
        let Some(name) = leading_template_name(line) else {
            return false;
        };
        if !self.schema.capture_templates.contains(name) {
            return false;
        }

        match parse_one_template(line.trim()) {
            Ok(template) => {
                let value = template
                    .params()
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.trim()))
                    .collect::<Vec<_>>()
                    .join(";");
                entry.set_attrib(template.name(), value);
                true
            }
            Err(e) => {
                log::debug!("could not parse {{{{{}}}}}: {}", name, e);
                false
            }
        }
    }

    fn line_hook(&mut self, line: &str) {
        for cap in CATEGORY.captures_iter(line) {
            let category = cap[1].trim();
            if !self.categories.iter().any(|c| c == category) {
                self.categories.push(category.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::parse_multi;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const ENGLISH: &str = r##"
language: English
entry_headings: [Noun, Verb, Proper noun]
allow_prefix_match: true
templates:
  "#": definition
  "#:": example
  "{{rfc}}": cleanup
ignore_templates: [wikipedia]
capture_templates: [en-noun, en-verb]
special_page_prefixes: ["Wiktionary:", "Template:"]
"##;

    fn schema() -> Schema {
        Schema::parse(ENGLISH).unwrap()
    }

    fn walk(schema: &Schema, text: &str) -> (Vec<PageEntry>, Vec<String>) {
        let mut rules = SchemaRules::new(schema);
        let mut entries = Vec::new();
        parse_multi(text, schema.walk_config(), &mut rules, &mut entries);
        (entries, rules.into_categories())
    }

    // ─────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn parse_defaults() {
        let schema = Schema::parse("language: Dutch").unwrap();
        assert_eq!(schema.language(), "Dutch");
        assert_eq!(schema.attrib_prefixes, vec!["{{", "#"]);
        assert!(!schema.walk_config().allow_prefix_match);
        assert!(schema.special_page_prefixes().is_empty());
    }

    #[test]
    fn parse_rejects_empty_language() {
        assert!(matches!(
            Schema::parse("language: '  '"),
            Err(SchemaError::EmptyLanguage)
        ));
    }

    #[test]
    fn parse_rejects_bad_yaml() {
        assert!(matches!(
            Schema::parse("language: [unclosed"),
            Err(SchemaError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ENGLISH.as_bytes()).unwrap();
        let schema = Schema::load(file.path()).unwrap();
        assert_eq!(schema.language(), "English");
        assert_eq!(schema.special_page_prefixes(), ["Wiktionary:", "Template:"]);
    }

    #[test]
    fn bundled_english_schema_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema/english.yaml");
        let schema = Schema::load(&path).unwrap();
        assert_eq!(schema.language(), "English");
        assert!(schema.walk_config().allow_prefix_match);
        assert!(schema.entry_headings.contains("proper noun"));
        assert!(schema.capture_templates.contains("en-noun"));
    }

    #[test]
    fn find_schema_file_searches_candidates() {
        assert!(find_schema_file("english.yaml").is_ok());
        assert!(matches!(
            find_schema_file("klingon.yaml"),
            Err(SchemaError::NotFound(name)) if name == "klingon.yaml"
        ));
    }

    #[test]
    fn load_missing_file() {
        let err = Schema::load(Path::new("/nonexistent/schema.yaml")).unwrap_err();
        assert!(matches!(err, SchemaError::Read { .. }));
    }

    #[test]
    fn headings_are_normalized() {
        let schema = schema();
        let rules = SchemaRules::new(&schema);
        assert!(rules.start_new_entry("===Proper  Noun==="));
        assert!(rules.start_new_entry("==== Verb ===="));
        assert!(!rules.start_new_entry("===Etymology==="));
        assert!(!rules.start_new_entry("==Noun=="));
    }

    #[test]
    fn language_headings() {
        let schema = schema();
        let rules = SchemaRules::new(&schema);
        assert!(rules.in_target_lang("== English =="));
        assert!(rules.in_target_lang("==english=="));
        assert!(!rules.in_target_lang("===English==="));
        assert!(rules.out_target_lang("==French=="));
        assert!(schema.has_language_section("intro\n==English==\n"));
        assert!(!schema.has_language_section("==French==\n"));
    }

    #[test]
    fn leading_template_names() {
        assert_eq!(leading_template_name("{{en-noun|s}}"), Some("en-noun"));
        assert_eq!(leading_template_name("  {{ wikipedia }}"), Some("wikipedia"));
        assert_eq!(leading_template_name("# {{lb|en}}"), None);
        assert_eq!(leading_template_name("{{{{x}}}}"), None);
    }

    // ─────────────────────────────────────────────────────────────
    // Walking a page
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn walks_a_page() {
        let text = "\
{{also|Goose}}
==English==
===Etymology===
From Old English.
===Noun===
{{en-noun|geese}}
# A large water bird.
#: The goose honked.
# {{lb|en|slang}} A fool.
[[Category:en:Birds]]
===Verb===
{{wikipedia}}
# To prod.
==Dutch==
===Noun===
# gans";
        let schema = schema();
        let (entries, categories) = walk(&schema, text);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].heading, "Noun");
        assert_eq!(entries[0].attribs.get("en-noun").map(String::as_str), Some("1=geese"));
        assert_eq!(
            entries[0].attribs.get("definition").map(String::as_str),
            Some("A large water bird.;{{lb|en|slang}} A fool.;[[Category:en:Birds]]")
        );
        assert_eq!(
            entries[0].attribs.get("example").map(String::as_str),
            Some("The goose honked.")
        );
        assert_eq!(entries[1].heading, "Verb");
        assert_eq!(
            entries[1].attribs.get("definition").map(String::as_str),
            Some("To prod.")
        );
        assert_eq!(categories, vec!["en:Birds"]);
    }

    #[test]
    fn unparseable_capture_template_is_dropped() {
        let text = "==English==\n===Noun===\n{{en-noun|a]b}}\ntext";
        let schema = schema();
        let (entries, _) = walk(&schema, text);
        assert!(entries[0].attribs.is_empty());
    }

    #[test]
    fn page_entry_serializes_flat() {
        let mut entry = PageEntry {
            heading: "Noun".to_string(),
            attribs: BTreeMap::new(),
        };
        entry.set_attrib("definition", "a".to_string());
        entry.set_attrib("definition", "b".to_string());
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"heading":"Noun","definition":"a;b"}"#);
    }
}
