//! Generic multi-entry wikitext walker.
//!
//! One forward pass over the logical lines of a page. The caller decides,
//! through [`EntryRules`], where the target language section starts and ends,
//! where a new entry begins and which lines open a new attribute. Text lines
//! following an attribute marker are accumulated and stored on the current
//! entry joined with `;`.
//!
//! The walk never fails: lines it cannot place are logged and dropped.

use crate::lines::oneline_templates;
use std::collections::HashMap;

/// An entry whose attributes are filled in by [`parse_multi`].
pub trait AttribEntry {
    fn set_attrib(&mut self, name: &str, value: String);
}

/// Language- and template-specific knowledge supplied by the caller.
pub trait EntryRules {
    type Entry: AttribEntry;

    /// Heading that opens (or, seen again, closes) the target language section.
    fn in_target_lang(&self, line: &str) -> bool;

    /// Heading of any other language section.
    fn out_target_lang(&self, line: &str) -> bool;

    fn start_new_entry(&self, line: &str) -> bool;

    fn new_entry(&mut self, line: &str) -> Self::Entry;

    fn start_new_attrib(&self, line: &str) -> bool;

    fn ignore_template(&self, _line: &str) -> bool {
        false
    }

    /// Catch-all for attribute lines with no mapping. Returns `true` when the
    /// line was handled.
    fn other_template(&mut self, _line: &str, _entry: &mut Self::Entry) -> bool {
        false
    }

    /// Called for every captured line of the current entry.
    fn line_hook(&mut self, _line: &str) {}
}

/// Caller configuration for a walk.
#[derive(Debug, Clone, Default)]
pub struct WalkConfig {
    /// Exact logical line (trimmed) → attribute name
    pub temp_to_attrib: HashMap<String, String>,
    /// Fall back to the longest key that prefixes the line
    pub allow_prefix_match: bool,
}

impl WalkConfig {
    fn exact(&self, line: &str) -> Option<&str> {
        self.temp_to_attrib.get(line.trim()).map(String::as_str)
    }

    /// Longest matching key, with the text that follows it on the line.
    fn prefix<'l>(&self, line: &'l str) -> Option<(&str, &'l str)> {
        let line = line.trim_start();
        self.temp_to_attrib
            .iter()
            .filter(|(key, _)| !key.is_empty() && line.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, attrib)| (attrib.as_str(), &line[key.len()..]))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub lines: usize,
    pub entries: usize,
    pub attribs_set: usize,
    pub templates_dropped: usize,
    pub lang_headings: usize,
}

#[derive(Default)]
struct WalkState {
    capturing: bool,
    current: Option<usize>,
    attrib: Option<String>,
    fragments: Vec<String>,
    stats: WalkStats,
}

impl WalkState {
    /// Store the pending fragments on the current attribute.
    fn flush<E: AttribEntry>(&mut self, entries: &mut [E]) {
        if self.fragments.is_empty() {
            return;
        }
        let fragments = std::mem::take(&mut self.fragments);
        if let (Some(index), Some(attrib)) = (self.current, self.attrib.as_deref()) {
            entries[index].set_attrib(attrib, fragments.join(";"));
            self.stats.attribs_set += 1;
        }
    }

    fn resolve_attrib<R: EntryRules>(
        &mut self,
        line: &str,
        config: &WalkConfig,
        rules: &mut R,
        entry: &mut R::Entry,
    ) -> Option<String> {
        if let Some(attrib) = config.exact(line) {
            return Some(attrib.to_string());
        }
        if rules.ignore_template(line) {
            return None;
        }
        if rules.other_template(line, entry) {
            return None;
        }
        if config.allow_prefix_match {
            if let Some((attrib, rest)) = config.prefix(line) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    self.fragments.push(rest.to_string());
                }
                return Some(attrib.to_string());
            }
        }

        log::info!("unrecognised attribute line dropped: {:.80}", line);
        self.stats.templates_dropped += 1;
        None
    }
}

/// Walk `text` and append the entries found to `entries`.
///
/// Entries already in `entries` are left untouched.
pub fn parse_multi<R: EntryRules>(
    text: &str,
    config: &WalkConfig,
    rules: &mut R,
    entries: &mut Vec<R::Entry>,
) -> WalkStats {
    let mut state = WalkState::default();

    for line in oneline_templates(text) {
        let line = line.as_ref();
        state.stats.lines += 1;

        if rules.in_target_lang(line) {
            state.flush(entries);
            state.attrib = None;
            state.stats.lang_headings += 1;
            if state.stats.lang_headings > 1 {
                log::info!(
                    "target language heading seen {} times: {}",
                    state.stats.lang_headings,
                    line.trim()
                );
            }
            state.capturing = state.stats.lang_headings == 1;
            continue;
        }

        if rules.out_target_lang(line) {
            state.flush(entries);
            state.attrib = None;
            state.capturing = false;
            continue;
        }

        if !state.capturing {
            continue;
        }

        if rules.start_new_entry(line) {
            state.flush(entries);
            entries.push(rules.new_entry(line));
            state.current = Some(entries.len() - 1);
            state.attrib = None;
            state.stats.entries += 1;
            continue;
        }

        let Some(index) = state.current else {
            rules.line_hook(line);
            continue;
        };

        if rules.start_new_attrib(line) {
            state.flush(entries);
            rules.line_hook(line);
            state.attrib = state.resolve_attrib(line, config, rules, &mut entries[index]);
            continue;
        }

        rules.line_hook(line);
        if !line.trim().is_empty() {
            state.fragments.push(line.to_string());
        }
    }

    state.flush(entries);
    state.stats
}
