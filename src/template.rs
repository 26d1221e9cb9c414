//! Single-template parser for `{{name|positional|key=value}}` wikitext.
//!
//! The parser is a left-to-right character scan with two phases: the
//! template name, then the parameters. Parameter values may contain nested
//! templates (`{{...}}`) and links (`[[...]]`); a `|` or `=` only counts as a
//! separator when both nesting counters are at zero.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template must start with {{{{ and end with }}}}")]
    NotDelimited,

    #[error("template contains <nowiki>")]
    NoWiki,

    #[error("empty template")]
    EmptyTemplate,

    #[error("character not expected in name: '{0}'")]
    UnexpectedNameChar(char),

    #[error("empty parameter name")]
    EmptyParamName,

    #[error("parameter name contains = or |: {0}")]
    InvalidParamName(String),

    #[error("parameter {0} used twice")]
    DuplicateParam(String),

    #[error("unmatched extra right brace")]
    UnmatchedRightBrace,

    #[error("unmatched extra right bracket")]
    UnmatchedRightBracket,

    #[error("unbalanced braces at end of template")]
    UnbalancedBraces,

    #[error("unbalanced brackets at end of template")]
    UnbalancedBrackets,
}

/// A parsed template: its name plus named and positional parameters.
///
/// Positional parameters are keyed by their 1-based index rendered as a
/// string, so `{{m|en|word|t=gloss}}` has the keys `"1"`, `"2"` and `"t"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiTemp {
    name: String,
    params: BTreeMap<String, String>,
}

impl WikiTemp {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Positional parameter `n` (1-based).
    pub fn positional(&self, n: usize) -> Option<&str> {
        self.get(&n.to_string())
    }
}

// Besides alphanumerics and spaces
const NAME_PUNCT: [char; 6] = ['-', '_', '(', ')', '.', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamState {
    /// Accumulating a parameter name or a positional value
    Part1,
    /// Accumulating the value of a named parameter
    Part2,
}

/// Parameter-phase state machine.
struct ParamScanner {
    params: BTreeMap<String, String>,
    state: ParamState,
    next_positional: usize,
    name: String,
    part1: String,
    part2: String,
    braces: usize,
    brackets: usize,
}

impl ParamScanner {
    fn new() -> Self {
        ParamScanner {
            params: BTreeMap::new(),
            state: ParamState::Part1,
            next_positional: 1,
            name: String::new(),
            part1: String::new(),
            part2: String::new(),
            braces: 0,
            brackets: 0,
        }
    }

    fn at_top_level(&self) -> bool {
        self.braces == 0 && self.brackets == 0
    }

    fn push(&mut self, c: char) {
        match self.state {
            ParamState::Part1 => self.part1.push(c),
            ParamState::Part2 => self.part2.push(c),
        }
    }

    fn feed(&mut self, c: char) -> Result<(), TemplateError> {
        match c {
            '{' => {
                self.braces += 1;
                self.push(c);
            }
            '}' => {
                if self.braces == 0 {
                    return Err(TemplateError::UnmatchedRightBrace);
                }
                self.braces -= 1;
                self.push(c);
            }
            '[' => {
                self.brackets += 1;
                self.push(c);
            }
            ']' => {
                if self.brackets == 0 {
                    return Err(TemplateError::UnmatchedRightBracket);
                }
                self.brackets -= 1;
                self.push(c);
            }
            '=' if self.state == ParamState::Part1 && self.at_top_level() => {
                self.start_value()?;
            }
            '|' if self.at_top_level() => {
                self.flush()?;
            }
            _ => self.push(c),
        }
        Ok(())
    }

    /// `=` seen: what was accumulated so far is the parameter name.
    fn start_value(&mut self) -> Result<(), TemplateError> {
        let name = self.part1.trim();
        if name.is_empty() {
            return Err(TemplateError::EmptyParamName);
        }
        // Only reachable through nested markup such as `{{a|b}}=`
        if name.contains('=') || name.contains('|') {
            return Err(TemplateError::InvalidParamName(name.to_string()));
        }
        self.name = name.to_string();
        self.part1.clear();
        self.state = ParamState::Part2;
        Ok(())
    }

    /// Close the pending name/value pair.
    fn flush(&mut self) -> Result<(), TemplateError> {
        let (key, value) = match self.state {
            ParamState::Part1 => {
                let key = self.next_positional.to_string();
                self.next_positional += 1;
                (key, std::mem::take(&mut self.part1))
            }
            ParamState::Part2 => {
                let value = self.part2.trim().to_string();
                self.part2.clear();
                (std::mem::take(&mut self.name), value)
            }
        };
        self.state = ParamState::Part1;

        if self.params.contains_key(&key) {
            return Err(TemplateError::DuplicateParam(key));
        }
        self.params.insert(key, value);
        Ok(())
    }

    fn finish(mut self) -> Result<BTreeMap<String, String>, TemplateError> {
        if self.braces > 0 {
            return Err(TemplateError::UnbalancedBraces);
        }
        if self.brackets > 0 {
            return Err(TemplateError::UnbalancedBrackets);
        }
        self.flush()?;
        Ok(self.params)
    }
}

/// Parse one template occurrence. `text` must be exactly the template,
/// starting with `{{` and ending with `}}`.
pub fn parse_one_template(text: &str) -> Result<WikiTemp, TemplateError> {
    if text.len() < 4 || !text.starts_with("{{") || !text.ends_with("}}") {
        return Err(TemplateError::NotDelimited);
    }
    if text.contains("<nowiki>") {
        return Err(TemplateError::NoWiki);
    }

    let inner = &text[2..text.len() - 2];
    if inner.trim().is_empty() {
        return Err(TemplateError::EmptyTemplate);
    }

    // Name phase
    let mut chars = inner.chars();
    let mut name = String::new();
    let mut has_params = false;
    // Tabs and newlines may only surround the name
    let mut outer_ws = None;
    for c in chars.by_ref() {
        if c == '|' {
            has_params = true;
            break;
        }
        if c.is_whitespace() {
            if c != ' ' && !name.trim().is_empty() {
                outer_ws.get_or_insert(c);
            }
            name.push(c);
        } else if c.is_alphanumeric() || NAME_PUNCT.contains(&c) {
            if let Some(ws) = outer_ws {
                return Err(TemplateError::UnexpectedNameChar(ws));
            }
            name.push(c);
        } else {
            return Err(TemplateError::UnexpectedNameChar(c));
        }
    }

    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(TemplateError::EmptyTemplate);
    }

    if !has_params {
        return Ok(WikiTemp {
            name,
            params: BTreeMap::new(),
        });
    }

    // Parameter phase
    let mut scanner = ParamScanner::new();
    for c in chars {
        scanner.feed(c)?;
    }
    let params = scanner.finish()?;

    Ok(WikiTemp { name, params })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
