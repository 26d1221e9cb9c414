//! Reassemble templates that span several physical lines.
//!
//! Wikitext often spreads one template over many lines:
//!
//! ```text
//! {{en-noun
//! |pl=geese
//! }}
//! ```
//!
//! [`oneline_templates`] yields such runs as a single logical line so the
//! walker can treat every template as one unit.

use std::borrow::Cow;
use std::str::Lines;

/// Iterator over logical lines. See [`oneline_templates`].
pub struct OnelineTemplates<'a> {
    lines: Lines<'a>,
    buffer: String,
    opened: usize,
    closed: usize,
}

/// Split `text` into logical lines.
///
/// Physical lines are concatenated (without a separator) while the running
/// count of `{` differs from the running count of `}`. An unbalanced tail
/// left at the end of the text is still yielded as the last line.
pub fn oneline_templates(text: &str) -> OnelineTemplates<'_> {
    OnelineTemplates {
        lines: text.lines(),
        buffer: String::new(),
        opened: 0,
        closed: 0,
    }
}

fn count_braces(line: &str) -> (usize, usize) {
    line.chars().fold((0, 0), |(open, close), c| match c {
        '{' => (open + 1, close),
        '}' => (open, close + 1),
        _ => (open, close),
    })
}

impl<'a> Iterator for OnelineTemplates<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let (open, close) = count_braces(line);

            if self.buffer.is_empty() && open == close {
                return Some(Cow::Borrowed(line));
            }

            self.buffer.push_str(line);
            self.opened += open;
            self.closed += close;

            if self.opened == self.closed {
                self.opened = 0;
                self.closed = 0;
                return Some(Cow::Owned(std::mem::take(&mut self.buffer)));
            }
        }

        // Unbalanced text at end of input is flushed as-is
        if self.buffer.is_empty() {
            return None;
        }
        log::debug!(
            "flushing unbalanced tail ({} '{{' vs {} '}}'): {:.60}",
            self.opened,
            self.closed,
            self.buffer
        );
        self.opened = 0;
        self.closed = 0;
        Some(Cow::Owned(std::mem::take(&mut self.buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(text: &str) -> Vec<String> {
        oneline_templates(text).map(|l| l.into_owned()).collect()
    }

    #[test]
    fn joins_split_template_keeps_next_separate() {
        assert_eq!(collect("{{a\nb}}\n{{c}}"), vec!["{{ab}}", "{{c}}"]);
    }

    #[test]
    fn balanced_lines_pass_through() {
        assert_eq!(
            collect("===Noun===\n{{en-noun}}\n# a bird"),
            vec!["===Noun===", "{{en-noun}}", "# a bird"]
        );
    }

    #[test]
    fn balanced_lines_are_borrowed() {
        let text = "plain\n{{x}}";
        assert!(oneline_templates(text).all(|l| matches!(l, Cow::Borrowed(_))));
    }

    #[test]
    fn three_line_template() {
        assert_eq!(
            collect("{{en-noun\n|pl=geese\n}}\n# a bird"),
            vec!["{{en-noun|pl=geese}}", "# a bird"]
        );
    }

    #[test]
    fn nested_template_across_lines() {
        assert_eq!(
            collect("{{quote|{{w|A\nB}}\n|c}} tail"),
            vec!["{{quote|{{w|AB}}|c}} tail"]
        );
    }

    #[test]
    fn balance_is_by_count_not_by_nesting() {
        // Equal counts on one line pass through even when the order is wrong
        assert_eq!(collect("x}} {{y\nz"), vec!["x}} {{y", "z"]);
    }

    #[test]
    fn unbalanced_tail_is_flushed() {
        assert_eq!(collect("x\n{{open\nmore"), vec!["x", "{{openmore"]);
    }

    #[test]
    fn blank_lines_are_kept() {
        assert_eq!(collect("a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn crlf_line_endings() {
        assert_eq!(collect("{{a\r\nb}}\r\nc"), vec!["{{ab}}", "c"]);
    }

    #[test]
    fn empty_text() {
        assert!(collect("").is_empty());
    }

    #[test]
    fn each_call_starts_fresh() {
        let text = "{{a\nb";
        assert_eq!(collect(text), vec!["{{ab"]);
        assert_eq!(collect(text), vec!["{{ab"]);
    }
}
