//! Wikitext template parsing and entry extraction for Wiktionary-style dumps.
//!
//! - [`template`]: parse one `{{name|a|key=v}}` template into a [`WikiTemp`]
//! - [`lines`]: join templates spread over several lines into logical lines
//! - [`walker`]: walk a page's logical lines and fill caller-defined entries
//! - [`schema`]: YAML-configured walker rules
//! - [`dump`] and [`parallel`]: read XML dumps and write JSONL

pub mod dump;
pub mod lines;
pub mod parallel;
pub mod schema;
pub mod template;
pub mod walker;

pub use lines::{oneline_templates, OnelineTemplates};
pub use schema::{PageEntry, Schema, SchemaError, SchemaRules};
pub use template::{parse_one_template, TemplateError, WikiTemp};
pub use walker::{parse_multi, AttribEntry, EntryRules, WalkConfig, WalkStats};
