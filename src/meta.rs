//! Reads the `.. meta::` header at the top of a post without rendering the
//! rest of the document.
//!
//! ```rst
//! .. meta::
//!    :slug: hello-world
//!    :author-date: 2021-03-05T00:00:00Z
//!
//! Hello, World!
//! =============
//! ```

use std::{collections::BTreeMap, fs, path::Path, sync::OnceLock};

use regex::Regex;
use thiserror::Error;

use crate::index::FileError;

pub const META_DIRECTIVE: &str = ".. meta::";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaParseError {
    #[error("line {line}: document must begin with `.. meta::`")]
    MissingDirective { line: usize },

    #[error("line {line}: meta field indented by {found}, expected {expected}")]
    InconsistentIndent {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: expected `:key: value`, found {text:?}")]
    MalformedField { line: usize, text: String },
}

/// The key/value pairs of a post's meta header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaBlock {
    fields: BTreeMap<String, String>,
}

impl MetaBlock {
    /// Parses the header of `source`. The first non-blank line must be the
    /// directive marker; the block runs until the first non-blank line that
    /// is not indented.
    pub fn parse(source: &str) -> Result<MetaBlock, MetaParseError> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let mut lines = source
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .skip_while(|(_, line)| line.trim().is_empty());

        match lines.next() {
            Some((_, line)) if line.trim_end() == META_DIRECTIVE => {}
            Some((line, _)) => return Err(MetaParseError::MissingDirective { line }),
            None => return Err(MetaParseError::MissingDirective { line: 1 }),
        }

        let mut indent = None;
        let mut fields = BTreeMap::new();
        for (number, line) in lines {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let width = line.len() - line.trim_start().len();
            if width == 0 {
                break;
            }
            match indent {
                None => indent = Some(width),
                Some(expected) if expected != width => {
                    return Err(MetaParseError::InconsistentIndent {
                        line: number,
                        expected,
                        found: width,
                    })
                }
                Some(_) => {}
            }

            let (key, value) = parse_field(text).ok_or_else(|| MetaParseError::MalformedField {
                line: number,
                text: text.to_owned(),
            })?;
            fields.insert(key.to_owned(), value.to_owned());
        }

        Ok(MetaBlock { fields })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<MetaBlock, FileError> {
        let source = fs::read_to_string(path)?;
        Ok(MetaBlock::parse(&source)?)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Splits a trimmed `:key: value` line. The value may be empty.
pub fn parse_field(line: &str) -> Option<(&str, &str)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^:([^:\s](?:[^:]*[^:\s])?):(?:\s+(.*))?$").expect("field pattern is valid")
    });

    let caps = pattern.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2).map_or("", |m| m.as_str().trim_end());
    Some((key, value))
}
