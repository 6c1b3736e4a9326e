//! Line and indentation driven block structure.
//!
//! Every body (the document, a list item, a block quote) is parsed from lines
//! that were dedented so the body starts at column 0. Section titles may only
//! appear in the document body; they are collected flat and nested afterwards
//! by the order in which their adornment styles first appear.

use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;

use super::{MarkupError, Reporter};
use crate::meta::parse_field;

const ADORNMENT_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const ADMONITIONS: &[&str] = &[
    "attention",
    "caution",
    "danger",
    "error",
    "hint",
    "important",
    "note",
    "tip",
    "warning",
];

/// Inline source text and the line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Text {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Block {
    Section { title: Text, body: Vec<Block> },
    Paragraph(Text),
    Literal { text: String, language: Option<String> },
    BulletList(Vec<Vec<Block>>),
    EnumeratedList { start: u64, items: Vec<Vec<Block>> },
    DefinitionList(Vec<(Text, Vec<Block>)>),
    BlockQuote(Vec<Block>),
    Admonition { kind: String, body: Vec<Block> },
    Transition,
}

#[derive(Debug, Default)]
pub(crate) struct Document {
    pub title: Option<Text>,
    pub subtitle: Option<Text>,
    pub meta: Vec<(String, String)>,
    /// Hyperlink targets keyed by normalized reference name.
    pub targets: HashMap<String, String>,
    pub body: Vec<Block>,
}

pub(crate) fn parse(source: &str, reporter: &mut Reporter) -> Result<Document, MarkupError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let lines: Vec<Line> = source
        .lines()
        .enumerate()
        .map(|(i, raw)| Line::new(i + 1, raw))
        .collect();

    let mut parser = Parser {
        reporter,
        meta: Vec::new(),
        targets: HashMap::new(),
    };
    let items = parser.parse_body(&lines, true)?;
    let body = parser.nest_sections(items)?;

    let (title, body) = promote(body);
    let (subtitle, body) = match title {
        Some(_) => promote(body),
        None => (None, body),
    };

    Ok(Document {
        title,
        subtitle,
        meta: parser.meta,
        targets: parser.targets,
        body,
    })
}

/// Lifts the content of a lone top-level section and returns its title.
fn promote(body: Vec<Block>) -> (Option<Text>, Vec<Block>) {
    let mut blocks = body.into_iter();
    match (blocks.next(), blocks.next()) {
        (Some(Block::Section { title, body }), None) => (Some(title), body),
        (first, second) => (None, first.into_iter().chain(second).chain(blocks).collect()),
    }
}

/// Lowercases and collapses whitespace, the way reference names are compared.
pub(crate) fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
}

impl Line {
    fn new(number: usize, raw: &str) -> Line {
        let expanded = expand_tabs(raw);
        let text = expanded.trim();
        Line {
            number,
            indent: if text.is_empty() {
                0
            } else {
                expanded.len() - expanded.trim_start().len()
            },
            text: text.to_owned(),
        }
    }

    fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    fn dedent(&self, by: usize) -> Line {
        Line {
            number: self.number,
            indent: self.indent.saturating_sub(by),
            text: self.text.clone(),
        }
    }
}

fn expand_tabs(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\t' {
            let pad = 8 - out.chars().count() % 8;
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            out.push(c);
        }
    }
    out
}

fn is_adornment(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if ADORNMENT_CHARS.contains(c) => chars.all(|d| d == c),
        _ => false,
    }
}

/// End (exclusive) of the run of blank or indented lines starting at `from`.
fn indented_end(lines: &[Line], from: usize) -> usize {
    let mut end = from;
    while end < lines.len() && (lines[end].is_blank() || lines[end].indent > 0) {
        end += 1;
    }
    end
}

fn min_indent(lines: &[Line]) -> Option<usize> {
    lines.iter().filter(|l| !l.is_blank()).map(|l| l.indent).min()
}

fn dedent_all(lines: &[Line]) -> Vec<Line> {
    let by = min_indent(lines).unwrap_or(0);
    lines.iter().map(|l| l.dedent(by)).collect()
}

/// Rebuilds literal text, keeping indentation relative to the shallowest line.
fn literal_text(lines: &[Line]) -> String {
    let by = min_indent(lines).unwrap_or(0);
    let text = lines
        .iter()
        .map(|l| {
            if l.is_blank() {
                String::new()
            } else {
                format!("{}{}", " ".repeat(l.indent - by), l.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    text.trim_end_matches('\n').to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Style {
    adornment: char,
    overline: bool,
}

enum Item {
    Block(Block),
    Heading { style: Style, title: Text },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enumerator {
    Auto,
    Number(u64),
}

/// A list marker: what it is, the column its content starts at, and the
/// content on the marker line.
struct Marker<'a, K> {
    kind: K,
    column: usize,
    rest: &'a str,
}

fn bullet(text: &str) -> Option<Marker<'_, char>> {
    let c = text.chars().next()?;
    if !"-*+".contains(c) {
        return None;
    }
    let after = &text[1..];
    if !after.is_empty() && !after.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = after.trim_start();
    Some(Marker {
        kind: c,
        column: 1 + after.len() - rest.len(),
        rest,
    })
}

fn enumerator(text: &str) -> Option<Marker<'_, Enumerator>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^(\d+|#)\.(\s+|$)").expect("enumerator pattern is valid"));
    let caps = pattern.captures(text)?;
    let kind = match &caps[1] {
        "#" => Enumerator::Auto,
        digits => Enumerator::Number(digits.parse().ok()?),
    };
    let column = caps.get(0)?.end();
    Some(Marker {
        kind,
        column,
        rest: &text[column..],
    })
}

fn directive(text: &str) -> Option<(&str, Option<&str>)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\.\.\s+([A-Za-z][\w-]*)::(?:\s+(.*))?$").expect("directive pattern is valid")
    });
    let caps = pattern.captures(text)?;
    Some((caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str())))
}

fn target(text: &str) -> Option<(&str, &str)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\.\.\s+_([^:]+):(?:\s+(.*))?$").expect("target pattern is valid"));
    let caps = pattern.captures(text)?;
    Some((caps.get(1)?.as_str(), caps.get(2).map_or("", |m| m.as_str())))
}

struct Parser<'r> {
    reporter: &'r mut Reporter,
    meta: Vec<(String, String)>,
    targets: HashMap<String, String>,
}

impl Parser<'_> {
    fn parse_nested(&mut self, lines: &[Line]) -> Result<Vec<Block>, MarkupError> {
        Ok(self
            .parse_body(lines, false)?
            .into_iter()
            .filter_map(|item| match item {
                Item::Block(block) => Some(block),
                Item::Heading { .. } => None,
            })
            .collect())
    }

    fn parse_body(&mut self, lines: &[Line], allow_sections: bool) -> Result<Vec<Item>, MarkupError> {
        let mut items = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            if line.is_blank() {
                i += 1;
                continue;
            }

            if line.indent > 0 {
                let end = indented_end(lines, i);
                let body = self.parse_nested(&dedent_all(&lines[i..end]))?;
                items.push(Item::Block(Block::BlockQuote(body)));
                i = end;
                continue;
            }

            if line.text == ".." || line.text.starts_with(".. ") {
                i = self.explicit_markup(lines, i, &mut items)?;
                continue;
            }

            if let Some(next) = self.section(lines, i, allow_sections, &mut items)? {
                i = next;
                continue;
            }

            if let Some(next) = self.transition(lines, i, allow_sections, &mut items)? {
                i = next;
                continue;
            }

            if bullet(&line.text).is_some() {
                i = self.bullet_list(lines, i, &mut items)?;
                continue;
            }

            if enumerator(&line.text).is_some() {
                i = self.enumerated_list(lines, i, &mut items)?;
                continue;
            }

            i = self.paragraph(lines, i, &mut items)?;
        }
        Ok(items)
    }

    fn section(
        &mut self,
        lines: &[Line],
        i: usize,
        allow_sections: bool,
        items: &mut Vec<Item>,
    ) -> Result<Option<usize>, MarkupError> {
        let line = &lines[i];

        // Overline, title, underline.
        if is_adornment(&line.text) && i + 2 < lines.len() {
            let (title, under) = (&lines[i + 1], &lines[i + 2]);
            let adornment = line.text.chars().next().unwrap_or_default();
            if !title.is_blank() && under.indent == 0 && is_adornment(&under.text) && under.text.starts_with(adornment) {
                if under.text != line.text {
                    self.reporter
                        .severe(line.number, "Title overline & underline mismatch.")?;
                }
                if title.text.chars().count() > line.text.chars().count() {
                    self.reporter.warning(line.number, "Title overline too short.")?;
                }
                if !allow_sections {
                    self.reporter
                        .severe(line.number, "Unexpected section title or transition.")?;
                }
                items.push(Item::Heading {
                    style: Style {
                        adornment,
                        overline: true,
                    },
                    title: Text {
                        text: title.text.clone(),
                        line: title.number,
                    },
                });
                return Ok(Some(i + 3));
            }
        }

        // Title, underline.
        let Some(under) = lines.get(i + 1) else {
            return Ok(None);
        };
        if under.indent != 0 || !is_adornment(&under.text) {
            return Ok(None);
        }
        let title_width = line.text.chars().count();
        let under_width = under.text.chars().count();
        if under_width < title_width {
            if under_width < 4 {
                self.reporter.info(
                    under.number,
                    "Possible title underline, too short for the title. \
                     Treating it as ordinary text because it's so short.",
                )?;
                return Ok(None);
            }
            self.reporter.warning(under.number, "Title underline too short.")?;
        }
        if !allow_sections {
            self.reporter.severe(line.number, "Unexpected section title.")?;
        }
        items.push(Item::Heading {
            style: Style {
                adornment: under.text.chars().next().unwrap_or_default(),
                overline: false,
            },
            title: Text {
                text: line.text.clone(),
                line: line.number,
            },
        });
        Ok(Some(i + 2))
    }

    fn transition(
        &mut self,
        lines: &[Line],
        i: usize,
        allow_sections: bool,
        items: &mut Vec<Item>,
    ) -> Result<Option<usize>, MarkupError> {
        let line = &lines[i];
        let isolated = (i == 0 || lines[i - 1].is_blank()) && lines.get(i + 1).map_or(true, Line::is_blank);
        if !is_adornment(&line.text) || line.text.chars().count() < 4 || !isolated {
            return Ok(None);
        }
        if !allow_sections {
            self.reporter
                .severe(line.number, "Unexpected section title or transition.")?;
        }
        items.push(Item::Block(Block::Transition));
        Ok(Some(i + 1))
    }

    fn explicit_markup(&mut self, lines: &[Line], i: usize, items: &mut Vec<Item>) -> Result<usize, MarkupError> {
        let line = &lines[i];
        let end = indented_end(lines, i + 1);
        let content = dedent_all(&lines[i + 1..end]);

        if let Some((name, url)) = target(&line.text) {
            let continued = content.iter().filter(|l| !l.is_blank()).map(|l| l.text.as_str());
            let url: String = std::iter::once(url).chain(continued).collect();
            let url = if url.is_empty() {
                format!("#{}", slug::slugify(name))
            } else {
                url
            };
            self.targets.insert(normalize_name(name), url);
            return Ok(end);
        }

        let Some((name, argument)) = directive(&line.text) else {
            // Comment.
            return Ok(end);
        };
        let name = name.to_lowercase();
        match name.as_str() {
            "meta" => self.meta_directive(line, argument, &content)?,
            "code" | "code-block" | "sourcecode" => {
                if min_indent(&content).is_none() {
                    self.reporter.error(
                        line.number,
                        format!("Content block expected for the \"{name}\" directive; none found."),
                    )?;
                } else {
                    items.push(Item::Block(Block::Literal {
                        text: literal_text(&content),
                        language: argument.map(|a| a.trim().to_owned()),
                    }));
                }
            }
            kind if ADMONITIONS.contains(&kind) => {
                let mut body_lines = Vec::with_capacity(content.len() + 1);
                if let Some(argument) = argument {
                    body_lines.push(Line {
                        number: line.number,
                        indent: 0,
                        text: argument.trim().to_owned(),
                    });
                }
                body_lines.extend(content);
                if min_indent(&body_lines).is_none() {
                    self.reporter.error(
                        line.number,
                        format!("The \"{kind}\" admonition is empty; content required."),
                    )?;
                } else {
                    let body = self.parse_nested(&body_lines)?;
                    items.push(Item::Block(Block::Admonition {
                        kind: kind.to_owned(),
                        body,
                    }));
                }
            }
            _ => {
                self.reporter
                    .error(line.number, format!("Unknown directive type \"{name}\"."))?;
            }
        }
        Ok(end)
    }

    fn meta_directive(&mut self, line: &Line, argument: Option<&str>, content: &[Line]) -> Result<(), MarkupError> {
        if argument.is_some() {
            return self.reporter.error(
                line.number,
                "Error in \"meta\" directive: no arguments permitted.",
            );
        }
        if min_indent(content).is_none() {
            return self.reporter.error(line.number, "Empty meta directive.");
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        for field_line in content.iter().filter(|l| !l.is_blank()) {
            if field_line.indent > 0 {
                if let Some((_, value)) = fields.last_mut() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(&field_line.text);
                    continue;
                }
            }
            match parse_field(&field_line.text) {
                Some((key, value)) => fields.push((key.to_owned(), value.to_owned())),
                None => {
                    self.reporter.error(field_line.number, "Invalid meta directive.")?;
                }
            }
        }
        self.meta.extend(fields);
        Ok(())
    }

    fn bullet_list(&mut self, lines: &[Line], start: usize, items: &mut Vec<Item>) -> Result<usize, MarkupError> {
        let mut list = Vec::new();
        let mut i = start;
        let Some(first) = bullet(&lines[i].text) else {
            return Ok(i + 1);
        };
        let symbol = first.kind;

        loop {
            let Some(marker) = bullet(&lines[i].text) else {
                break;
            };
            let (body, end) = self.list_item(lines, i, marker.column, marker.rest)?;
            list.push(body);
            i = end;

            let next = skip_blank(lines, i);
            match lines.get(next).and_then(|l| bullet(&l.text)) {
                Some(m) if m.kind == symbol && lines[next].indent == 0 => i = next,
                _ => {
                    self.check_unindent(lines, i, "Bullet list")?;
                    break;
                }
            }
        }

        items.push(Item::Block(Block::BulletList(list)));
        Ok(i)
    }

    fn enumerated_list(&mut self, lines: &[Line], start: usize, items: &mut Vec<Item>) -> Result<usize, MarkupError> {
        let mut list = Vec::new();
        let mut i = start;
        let Some(first) = enumerator(&lines[i].text) else {
            return Ok(i + 1);
        };
        let first_ordinal = match first.kind {
            Enumerator::Auto => 1,
            Enumerator::Number(n) => n,
        };
        if first_ordinal != 1 {
            self.reporter.info(
                lines[i].number,
                format!("Enumerated list start value not ordinal-1: \"{first_ordinal}\""),
            )?;
        }

        let mut previous = first.kind;
        let mut ordinal = first_ordinal;
        loop {
            let Some(marker) = enumerator(&lines[i].text) else {
                break;
            };
            let (body, end) = self.list_item(lines, i, marker.column, marker.rest)?;
            list.push(body);
            i = end;

            let next = skip_blank(lines, i);
            let continues = lines.get(next).and_then(|l| enumerator(&l.text)).map(|m| m.kind);
            match (previous, continues) {
                (Enumerator::Auto, Some(Enumerator::Auto)) => {}
                (Enumerator::Number(_), Some(Enumerator::Number(n))) if ordinal.checked_add(1) == Some(n) => {}
                _ => {
                    self.check_unindent(lines, i, "Enumerated list")?;
                    break;
                }
            }
            if let Some(kind) = continues {
                previous = kind;
            }
            ordinal = ordinal.saturating_add(1);
            i = next;
        }

        items.push(Item::Block(Block::EnumeratedList {
            start: first_ordinal,
            items: list,
        }));
        Ok(i)
    }

    /// Parses one list item whose marker is on line `i`.
    fn list_item(
        &mut self,
        lines: &[Line],
        i: usize,
        column: usize,
        rest: &str,
    ) -> Result<(Vec<Block>, usize), MarkupError> {
        let end = indented_end(lines, i + 1);
        let continuation = &lines[i + 1..end];
        let shift = min_indent(continuation).unwrap_or(column).min(column);

        let mut body_lines = Vec::with_capacity(continuation.len() + 1);
        if !rest.is_empty() {
            body_lines.push(Line {
                number: lines[i].number,
                indent: 0,
                text: rest.to_owned(),
            });
        }
        body_lines.extend(continuation.iter().map(|l| l.dedent(shift)));
        Ok((self.parse_nested(&body_lines)?, end))
    }

    /// Warns when a construct is followed by unindented text with no blank
    /// line in between.
    fn check_unindent(&mut self, lines: &[Line], end: usize, what: &str) -> Result<(), MarkupError> {
        let ended_with_blank = end > 0 && lines[end - 1].is_blank();
        if end < lines.len() && !ended_with_blank {
            self.reporter.warning(
                lines[end].number,
                format!("{what} ends without a blank line; unexpected unindent."),
            )?;
        }
        Ok(())
    }

    fn paragraph(&mut self, lines: &[Line], start: usize, items: &mut Vec<Item>) -> Result<usize, MarkupError> {
        let mut end = start;
        while end < lines.len() && !lines[end].is_blank() && lines[end].indent == 0 {
            end += 1;
        }
        let mut text = lines[start..end]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let next_indented = lines.get(end).map_or(false, |l| !l.is_blank() && l.indent > 0);

        if !text.ends_with("::") && next_indented {
            if end - start == 1 {
                return self.definition_list(lines, start, items);
            }
            self.reporter.error(lines[end].number, "Unexpected indentation.")?;
        }

        let literal_expected = text.ends_with("::");
        if literal_expected {
            if text == "::" {
                text.clear();
            } else if text[..text.len() - 2].ends_with(char::is_whitespace) {
                text.truncate(text.len() - 2);
                text.truncate(text.trim_end().len());
            } else {
                text.pop();
            }
        }
        if !text.is_empty() {
            items.push(Item::Block(Block::Paragraph(Text {
                text,
                line: lines[start].number,
            })));
        }

        if !literal_expected {
            return Ok(end);
        }
        let body_start = skip_blank(lines, end);
        match lines.get(body_start) {
            Some(l) if l.indent > 0 => {
                let body_end = indented_end(lines, body_start);
                items.push(Item::Block(Block::Literal {
                    text: literal_text(&lines[body_start..body_end]),
                    language: None,
                }));
                Ok(body_end)
            }
            _ => {
                self.reporter
                    .warning(lines[end - 1].number, "Literal block expected; none found.")?;
                Ok(end)
            }
        }
    }

    fn definition_list(&mut self, lines: &[Line], start: usize, items: &mut Vec<Item>) -> Result<usize, MarkupError> {
        let mut entries = Vec::new();
        let mut i = start;
        loop {
            let term = Text {
                text: lines[i].text.clone(),
                line: lines[i].number,
            };
            let end = indented_end(lines, i + 1);
            let definition = self.parse_nested(&dedent_all(&lines[i + 1..end]))?;
            entries.push((term, definition));
            i = end;

            let next = skip_blank(lines, i);
            let is_entry = lines.get(next).map_or(false, |l| l.indent == 0 && !l.text.starts_with(".."))
                && lines.get(next + 1).map_or(false, |l| !l.is_blank() && l.indent > 0);
            if !is_entry {
                break;
            }
            i = next;
        }
        items.push(Item::Block(Block::DefinitionList(entries)));
        Ok(i)
    }

    fn nest_sections(&mut self, items: Vec<Item>) -> Result<Vec<Block>, MarkupError> {
        fn close(open: &mut Vec<(Text, Vec<Block>)>, root: &mut Vec<Block>) {
            if let Some((title, body)) = open.pop() {
                let section = Block::Section { title, body };
                match open.last_mut() {
                    Some((_, parent)) => parent.push(section),
                    None => root.push(section),
                }
            }
        }

        let mut styles: Vec<Style> = Vec::new();
        let mut root = Vec::new();
        let mut open: Vec<(Text, Vec<Block>)> = Vec::new();

        for item in items {
            match item {
                Item::Block(block) => match open.last_mut() {
                    Some((_, body)) => body.push(block),
                    None => root.push(block),
                },
                Item::Heading { style, title } => {
                    let level = match styles.iter().position(|s| *s == style) {
                        Some(index) => index + 1,
                        None => {
                            styles.push(style);
                            styles.len()
                        }
                    };
                    if level > open.len() + 1 {
                        self.reporter.severe(title.line, "Title level inconsistent.")?;
                    }
                    let level = level.min(open.len() + 1);
                    while open.len() >= level {
                        close(&mut open, &mut root);
                    }
                    open.push((title, Vec::new()));
                }
            }
        }
        while !open.is_empty() {
            close(&mut open, &mut root);
        }
        Ok(root)
    }
}

fn skip_blank(lines: &[Line], from: usize) -> usize {
    let mut i = from;
    while i < lines.len() && lines[i].is_blank() {
        i += 1;
    }
    i
}
