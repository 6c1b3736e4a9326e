//! Inline markup inside paragraphs, titles and list items.
//!
//! Inline constructs never nest. A start-string only counts when it follows
//! whitespace or opening punctuation and is followed by a non-space; the
//! matching end-string must follow a non-space and precede whitespace,
//! punctuation or the end of the text.

use super::{block::normalize_name, MarkupError, Reporter};

const START_PRECEDERS: &str = "'\"([{<-/:";
const END_FOLLOWERS: &str = "'\")]}>-/:.,;!?\\";
const URI_SCHEMES: &[&str] = &["http://", "https://", "mailto:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inline {
    Text(String),
    Emphasis(String),
    Strong(String),
    Literal(String),
    Cite(String),
    Link { text: String, url: String },
    Reference { text: String, name: String },
}

impl Inline {
    fn plain(&self) -> &str {
        match self {
            Inline::Text(text)
            | Inline::Emphasis(text)
            | Inline::Strong(text)
            | Inline::Literal(text)
            | Inline::Cite(text)
            | Inline::Link { text, .. }
            | Inline::Reference { text, .. } => text,
        }
    }
}

/// The text of `inlines` with all markup removed.
pub(crate) fn plain_text(inlines: &[Inline]) -> String {
    inlines.iter().map(Inline::plain).collect()
}

pub(crate) fn parse(text: &str, line: usize, reporter: &mut Reporter) -> Result<Vec<Inline>, MarkupError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c == '\\' {
            match chars.get(pos + 1) {
                Some(next) if next.is_whitespace() => {}
                Some(next) => buf.push(*next),
                None => buf.push('\\'),
            }
            pos += 2;
            continue;
        }

        let step = match markup(&chars, pos) {
            Step::Plain if at_word_start(&chars, pos) => word(&chars, pos),
            step => step,
        };
        match step {
            Step::Markup(inline, next) => {
                if !buf.is_empty() {
                    out.push(Inline::Text(std::mem::take(&mut buf)));
                }
                out.push(inline);
                pos = next;
            }
            Step::Unterminated { kind, len } => {
                reporter.warning(line, format!("Inline {kind} start-string without end-string."))?;
                buf.extend(&chars[pos..pos + len]);
                pos += len;
            }
            Step::Plain => {
                buf.push(c);
                pos += 1;
            }
        }
    }

    if !buf.is_empty() {
        out.push(Inline::Text(buf));
    }
    Ok(out)
}

enum Step {
    Markup(Inline, usize),
    Unterminated { kind: &'static str, len: usize },
    Plain,
}

fn starts_with(chars: &[char], pos: usize, pattern: &str) -> bool {
    let mut at = pos;
    for p in pattern.chars() {
        if chars.get(at) != Some(&p) {
            return false;
        }
        at += 1;
    }
    true
}

fn at_word_start(chars: &[char], pos: usize) -> bool {
    pos == 0 || chars[pos - 1].is_whitespace() || START_PRECEDERS.contains(chars[pos - 1])
}

fn can_start(chars: &[char], pos: usize, len: usize) -> bool {
    let Some(&after) = chars.get(pos + len) else {
        return false;
    };
    if after.is_whitespace() || !at_word_start(chars, pos) {
        return false;
    }
    // `"*"` and friends are quoted punctuation, not markup.
    let quoted = pos > 0
        && matches!(
            (chars[pos - 1], after),
            ('\'', '\'') | ('"', '"') | ('(', ')') | ('[', ']') | ('{', '}') | ('<', '>')
        );
    !quoted
}

fn can_end(chars: &[char], after: usize) -> bool {
    chars
        .get(after)
        .map_or(true, |c| c.is_whitespace() || END_FOLLOWERS.contains(*c))
}

/// Finds the end-string `end` for content starting at `from`.
fn find_end(chars: &[char], from: usize, end: &str, escapes: bool) -> Option<usize> {
    let width = end.chars().count();
    (from + 1..=chars.len().saturating_sub(width)).find(|&k| {
        starts_with(chars, k, end)
            && !chars[k - 1].is_whitespace()
            && !(escapes && chars[k - 1] == '\\')
            && can_end(chars, k + width)
    })
}

fn unescape(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut iter = chars.iter();
    while let Some(&c) = iter.next() {
        if c == '\\' {
            if let Some(&next) = iter.next() {
                if !next.is_whitespace() {
                    out.push(next);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn markup(chars: &[char], pos: usize) -> Step {
    if starts_with(chars, pos, "``") && can_start(chars, pos, 2) {
        return match find_end(chars, pos + 2, "``", false) {
            Some(k) => Step::Markup(Inline::Literal(chars[pos + 2..k].iter().collect()), k + 2),
            None => Step::Unterminated {
                kind: "literal",
                len: 2,
            },
        };
    }
    if starts_with(chars, pos, "**") && can_start(chars, pos, 2) {
        return match find_end(chars, pos + 2, "**", true) {
            Some(k) => Step::Markup(Inline::Strong(unescape(&chars[pos + 2..k])), k + 2),
            None => Step::Unterminated {
                kind: "strong",
                len: 2,
            },
        };
    }
    if starts_with(chars, pos, "*") && can_start(chars, pos, 1) {
        return match find_end(chars, pos + 1, "*", true) {
            Some(k) => Step::Markup(Inline::Emphasis(unescape(&chars[pos + 1..k])), k + 1),
            None => Step::Unterminated {
                kind: "emphasis",
                len: 1,
            },
        };
    }
    if starts_with(chars, pos, "`") && can_start(chars, pos, 1) {
        return interpreted(chars, pos);
    }
    Step::Plain
}

/// Backquoted text: a title reference, or with a trailing `_`/`__`, a
/// hyperlink reference or embedded link.
fn interpreted(chars: &[char], pos: usize) -> Step {
    let close = (pos + 2..chars.len()).find_map(|k| {
        if chars[k] != '`' || chars[k - 1].is_whitespace() || chars[k - 1] == '\\' {
            return None;
        }
        let underscores = chars[k + 1..].iter().take(2).take_while(|&&c| c == '_').count();
        let after = k + 1 + underscores;
        can_end(chars, after).then_some((k, underscores, after))
    });

    let Some((k, underscores, after)) = close else {
        return Step::Unterminated {
            kind: "interpreted text or phrase reference",
            len: 1,
        };
    };
    let content = unescape(&chars[pos + 1..k]);
    if underscores == 0 {
        return Step::Markup(Inline::Cite(content), after);
    }

    if content.ends_with('>') {
        if let Some(open) = content.rfind('<') {
            let url: String = content[open + 1..content.len() - 1]
                .split_whitespace()
                .collect();
            let text = content[..open].trim_end();
            let text = if text.is_empty() { url.clone() } else { text.to_owned() };
            return Step::Markup(Inline::Link { text, url }, after);
        }
    }
    let name = normalize_name(&content);
    Step::Markup(Inline::Reference { text: content, name }, after)
}

/// Standalone URIs and `name_` references.
fn word(chars: &[char], pos: usize) -> Step {
    if let Some(len) = uri_length(chars, pos) {
        let url: String = chars[pos..pos + len].iter().collect();
        return Step::Markup(
            Inline::Link {
                text: url.clone(),
                url,
            },
            pos + len,
        );
    }

    if !chars[pos].is_alphanumeric() {
        return Step::Plain;
    }
    let mut end = pos + 1;
    while end < chars.len() {
        let c = chars[end];
        let joined = "-._+:".contains(c) && chars.get(end + 1).map_or(false, |n| n.is_alphanumeric());
        if c.is_alphanumeric() || joined {
            end += 1;
        } else {
            break;
        }
    }
    if chars.get(end) == Some(&'_') && chars.get(end + 1) != Some(&'_') && can_end(chars, end + 1) {
        let text: String = chars[pos..end].iter().collect();
        let name = normalize_name(&text);
        return Step::Markup(Inline::Reference { text, name }, end + 1);
    }
    Step::Plain
}

fn uri_length(chars: &[char], pos: usize) -> Option<usize> {
    let scheme = URI_SCHEMES.iter().find(|s| starts_with(chars, pos, s))?;
    let mut len = chars[pos..]
        .iter()
        .take_while(|c| !c.is_whitespace() && !"<>\"".contains(**c))
        .count();
    while len > 0 && ".,;:!?)'".contains(chars[pos + len - 1]) {
        len -= 1;
    }
    (len > scheme.len()).then_some(len)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::rst::Severity;

    fn parse_ok(text: &str) -> Vec<Inline> {
        let mut reporter = Reporter::new(Severity::Error);
        parse(text, 1, &mut reporter).unwrap()
    }

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_owned())
    }

    #[rstest]
    #[case("plain words", vec![text("plain words")])]
    #[case("an *emphasis*.", vec![text("an "), Inline::Emphasis("emphasis".into()), text(".")])]
    #[case("**bold** move", vec![Inline::Strong("bold".into()), text(" move")])]
    #[case("``a * b``", vec![Inline::Literal("a * b".into())])]
    #[case("`Dune`", vec![Inline::Cite("Dune".into())])]
    #[case("2 * 3 * 4", vec![text("2 * 3 * 4")])]
    #[case("a \"*\" star", vec![text("a \"*\" star")])]
    #[case(r"\*not emphasis\*", vec![text("*not emphasis*")])]
    #[case("snake_case", vec![text("snake_case")])]
    fn inline_cases(#[case] source: &str, #[case] expected: Vec<Inline>) {
        assert_eq!(parse_ok(source), expected);
    }

    #[test]
    fn embedded_links() {
        assert_eq!(
            parse_ok("`Rust <https://rust-lang.org>`__"),
            vec![Inline::Link {
                text: "Rust".into(),
                url: "https://rust-lang.org".into()
            }]
        );
        assert_eq!(
            parse_ok("`<https://example.com>`_"),
            vec![Inline::Link {
                text: "https://example.com".into(),
                url: "https://example.com".into()
            }]
        );
    }

    #[test]
    fn references() {
        assert_eq!(
            parse_ok("see `Some Thing`_ or docs_."),
            vec![
                text("see "),
                Inline::Reference {
                    text: "Some Thing".into(),
                    name: "some thing".into()
                },
                text(" or "),
                Inline::Reference {
                    text: "docs".into(),
                    name: "docs".into()
                },
                text("."),
            ]
        );
    }

    #[test]
    fn standalone_uris_drop_trailing_punctuation() {
        assert_eq!(
            parse_ok("(visit https://example.com/a?b=c)."),
            vec![
                text("(visit "),
                Inline::Link {
                    text: "https://example.com/a?b=c".into(),
                    url: "https://example.com/a?b=c".into()
                },
                text(")."),
            ]
        );
    }

    #[test]
    fn unterminated_literal_warns() {
        let mut reporter = Reporter::new(Severity::Error);
        let inlines = parse("an ``open literal", 7, &mut reporter).unwrap();
        assert_eq!(inlines, vec![text("an ``open literal")]);
        assert_eq!(reporter.diagnostics[0].line, 7);
        assert_eq!(
            reporter.diagnostics[0].message,
            "Inline literal start-string without end-string."
        );
    }

    #[test]
    fn plain_text_strips_markup() {
        assert_eq!(plain_text(&parse_ok("Hello *big* ``world``")), "Hello big world");
    }
}
