//! Turns a parsed [`Document`] into a standalone HTML page.
//!
//! Block content is lowered to [`pulldown_cmark`] events and rendered with
//! [`pulldown_cmark::html::push_html`]; the page shell is built with [`maud`].

use std::collections::HashMap;

use maud::{html, PreEscaped, DOCTYPE};
use pulldown_cmark::{CodeBlockKind, CowStr, Event, HeadingLevel, LinkType, Tag, TagEnd};

use super::{
    block::{Block, Document, Text},
    inline::{self, Inline},
    MarkupError, Reporter, Settings, GENERATOR,
};

const STYLESHEET: &str = "\
body { margin: 0 auto; max-width: 46em; padding: 0 1em; font-family: sans-serif; line-height: 1.5; }
h1.title { text-align: center; }
h2.subtitle { text-align: center; font-weight: normal; }
pre { overflow-x: auto; padding: 0.5em; background: #f4f4f4; }
blockquote { margin-left: 2em; }
dt { font-weight: bold; }
div.admonition { margin: 1em 2em; padding: 0 1em; border: 1px solid #999; }
p.admonition-title { font-weight: bold; }
";

pub(crate) fn write(document: &Document, settings: &Settings, reporter: &mut Reporter) -> Result<String, MarkupError> {
    let mut writer = Writer {
        targets: &document.targets,
        reporter,
        ids: HashMap::new(),
    };

    let title = document
        .title
        .as_ref()
        .map(|title| writer.heading(title))
        .transpose()?;
    let subtitle = document
        .subtitle
        .as_ref()
        .map(|subtitle| writer.heading(subtitle))
        .transpose()?;

    let mut events = Vec::new();
    writer.blocks(&document.body, 0, &mut events)?;
    let mut body = String::new();
    pulldown_cmark::html::push_html(&mut body, events.into_iter());

    let page = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                meta name="generator" content=(GENERATOR);
                @if let Some(heading) = &title {
                    title { (heading.plain) }
                }
                @for (name, content) in &document.meta {
                    meta name=(name) content=(content);
                }
                @if settings.embed_stylesheet {
                    style { (PreEscaped(STYLESHEET)) }
                }
            }
            body {
                div.document id=[title.as_ref().map(|t| &t.id)] {
                    @if let Some(title) = &title {
                        h1.title { (PreEscaped(&title.html)) }
                    }
                    @if let Some(subtitle) = &subtitle {
                        h2.subtitle id=(subtitle.id) { (PreEscaped(&subtitle.html)) }
                    }
                    (PreEscaped(body))
                }
            }
        }
    };
    Ok(page.into_string())
}

/// A rendered title together with the id assigned to it.
struct Heading {
    id: String,
    plain: String,
    html: String,
}

struct Writer<'a> {
    targets: &'a HashMap<String, String>,
    reporter: &'a mut Reporter,
    /// How often each id has been handed out.
    ids: HashMap<String, usize>,
}

impl Writer<'_> {
    fn unique_id(&mut self, title: &str) -> String {
        let mut base = slug::slugify(title);
        if base.is_empty() {
            base = "section".to_owned();
        }
        let seen = self.ids.entry(base.clone()).or_insert(0);
        let id = match *seen {
            0 => base,
            n => format!("{base}-{n}"),
        };
        *seen += 1;
        id
    }

    fn heading(&mut self, title: &Text) -> Result<Heading, MarkupError> {
        let inlines = inline::parse(&title.text, title.line, self.reporter)?;
        let plain = inline::plain_text(&inlines);
        let mut events = Vec::new();
        self.inlines(&inlines, title.line, &mut events)?;
        let mut html = String::new();
        pulldown_cmark::html::push_html(&mut html, events.into_iter());
        Ok(Heading {
            id: self.unique_id(&plain),
            plain,
            html,
        })
    }

    fn blocks(&mut self, blocks: &[Block], depth: usize, events: &mut Vec<Event<'static>>) -> Result<(), MarkupError> {
        for block in blocks {
            self.block(block, depth, events)?;
        }
        Ok(())
    }

    fn block(&mut self, block: &Block, depth: usize, events: &mut Vec<Event<'static>>) -> Result<(), MarkupError> {
        match block {
            Block::Section { title, body } => {
                let heading = self.heading(title)?;
                let level = heading_level(depth);
                events.push(Event::Html(
                    format!("<div class=\"section\" id=\"{}\">\n", heading.id).into(),
                ));
                events.push(Event::Start(Tag::Heading {
                    level,
                    id: None,
                    classes: vec![],
                    attrs: vec![],
                }));
                events.push(Event::Html(heading.html.into()));
                events.push(Event::End(TagEnd::Heading(level)));
                self.blocks(body, depth + 1, events)?;
                events.push(Event::Html("</div>\n".into()));
            }
            Block::Paragraph(text) => {
                events.push(Event::Start(Tag::Paragraph));
                self.text(text, events)?;
                events.push(Event::End(TagEnd::Paragraph));
            }
            Block::Literal { text, language } => {
                let language = language.clone().unwrap_or_default();
                events.push(Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(language.into()))));
                events.push(Event::Text(format!("{text}\n").into()));
                events.push(Event::End(TagEnd::CodeBlock));
            }
            Block::BulletList(items) => {
                events.push(Event::Start(Tag::List(None)));
                self.list_items(items, depth, events)?;
                events.push(Event::End(TagEnd::List(false)));
            }
            Block::EnumeratedList { start, items } => {
                events.push(Event::Start(Tag::List(Some(*start))));
                self.list_items(items, depth, events)?;
                events.push(Event::End(TagEnd::List(true)));
            }
            Block::DefinitionList(entries) => {
                events.push(Event::Html("<dl>\n".into()));
                for (term, definition) in entries {
                    events.push(Event::Html("<dt>".into()));
                    self.text(term, events)?;
                    events.push(Event::Html("</dt>\n<dd>\n".into()));
                    self.blocks(definition, depth, events)?;
                    events.push(Event::Html("</dd>\n".into()));
                }
                events.push(Event::Html("</dl>\n".into()));
            }
            Block::BlockQuote(body) => {
                events.push(Event::Html("<blockquote>\n".into()));
                self.blocks(body, depth, events)?;
                events.push(Event::Html("</blockquote>\n".into()));
            }
            Block::Admonition { kind, body } => {
                events.push(Event::Html(
                    format!(
                        "<div class=\"admonition {kind}\">\n<p class=\"admonition-title\">{}</p>\n",
                        capitalize(kind)
                    )
                    .into(),
                ));
                self.blocks(body, depth, events)?;
                events.push(Event::Html("</div>\n".into()));
            }
            Block::Transition => events.push(Event::Rule),
        }
        Ok(())
    }

    fn list_items(
        &mut self,
        items: &[Vec<Block>],
        depth: usize,
        events: &mut Vec<Event<'static>>,
    ) -> Result<(), MarkupError> {
        for item in items {
            events.push(Event::Start(Tag::Item));
            match item.as_slice() {
                // Simple items are rendered without a paragraph.
                [Block::Paragraph(text)] => self.text(text, events)?,
                blocks => self.blocks(blocks, depth, events)?,
            }
            events.push(Event::End(TagEnd::Item));
        }
        Ok(())
    }

    fn text(&mut self, text: &Text, events: &mut Vec<Event<'static>>) -> Result<(), MarkupError> {
        let inlines = inline::parse(&text.text, text.line, self.reporter)?;
        self.inlines(&inlines, text.line, events)
    }

    fn inlines(&mut self, inlines: &[Inline], line: usize, events: &mut Vec<Event<'static>>) -> Result<(), MarkupError> {
        for inline in inlines {
            match inline {
                Inline::Text(text) => events.push(Event::Text(text.clone().into())),
                Inline::Emphasis(text) => {
                    events.push(Event::Start(Tag::Emphasis));
                    events.push(Event::Text(text.clone().into()));
                    events.push(Event::End(TagEnd::Emphasis));
                }
                Inline::Strong(text) => {
                    events.push(Event::Start(Tag::Strong));
                    events.push(Event::Text(text.clone().into()));
                    events.push(Event::End(TagEnd::Strong));
                }
                Inline::Literal(text) => events.push(Event::Code(text.clone().into())),
                Inline::Cite(text) => {
                    events.push(Event::Html("<cite>".into()));
                    events.push(Event::Text(text.clone().into()));
                    events.push(Event::Html("</cite>".into()));
                }
                Inline::Link { text, url } => link(text, url, events),
                Inline::Reference { text, name } => match self.targets.get(name) {
                    Some(url) => link(text, url, events),
                    None => {
                        self.reporter
                            .error(line, format!("Unknown target name: \"{name}\"."))?;
                        events.push(Event::Text(text.clone().into()));
                    }
                },
            }
        }
        Ok(())
    }
}

fn link(text: &str, url: &str, events: &mut Vec<Event<'static>>) {
    events.push(Event::Start(Tag::Link {
        link_type: LinkType::Inline,
        dest_url: CowStr::from(url.to_owned()),
        title: "".into(),
        id: "".into(),
    }));
    events.push(Event::Text(text.to_owned().into()));
    events.push(Event::End(TagEnd::Link));
}

/// Sections start at `<h2>`; `<h1>` is the document title.
fn heading_level(depth: usize) -> HeadingLevel {
    match depth {
        0 => HeadingLevel::H2,
        1 => HeadingLevel::H3,
        2 => HeadingLevel::H4,
        3 => HeadingLevel::H5,
        _ => HeadingLevel::H6,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rst::{block, Severity};

    fn body_of(source: &str) -> String {
        let mut reporter = Reporter::new(Severity::Error);
        let document = block::parse(source, &mut reporter).unwrap();
        let html = write(&document, &Settings::default(), &mut reporter).unwrap();
        let start = html.find("<div class=\"document\"").unwrap();
        html[start..].to_owned()
    }

    #[test]
    fn ids_are_unique_across_title_and_sections() {
        let body = body_of("Intro\n=====\n\ntext\n\nIntro\n-----\n\nmore\n\nOther\n-----\n\nlast\n");
        assert!(body.starts_with(r#"<div class="document" id="intro">"#));
        assert!(body.contains(r#"<div class="section" id="intro-1">"#));
        assert!(body.contains(r#"<div class="section" id="other">"#));
    }

    #[test]
    fn untitled_documents_have_no_id() {
        let body = body_of("Just a paragraph.\n");
        assert!(body.starts_with("<div class=\"document\"><p>Just a paragraph.</p>"));
    }

    #[test]
    fn untitled_pages_have_no_title_element() {
        let mut reporter = Reporter::new(Severity::Error);
        let document = block::parse("Just a paragraph.\n", &mut reporter).unwrap();
        let html = write(&document, &Settings::default(), &mut reporter).unwrap();
        assert!(!html.contains("<title>"));
    }

    #[test]
    fn punctuation_only_titles_fall_back_to_section() {
        let body = body_of("A\n-\n\nx\n\n???\n---\n\ny\n");
        assert!(body.contains(r#"id="section""#));
    }

    #[test]
    fn inline_markup_in_titles_is_kept_in_the_body_only() {
        let mut reporter = Reporter::new(Severity::Error);
        let document = block::parse("The *best* title\n================\n", &mut reporter).unwrap();
        let html = write(&document, &Settings::default(), &mut reporter).unwrap();
        assert!(html.contains("<title>The best title</title>"));
        assert!(html.contains(r#"<h1 class="title">The <em>best</em> title</h1>"#));
    }

    #[test]
    fn items_with_several_blocks_keep_paragraphs() {
        let body = body_of("- first\n\n  second\n");
        assert!(body.contains("<li>\n<p>first</p>\n<p>second</p>\n</li>"));
    }

    #[test]
    fn capitalize_words() {
        assert_eq!(capitalize("warning"), "Warning");
        assert_eq!(capitalize(""), "");
    }
}
