//! Renders one post into its title, a flattened HTML body and the metadata
//! found in the page head.
//!
//! The reStructuredText converter produces a full page in which every section
//! is wrapped in a `<div class="section">`. The page is parsed back into a DOM,
//! the section wrappers are replaced by their children, and the children of
//! `<div class="document">` become the body.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use html5ever::{
    parse_document, serialize,
    serialize::{SerializeOpts, TraversalScope},
    tendril::TendrilSink,
};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use serde::Serialize;
use thiserror::Error;

use crate::{
    events::{Event, EventSink},
    rst::{self, MarkupError, Settings},
};

const GENERATOR_META: &str = "generator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub title: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("markup error: {0}")]
    Markup(#[from] MarkupError),

    #[error("rendered page has no {0} element")]
    MissingElement(&'static str),

    #[error("could not serialize the document body: {0}")]
    Serialize(#[source] io::Error),
}

pub struct DocumentRenderer {
    settings: Settings,
    sink: Arc<dyn EventSink>,
}

impl DocumentRenderer {
    pub fn new(settings: Settings, sink: Arc<dyn EventSink>) -> Self {
        DocumentRenderer { settings, sink }
    }

    pub fn render_file(&self, path: impl AsRef<Path>) -> Result<RenderedDocument, RenderError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| RenderError::Io {
            path: path.to_owned(),
            source,
        })?;
        self.render_str(&source)
    }

    pub fn render_str(&self, source: &str) -> Result<RenderedDocument, RenderError> {
        let published = rst::publish(source, &self.settings)?;
        for diagnostic in &published.diagnostics {
            self.sink.emit(Event::MarkupDiagnostic { diagnostic });
        }
        from_html(&published.html)
    }
}

/// Extracts a [`RenderedDocument`] from a standalone HTML page.
pub fn from_html(html: &str) -> Result<RenderedDocument, RenderError> {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);

    let head = find(&dom.document, &|node: &Handle| element_name(node) == Some("head"))
        .ok_or(RenderError::MissingElement("head"))?;
    let title = find(&head, &|node: &Handle| element_name(node) == Some("title"))
        .ok_or(RenderError::MissingElement("title"))?;

    let mut metadata = BTreeMap::new();
    let mut metas = Vec::new();
    collect(&head, &|node: &Handle| element_name(node) == Some("meta"), &mut metas);
    for meta in &metas {
        match attribute(meta, "name") {
            Some(name) if name != GENERATOR_META => {
                metadata.insert(name, attribute(meta, "content").unwrap_or_default());
            }
            _ => {}
        }
    }

    let document = find(&dom.document, &|node: &Handle| {
        element_name(node) == Some("div") && has_class(node, "document")
    })
    .ok_or(RenderError::MissingElement("div.document"))?;
    unwrap_sections(&document);

    let mut out = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    serialize(&mut out, &SerializableHandle::from(document), opts).map_err(RenderError::Serialize)?;

    Ok(RenderedDocument {
        title: text_content(&title),
        body: String::from_utf8_lossy(&out).trim().to_owned(),
        metadata,
    })
}

fn element_name(node: &Handle) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(&*name.local),
        _ => None,
    }
}

fn attribute(node: &Handle, key: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == key)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

fn has_class(node: &Handle, class: &str) -> bool {
    attribute(node, "class").map_or(false, |classes| classes.split_whitespace().any(|c| c == class))
}

fn is_section(node: &Handle) -> bool {
    match element_name(node) {
        Some("section") => true,
        Some("div") => has_class(node, "section"),
        _ => false,
    }
}

/// First descendant of `node` in document order matching `pred`.
fn find(node: &Handle, pred: &dyn Fn(&Handle) -> bool) -> Option<Handle> {
    for child in node.children.borrow().iter() {
        if pred(child) {
            return Some(child.clone());
        }
        if let Some(found) = find(child, pred) {
            return Some(found);
        }
    }
    None
}

fn collect(node: &Handle, pred: &dyn Fn(&Handle) -> bool, out: &mut Vec<Handle>) {
    for child in node.children.borrow().iter() {
        if pred(child) {
            out.push(child.clone());
        }
        collect(child, pred, out);
    }
}

fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    for child in node.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => text.push_str(&contents.borrow()),
            _ => text.push_str(&text_content(child)),
        }
    }
    text
}

/// Replaces every section wrapper below `parent` with its children, in place.
fn unwrap_sections(parent: &Handle) {
    let children = parent.children.take();
    let mut flattened = Vec::with_capacity(children.len());
    for child in children {
        unwrap_sections(&child);
        if is_section(&child) {
            for grandchild in child.children.take() {
                grandchild.parent.set(Some(Rc::downgrade(parent)));
                flattened.push(grandchild);
            }
        } else {
            flattened.push(child);
        }
    }
    *parent.children.borrow_mut() = flattened;
}
