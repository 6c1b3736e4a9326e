use std::path::{Path, PathBuf};

use anyhow::Context;
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;

use crate::{
    document::{DocumentRenderer, RenderedDocument},
    index::parse_date,
};

pub const POST_TEMPLATE: &str = "post";
const POST_TEMPLATE_FILE: &str = "post.hbs";
const BUILTIN_POST_TEMPLATE: &str = include_str!("../template/post.hbs");

handlebars_helper!(meta_or: |metadata: object, key: str, fallback: str| {
    metadata
        .get(key)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_owned()
});

handlebars_helper!(human_date: |date: str| {
    parse_date(date)
        .map(|date| date.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|_| date.to_owned())
});

/// Builds the template registry, reading `post.hbs` from `template_dir` when
/// given and falling back to the built-in template otherwise.
fn generate_handlebars(template_dir: Option<&Path>) -> anyhow::Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    handlebars.register_helper("meta_or", Box::new(meta_or));
    handlebars.register_helper("human_date", Box::new(human_date));
    match template_dir {
        Some(dir) => handlebars
            .register_template_file(POST_TEMPLATE, dir.join(POST_TEMPLATE_FILE))
            .context(POST_TEMPLATE_FILE)?,
        None => handlebars
            .register_template_string(POST_TEMPLATE, BUILTIN_POST_TEMPLATE)
            .context("built-in post.hbs")?,
    }
    Ok(handlebars)
}

#[derive(Serialize)]
struct PostPage<'a> {
    blog_name: &'a str,
    #[serde(flatten)]
    document: &'a RenderedDocument,
}

/// Renders posts of one blog directory into full pages.
pub struct Renderer {
    root: PathBuf,
    blog_name: String,
    documents: DocumentRenderer,
    handlebars: Handlebars<'static>,
}

impl Renderer {
    pub fn new(
        root: impl Into<PathBuf>,
        blog_name: impl Into<String>,
        documents: DocumentRenderer,
        template_dir: Option<&Path>,
    ) -> anyhow::Result<Self> {
        Ok(Renderer {
            root: root.into(),
            blog_name: blog_name.into(),
            documents,
            handlebars: generate_handlebars(template_dir)?,
        })
    }

    /// Renders the post at `rel_path` (relative to the blog directory)
    /// without applying the template.
    pub fn document(&self, rel_path: &str) -> anyhow::Result<RenderedDocument> {
        let path = self.root.join(rel_path);
        self.documents
            .render_file(&path)
            .with_context(|| format!("rendering {}", path.display()))
    }

    pub fn render_post(&self, rel_path: &str) -> anyhow::Result<String> {
        let document = self.document(rel_path)?;
        let page = PostPage {
            blog_name: &self.blog_name,
            document: &document,
        };
        self.handlebars
            .render(POST_TEMPLATE, &page)
            .with_context(|| format!("applying {POST_TEMPLATE_FILE} to {rel_path}"))
    }
}
