//! Ties the index and the renderer together behind the `/<year>/<month>/<slug>`
//! addressing scheme used for post URLs.

use std::{fmt, str::FromStr};

use anyhow::{bail, Context};
use chrono::Datelike;

use crate::{
    document::RenderedDocument,
    index::{parse_date, PostIndex, PostRecord},
    renderer::Renderer,
};

/// The address of a post, e.g. `/2021/03/hello-world`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatedSlug {
    pub year: i32,
    pub month: u32,
    pub slug: String,
}

impl DatedSlug {
    pub fn for_record(record: &PostRecord) -> anyhow::Result<DatedSlug> {
        let date = parse_date(&record.date).with_context(|| format!("indexed post {}", record.path))?;
        Ok(DatedSlug {
            year: date.year(),
            month: date.month(),
            slug: record.slug.clone(),
        })
    }
}

impl FromStr for DatedSlug {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let [year, month, slug] = segments.as_slice() else {
            bail!("expected /<year>/<month>/<slug>, got {path:?}");
        };
        if !year.chars().all(|c| c.is_ascii_digit()) || !month.chars().all(|c| c.is_ascii_digit()) {
            bail!("year and month must be numbers in {path:?}");
        }
        let year: i32 = year.parse().with_context(|| format!("year in {path:?}"))?;
        let month: u32 = month.parse().with_context(|| format!("month in {path:?}"))?;
        if !(1..=12).contains(&month) {
            bail!("month {month} out of range in {path:?}");
        }
        if slug.is_empty() {
            bail!("empty slug in {path:?}");
        }
        Ok(DatedSlug {
            year,
            month,
            slug: (*slug).to_owned(),
        })
    }
}

impl fmt::Display for DatedSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{:04}/{:02}/{}", self.year, self.month, self.slug)
    }
}

pub struct Blog {
    index: PostIndex,
    renderer: Renderer,
}

impl Blog {
    pub fn new(index: PostIndex, renderer: Renderer) -> Self {
        Blog { index, renderer }
    }

    pub fn index(&self) -> &PostIndex {
        &self.index
    }

    fn path_for(&self, year: i32, month: u32, slug: &str) -> anyhow::Result<Option<String>> {
        self.index
            .path_for_dated_slug(year, month, slug)
            .with_context(|| format!("looking up {}", DatedSlug { year, month, slug: slug.to_owned() }))
    }

    pub fn document_from_dated_slug(&self, year: i32, month: u32, slug: &str) -> anyhow::Result<Option<RenderedDocument>> {
        self.path_for(year, month, slug)?
            .map(|path| self.renderer.document(&path))
            .transpose()
    }

    /// The full page for a post, or `None` when no post matches.
    pub fn post_from_dated_slug(&self, year: i32, month: u32, slug: &str) -> anyhow::Result<Option<String>> {
        self.path_for(year, month, slug)?
            .map(|path| self.renderer.render_post(&path))
            .transpose()
    }

    /// Like [`Blog::post_from_dated_slug`] for a request path. Paths that do
    /// not have the `/<year>/<month>/<slug>` shape match no post.
    pub fn post_from_request_path(&self, request_path: &str) -> anyhow::Result<Option<String>> {
        match request_path.parse::<DatedSlug>() {
            Ok(dated) => self.post_from_dated_slug(dated.year, dated.month, &dated.slug),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::{document::DocumentRenderer, events::RecordingSink, rst::Settings};

    #[rstest]
    #[case("/2021/03/hello-world", 2021, 3, "hello-world")]
    #[case("2021/3/hello-world/", 2021, 3, "hello-world")]
    #[case("/1999/12/x", 1999, 12, "x")]
    fn parses_request_paths(#[case] path: &str, #[case] year: i32, #[case] month: u32, #[case] slug: &str) {
        assert_eq!(
            path.parse::<DatedSlug>().unwrap(),
            DatedSlug {
                year,
                month,
                slug: slug.to_owned()
            }
        );
    }

    #[rstest]
    #[case("/")]
    #[case("/2021/03")]
    #[case("/2021/03/a/b")]
    #[case("/2021/13/x")]
    #[case("/2021/0/x")]
    #[case("/20x1/03/x")]
    #[case("/2021/+3/x")]
    #[case("/2021/03//")]
    fn rejects_other_paths(#[case] path: &str) {
        assert!(path.parse::<DatedSlug>().is_err());
    }

    #[test]
    fn display_zero_pads() {
        let dated = DatedSlug {
            year: 2021,
            month: 3,
            slug: "hello".to_owned(),
        };
        assert_eq!(dated.to_string(), "/2021/03/hello");
    }

    #[test]
    fn dated_slug_for_an_indexed_record() {
        let record = PostRecord {
            path: "a.rst".to_owned(),
            slug: "a".to_owned(),
            date: "2020-11-30T23:00:00Z".to_owned(),
        };
        assert_eq!(DatedSlug::for_record(&record).unwrap().to_string(), "/2020/11/a");
    }

    #[test]
    fn dated_slug_uses_the_written_month() {
        let record = PostRecord {
            path: "july.rst".to_owned(),
            slug: "july".to_owned(),
            date: "2021-07-01T01:00:00+02:00".to_owned(),
        };
        assert_eq!(DatedSlug::for_record(&record).unwrap().to_string(), "/2021/07/july");
    }

    #[test]
    fn serves_posts_by_request_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("hello.rst"),
            ".. meta::\n   :slug: hello-world\n   :author-date: 2021-03-05\n\nHello\n=====\n\nBody.\n",
        )
        .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let index = PostIndex::open_in_memory(dir.path(), sink.clone()).unwrap();
        index.rebuild_index().unwrap();
        let documents = DocumentRenderer::new(Settings::default(), sink);
        let renderer = Renderer::new(dir.path(), "", documents, None).unwrap();
        let blog = Blog::new(index, renderer);

        let page = blog.post_from_request_path("/2021/03/hello-world").unwrap().unwrap();
        assert!(page.contains("<title>Hello</title>"));
        assert_eq!(blog.post_from_request_path("/2021/04/hello-world").unwrap(), None);
        assert_eq!(blog.post_from_request_path("/about").unwrap(), None);

        let document = blog.document_from_dated_slug(2021, 3, "hello-world").unwrap().unwrap();
        assert_eq!(document.title, "Hello");
        assert_eq!(document.body, "<h1 class=\"title\">Hello</h1><p>Body.</p>");
    }
}
