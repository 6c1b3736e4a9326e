//! The post index: a SQLite table mapping each post's slug and date to the
//! file that holds it.
//!
//! A rebuild crawls the blog directory, reads only the meta header of every
//! `.rst` file, and replaces the whole table in a single transaction. Files
//! that cannot be indexed are reported and skipped.

use std::{
    cmp::Reverse,
    collections::HashMap,
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::{
    events::{Event, EventSink},
    meta::{MetaBlock, MetaParseError},
};

pub const DOCUMENT_EXTENSION: &str = "rst";
pub const DEFAULT_INDEX_FILE: &str = "index";
pub const SLUG_FIELD: &str = "slug";
pub const DATE_FIELD: &str = "author-date";

const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS posts (
    path TEXT NOT NULL,
    slug TEXT NOT NULL,
    date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS posts_by_date_slug ON posts (date, slug);
";

const FIND_POST_BY_DATED_SLUG: &str =
    "SELECT path FROM posts WHERE slug = ?1 AND date LIKE ?2 ORDER BY path LIMIT 1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    /// Relative to the blog directory, `/`-separated.
    pub path: String,
    pub slug: String,
    /// RFC 3339, keeping the offset the author wrote.
    pub date: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not an ISO-8601 date: {value:?}")]
pub struct DateParseError {
    pub value: String,
}

/// Problems with a single post file. The file is skipped.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("could not read file: {0}")]
    Io(#[from] io::Error),

    #[error("could not walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("bad meta block: {0}")]
    Meta(#[from] MetaParseError),

    #[error("no `{0}` meta entry")]
    MissingField(&'static str),

    #[error("bad `author-date` meta entry: {0}")]
    Date(#[from] DateParseError),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("blog directory {0:?} does not exist")]
    MissingRoot(PathBuf),

    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("could not access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub collisions: usize,
}

/// Parses an `author-date` value.
///
/// Accepts RFC 3339 and ISO-8601 date-times with an offset, date-times
/// without one (taken as UTC) and plain dates (midnight UTC). The written
/// offset is kept, so the calendar fields are the ones the author chose.
pub fn parse_date(value: &str) -> Result<DateTime<FixedOffset>, DateParseError> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(date) = DateTime::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive).into());
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive).into());
    }
    Err(DateParseError {
        value: value.to_owned(),
    })
}

fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn check_root(root: &Path) -> Result<(), IndexError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(IndexError::MissingRoot(root.to_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(IndexError::MissingRoot(root.to_owned())),
        Err(source) => Err(IndexError::Io {
            path: root.to_owned(),
            source,
        }),
    }
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_str().map_or(false, |name| SKIPPED_DIRS.contains(&name))
}

pub struct PostIndex {
    root: PathBuf,
    connection: Mutex<Connection>,
    sink: Arc<dyn EventSink>,
}

impl PostIndex {
    /// Opens (creating if needed) the index stored at `db_path` for the blog
    /// directory `root`.
    pub fn open(root: impl Into<PathBuf>, db_path: impl AsRef<Path>, sink: Arc<dyn EventSink>) -> Result<Self, IndexError> {
        let root = root.into();
        check_root(&root)?;
        let connection = Connection::open(db_path)?;
        Self::with_connection(root, connection, sink)
    }

    pub fn open_in_memory(root: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Result<Self, IndexError> {
        let root = root.into();
        check_root(&root)?;
        Self::with_connection(root, Connection::open_in_memory()?, sink)
    }

    fn with_connection(root: PathBuf, connection: Connection, sink: Arc<dyn EventSink>) -> Result<Self, IndexError> {
        connection.execute_batch(SCHEMA)?;
        Ok(PostIndex {
            root,
            connection: Mutex::new(connection),
            sink,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the table with the posts currently in the blog directory.
    pub fn rebuild_index(&self) -> Result<RebuildSummary, IndexError> {
        check_root(&self.root)?;
        let (records, mut summary) = self.crawl();
        self.replace_all(&records)?;
        summary.indexed = records.len();
        self.sink.emit(Event::IndexRebuilt {
            indexed: summary.indexed,
            skipped: summary.skipped,
        });
        Ok(summary)
    }

    fn crawl(&self) -> (Vec<PostRecord>, RebuildSummary) {
        let mut summary = RebuildSummary::default();
        let mut posts: Vec<(PostRecord, DateTime<FixedOffset>)> = Vec::new();
        let mut by_slug: HashMap<String, usize> = HashMap::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_vcs_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map_or_else(|| self.root.clone(), Path::to_path_buf);
                    self.skip(&path, FileError::Walk(err), &mut summary);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path().extension() != Some(OsStr::new(DOCUMENT_EXTENSION)) {
                continue;
            }

            let (record, date) = match self.read_post(entry.path()) {
                Ok(post) => post,
                Err(err) => {
                    self.skip(entry.path(), err, &mut summary);
                    continue;
                }
            };
            self.sink.emit(Event::PostFound { record: &record });

            let Some(&slot) = by_slug.get(&record.slug) else {
                by_slug.insert(record.slug.clone(), posts.len());
                posts.push((record, date));
                continue;
            };

            // Earlier instant wins; on a tie the file seen first stays.
            summary.collisions += 1;
            let existing = &mut posts[slot];
            if date < existing.1 {
                let (discarded, _) = std::mem::replace(existing, (record, date));
                self.sink.emit(Event::SlugCollision {
                    slug: &existing.0.slug,
                    kept: &existing.0.path,
                    discarded: &discarded.path,
                });
            } else {
                self.sink.emit(Event::SlugCollision {
                    slug: &record.slug,
                    kept: &existing.0.path,
                    discarded: &record.path,
                });
            }
        }

        (posts.into_iter().map(|(record, _)| record).collect(), summary)
    }

    fn skip(&self, path: &Path, error: FileError, summary: &mut RebuildSummary) {
        summary.skipped += 1;
        self.sink.emit(Event::FileSkipped { path, error: &error });
    }

    fn read_post(&self, path: &Path) -> Result<(PostRecord, DateTime<FixedOffset>), FileError> {
        let meta = MetaBlock::from_file(path)?;
        let slug = meta
            .get(SLUG_FIELD)
            .filter(|slug| !slug.is_empty())
            .ok_or(FileError::MissingField(SLUG_FIELD))?;
        let raw_date = meta
            .get(DATE_FIELD)
            .filter(|date| !date.is_empty())
            .ok_or(FileError::MissingField(DATE_FIELD))?;
        let date = parse_date(raw_date)?;

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let record = PostRecord {
            path,
            slug: slug.to_owned(),
            date: format_date(&date),
        };
        Ok((record, date))
    }

    /// Clears the table and inserts `records` as one transaction. Any error
    /// leaves the previous contents in place.
    fn replace_all(&self, records: &[PostRecord]) -> Result<(), IndexError> {
        let mut connection = self.connection();
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM posts", [])?;
        {
            let mut insert = tx.prepare("INSERT INTO posts (path, slug, date) VALUES (?1, ?2, ?3)")?;
            for record in records {
                insert.execute(params![record.path, record.slug, record.date])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The file holding the post `slug` published in `year`-`month`, as
    /// written in its `author-date`.
    /// Several matches resolve to the lexicographically first path.
    pub fn path_for_dated_slug(&self, year: i32, month: u32, slug: &str) -> Result<Option<String>, IndexError> {
        let pattern = format!("{year:04}-{month:02}-%");
        let connection = self.connection();
        let path = connection
            .query_row(FIND_POST_BY_DATED_SLUG, params![slug, pattern], |row| row.get(0))
            .optional()?;
        Ok(path)
    }

    /// Every indexed post, newest first. Dates with different offsets are
    /// ordered by instant.
    pub fn records(&self) -> Result<Vec<PostRecord>, IndexError> {
        let connection = self.connection();
        let mut stmt = connection.prepare("SELECT path, slug, date FROM posts ORDER BY date DESC, slug")?;
        let mut records = stmt
            .query_map([], |row| {
                Ok(PostRecord {
                    path: row.get(0)?,
                    slug: row.get(1)?,
                    date: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_cached_key(|record| (Reverse(parse_date(&record.date).ok()), record.slug.clone()));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::events::RecordingSink;

    fn write_file(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn write_post(root: &Path, rel: &str, slug: &str, date: &str) {
        write_file(
            root,
            rel,
            &format!(".. meta::\n   :slug: {slug}\n   :author-date: {date}\n\nTitle\n=====\n\nBody.\n"),
        );
    }

    fn open(dir: &TempDir) -> (PostIndex, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let index = PostIndex::open_in_memory(dir.path(), sink.clone()).unwrap();
        (index, sink)
    }

    #[test]
    fn finds_a_post_by_year_month_and_slug() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "posts/hello.rst", "hello-world", "2021-03-05T00:00:00Z");
        let (index, _) = open(&dir);

        let summary = index.rebuild_index().unwrap();
        assert_eq!(
            summary,
            RebuildSummary {
                indexed: 1,
                skipped: 0,
                collisions: 0
            }
        );
        assert_eq!(
            index.path_for_dated_slug(2021, 3, "hello-world").unwrap(),
            Some("posts/hello.rst".to_owned())
        );
        assert_eq!(index.path_for_dated_slug(2021, 4, "hello-world").unwrap(), None);
        assert_eq!(index.path_for_dated_slug(2021, 3, "hello").unwrap(), None);
    }

    #[rstest]
    #[case("a.rst", "b.rst")]
    #[case("b.rst", "a.rst")]
    fn earlier_date_wins_a_slug_collision(#[case] early: &str, #[case] late: &str) {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), early, "same", "2021-01-01");
        write_post(dir.path(), late, "same", "2021-02-01");
        let (index, sink) = open(&dir);

        let summary = index.rebuild_index().unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.collisions, 1);
        assert_eq!(
            index.records().unwrap(),
            vec![PostRecord {
                path: early.to_owned(),
                slug: "same".to_owned(),
                date: "2021-01-01T00:00:00Z".to_owned(),
            }]
        );
        assert!(sink
            .events()
            .contains(&format!("collision same kept {early} discarded {late}")));
    }

    #[test]
    fn same_date_collision_keeps_the_first_file() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "b.rst", "same", "2021-01-01");
        write_post(dir.path(), "a.rst", "same", "2021-01-01");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        assert_eq!(
            index.path_for_dated_slug(2021, 1, "same").unwrap(),
            Some("a.rst".to_owned())
        );
        assert_eq!(index.records().unwrap().len(), 1);
    }

    #[test]
    fn bad_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "good.rst", "good", "2021-05-01");
        write_file(dir.path(), "no-slug.rst", ".. meta::\n   :author-date: 2021-05-01\n");
        write_file(dir.path(), "no-date.rst", ".. meta::\n   :slug: no-date\n");
        write_file(dir.path(), "bad-date.rst", ".. meta::\n   :slug: bad\n   :author-date: soon\n");
        write_file(
            dir.path(),
            "bad-indent.rst",
            ".. meta::\n   :slug: x\n     :author-date: 2021-05-01\n",
        );
        write_file(dir.path(), "no-meta.rst", "Title\n=====\n");
        let (index, sink) = open(&dir);

        let summary = index.rebuild_index().unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.skipped, 5);
        assert_eq!(index.records().unwrap()[0].slug, "good");
        let skipped = sink.events().into_iter().filter(|e| e.starts_with("skipped")).count();
        assert_eq!(skipped, 5);
    }

    #[test]
    fn only_documents_outside_vcs_directories_are_read() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "post.rst", "post", "2021-05-01");
        write_post(dir.path(), ".git/hidden.rst", "hidden", "2021-05-01");
        write_post(dir.path(), "notes.txt", "notes", "2021-05-01");
        write_file(dir.path(), "README", "not a post");
        let (index, _) = open(&dir);

        let summary = index.rebuild_index().unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(index.path_for_dated_slug(2021, 5, "hidden").unwrap(), None);
    }

    #[test]
    fn rebuilding_is_idempotent_and_drops_removed_posts() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "one.rst", "one", "2021-01-01");
        write_post(dir.path(), "two.rst", "two", "2021-02-01");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        let first = index.records().unwrap();
        index.rebuild_index().unwrap();
        assert_eq!(index.records().unwrap(), first);

        fs::remove_file(dir.path().join("two.rst")).unwrap();
        index.rebuild_index().unwrap();
        assert_eq!(index.path_for_dated_slug(2021, 2, "two").unwrap(), None);
        assert_eq!(index.records().unwrap().len(), 1);
    }

    #[test]
    fn records_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "old.rst", "old", "2020-06-01");
        write_post(dir.path(), "new.rst", "new", "2022-06-01");
        write_post(dir.path(), "mid.rst", "mid", "2021-06-01T12:30:00+02:00");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        let records = index.records().unwrap();
        let slugs: Vec<&str> = records.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["new", "mid", "old"]);
        assert_eq!(records[1].date, "2021-06-01T12:30:00+02:00");
    }

    #[test]
    fn records_with_offsets_are_ordered_by_instant() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "east.rst", "east", "2021-06-01T09:00:00+05:00");
        write_post(dir.path(), "utc.rst", "utc", "2021-06-01T06:00:00Z");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        let slugs: Vec<String> = index.records().unwrap().into_iter().map(|r| r.slug).collect();
        assert_eq!(slugs, vec!["utc", "east"]);
    }

    #[test]
    fn offset_dates_are_found_under_the_written_month() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "july.rst", "july", "2021-07-01T01:00:00+02:00");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        assert_eq!(index.records().unwrap()[0].date, "2021-07-01T01:00:00+02:00");
        assert_eq!(
            index.path_for_dated_slug(2021, 7, "july").unwrap(),
            Some("july.rst".to_owned())
        );
        assert_eq!(index.path_for_dated_slug(2021, 6, "july").unwrap(), None);
    }

    #[test]
    fn collisions_compare_instants_across_offsets() {
        let dir = tempfile::tempdir().unwrap();
        // 01:00+02:00 is 23:00 UTC the day before, so it is the earlier post.
        write_post(dir.path(), "a.rst", "same", "2021-07-01T00:30:00Z");
        write_post(dir.path(), "b.rst", "same", "2021-07-01T01:00:00+02:00");
        let (index, _) = open(&dir);

        index.rebuild_index().unwrap();
        assert_eq!(
            index.path_for_dated_slug(2021, 7, "same").unwrap(),
            Some("b.rst".to_owned())
        );
    }

    #[test]
    fn index_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let db_path = db.path().join(DEFAULT_INDEX_FILE);
        write_post(dir.path(), "post.rst", "post", "2021-07-04");

        {
            let index = PostIndex::open(dir.path(), &db_path, Arc::new(RecordingSink::default())).unwrap();
            index.rebuild_index().unwrap();
        }
        let index = PostIndex::open(dir.path(), &db_path, Arc::new(RecordingSink::default())).unwrap();
        assert_eq!(
            index.path_for_dated_slug(2021, 7, "post").unwrap(),
            Some("post.rst".to_owned())
        );
    }

    #[test]
    fn index_file_inside_the_blog_is_not_crawled() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "post.rst", "post", "2021-07-04");
        let index = PostIndex::open(
            dir.path(),
            dir.path().join(DEFAULT_INDEX_FILE),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();
        assert_eq!(index.rebuild_index().unwrap().skipped, 0);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PostIndex::open_in_memory(dir.path().join("nope"), Arc::new(RecordingSink::default()));
        assert!(matches!(result, Err(IndexError::MissingRoot(_))));
    }

    #[test]
    fn failed_rebuild_keeps_the_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        write_post(dir.path(), "good.rst", "good", "2021-01-01");
        let (index, _) = open(&dir);
        index.rebuild_index().unwrap();

        write_post(dir.path(), "boom.rst", "boom", "2021-01-02");
        index
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON posts WHEN NEW.slug = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();

        let err = index.rebuild_index().unwrap_err();
        assert!(matches!(err, IndexError::Storage(_)));
        assert_eq!(
            index.path_for_dated_slug(2021, 1, "good").unwrap(),
            Some("good.rst".to_owned())
        );
    }

    #[rstest]
    #[case("2021-03-05T00:00:00Z", "2021-03-05T00:00:00Z")]
    #[case("2021-03-05T10:11:12+02:00", "2021-03-05T10:11:12+02:00")]
    #[case("2021-03-05T10:11:12+00:00", "2021-03-05T10:11:12Z")]
    #[case("2021-03-05T10:11:12.5Z", "2021-03-05T10:11:12.500Z")]
    #[case("2021-03-05T10:11:12+0200", "2021-03-05T10:11:12+02:00")]
    #[case("2021-03-05 10:11:12", "2021-03-05T10:11:12Z")]
    #[case("2021-03-05T10:11", "2021-03-05T10:11:00Z")]
    #[case("2021-03-05", "2021-03-05T00:00:00Z")]
    #[case("  2021-03-05  ", "2021-03-05T00:00:00Z")]
    fn accepted_dates(#[case] input: &str, #[case] stored: &str) {
        assert_eq!(format_date(&parse_date(input).unwrap()), stored);
    }

    #[rstest]
    #[case("")]
    #[case("yesterday")]
    #[case("2021-13-01")]
    #[case("2021-02-30")]
    #[case("05/03/2021")]
    fn rejected_dates(#[case] input: &str) {
        assert_eq!(
            parse_date(input),
            Err(DateParseError {
                value: input.trim().to_owned()
            })
        );
    }
}
