//! Progress and problem reporting for the indexer and the renderer.
//!
//! Components never call the logging macros themselves. They receive an
//! [`EventSink`] when they are constructed and report through it, so tests can
//! swap in a recorder while the binary forwards everything to [`log`].

use std::path::Path;

use log::{debug, error, info, warn};

use crate::{
    index::{FileError, PostRecord},
    rst::{Diagnostic, Severity},
};

#[derive(Debug)]
pub enum Event<'a> {
    /// A post file was parsed. It may still lose a slug collision.
    PostFound { record: &'a PostRecord },

    /// A post file could not be indexed and was left out.
    FileSkipped { path: &'a Path, error: &'a FileError },

    /// Two files declared the same slug. Only `kept` survives.
    SlugCollision {
        slug: &'a str,
        kept: &'a str,
        discarded: &'a str,
    },

    /// The index was replaced in one transaction.
    IndexRebuilt { indexed: usize, skipped: usize },

    /// The markup converter reported a problem below the halt level.
    MarkupDiagnostic { diagnostic: &'a Diagnostic },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event<'_>);
}

/// Forwards events to the [`log`] facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event<'_>) {
        match event {
            Event::PostFound { record } => info!(
                "Found post {:?} from date {} at path {}",
                record.slug, record.date, record.path
            ),
            Event::FileSkipped { path, error } => {
                error!("Skipping {path:?}: {error}")
            }
            Event::SlugCollision {
                slug,
                kept,
                discarded,
            } => error!(
                "Multiple posts have the same slug {slug:?}! keeping {kept}, ignoring {discarded}"
            ),
            Event::IndexRebuilt { indexed, skipped } => {
                info!("Indexed {indexed} posts ({skipped} files skipped)")
            }
            Event::MarkupDiagnostic { diagnostic } => match diagnostic.severity {
                Severity::Info => debug!("{diagnostic}"),
                _ => warn!("{diagnostic}"),
            },
        }
    }
}

/// Collects events as short strings so tests can assert on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: Event<'_>) {
        let line = match event {
            Event::PostFound { record } => format!("found {} {}", record.slug, record.path),
            Event::FileSkipped { path, .. } => format!("skipped {}", path.display()),
            Event::SlugCollision {
                slug,
                kept,
                discarded,
            } => format!("collision {slug} kept {kept} discarded {discarded}"),
            Event::IndexRebuilt { indexed, skipped } => format!("rebuilt {indexed} {skipped}"),
            Event::MarkupDiagnostic { diagnostic } => format!("markup {diagnostic}"),
        };
        self.events.lock().unwrap().push(line);
    }
}
