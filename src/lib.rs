//! A small blog engine for posts written in reStructuredText.
//!
//! Posts carry a `.. meta::` header with at least a `slug` and an
//! `author-date`. The [`index`] maps `(year, month, slug)` to the file holding
//! a post without rendering anything; the [`document`] renderer turns one post
//! into a title, a flat HTML body and its metadata; [`renderer`] and [`blog`]
//! put a template around the result.

pub mod blog;
pub mod config;
pub mod document;
pub mod events;
pub mod index;
pub mod meta;
pub mod renderer;
pub mod rst;
