use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::{
    blog::Blog,
    document::DocumentRenderer,
    events::EventSink,
    index::{PostIndex, DEFAULT_INDEX_FILE},
    renderer::Renderer,
    rst::Settings,
};

pub const BLOG_NAME_VAR: &str = "BLOG_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub blog_dir: PathBuf,
    pub index_file: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub blog_name: String,
    pub embed_stylesheet: bool,
}

/// The command line: global options shared by every subcommand.
pub fn command() -> Command {
    command!()
        .subcommand_required(true)
        .args(&[
            Arg::new("blog_dir")
                .long("blog-dir")
                .help("Directory holding the posts")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .global(true),
            Arg::new("index")
                .long("index")
                .help("Index database file [default: <blog-dir>/index]")
                .value_parser(value_parser!(PathBuf))
                .global(true),
            Arg::new("templates")
                .long("templates")
                .help("Directory containing post.hbs. The built-in template is used otherwise.")
                .value_parser(value_parser!(PathBuf))
                .global(true),
            Arg::new("embed_stylesheet")
                .long("embed-stylesheet")
                .help("Inline the default stylesheet into rendered documents")
                .action(ArgAction::SetTrue)
                .global(true),
        ])
        .subcommand(Command::new("index").about("Rebuild the post index"))
        .subcommand(
            Command::new("list")
                .about("List indexed posts, newest first")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("path")
                .about("Print the file holding a post")
                .args(&[
                    Arg::new("year").required(true).value_parser(value_parser!(i32)),
                    Arg::new("month")
                        .required(true)
                        .value_parser(value_parser!(u32).range(1..=12)),
                    Arg::new("slug").required(true),
                ]),
        )
        .subcommand(
            Command::new("render")
                .about("Render the post at a /<year>/<month>/<slug> path")
                .args(&[Arg::new("request_path").required(true), json_flag()]),
        )
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print JSON instead of text")
        .action(ArgAction::SetTrue)
}

impl Config {
    /// Reads the global options from `matches` and `BLOG_NAME` from the
    /// environment.
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Config> {
        Config::with_blog_name(matches, std::env::var(BLOG_NAME_VAR).unwrap_or_default())
    }

    fn with_blog_name(matches: &ArgMatches, blog_name: String) -> anyhow::Result<Config> {
        let blog_dir: PathBuf = matches
            .get_one::<PathBuf>("blog_dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));
        if !blog_dir.is_dir() {
            bail!("blog directory {} must be a directory.", blog_dir.display());
        }

        let index_file = matches
            .get_one::<PathBuf>("index")
            .cloned()
            .unwrap_or_else(|| blog_dir.join(DEFAULT_INDEX_FILE));
        if index_file.is_dir() {
            bail!("index file {} is a directory.", index_file.display());
        }

        let template_dir = matches.get_one::<PathBuf>("templates").cloned();
        if let Some(dir) = &template_dir {
            if !dir.is_dir() {
                bail!("template directory {} must be a directory.", dir.display());
            }
        }

        Ok(Config {
            blog_dir,
            index_file,
            template_dir,
            blog_name,
            embed_stylesheet: matches.get_flag("embed_stylesheet"),
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            embed_stylesheet: self.embed_stylesheet,
            ..Settings::default()
        }
    }

    pub fn open_blog(&self, sink: Arc<dyn EventSink>) -> anyhow::Result<Blog> {
        let index = PostIndex::open(&self.blog_dir, &self.index_file, sink.clone())
            .with_context(|| format!("opening index {}", self.index_file.display()))?;
        let documents = DocumentRenderer::new(self.settings(), sink);
        let renderer = Renderer::new(
            &self.blog_dir,
            &self.blog_name,
            documents,
            self.template_dir.as_deref(),
        )?;
        Ok(Blog::new(index, renderer))
    }
}
