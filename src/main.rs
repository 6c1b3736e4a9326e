use std::sync::Arc;

use anyhow::{bail, Context};
use pretext::{
    blog::DatedSlug,
    config::{self, Config},
    events::LogSink,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = config::command().get_matches();
    let (name, sub) = matches.subcommand().context("a subcommand is required")?;
    let config = Config::from_matches(sub)?;
    let blog = config.open_blog(Arc::new(LogSink))?;

    match name {
        "index" => {
            let summary = blog.index().rebuild_index()?;
            println!(
                "indexed {} posts ({} skipped, {} slug collisions)",
                summary.indexed, summary.skipped, summary.collisions
            );
        }
        "list" => {
            let records = blog.index().records()?;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!("{}\t{}\t{}", record.date, DatedSlug::for_record(record)?, record.path);
                }
            }
        }
        "path" => {
            let year = *sub.get_one::<i32>("year").context("year")?;
            let month = *sub.get_one::<u32>("month").context("month")?;
            let slug = sub.get_one::<String>("slug").context("slug")?;
            match blog.index().path_for_dated_slug(year, month, slug)? {
                Some(path) => println!("{path}"),
                None => bail!("no post {slug:?} in {year:04}-{month:02}."),
            }
        }
        "render" => {
            let request_path = sub.get_one::<String>("request_path").context("request_path")?;
            let dated: DatedSlug = request_path.parse()?;
            if sub.get_flag("json") {
                let Some(document) = blog.document_from_dated_slug(dated.year, dated.month, &dated.slug)? else {
                    bail!("no post at {dated}.");
                };
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                let Some(page) = blog.post_from_dated_slug(dated.year, dated.month, &dated.slug)? else {
                    bail!("no post at {dated}.");
                };
                println!("{page}");
            }
        }
        other => bail!("unknown subcommand {other:?}."),
    }

    Ok(())
}
