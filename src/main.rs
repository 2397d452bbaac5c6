use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

use mailthread::config::Config;
use mailthread::mail::{adapt, thread, HeaderCache, HeaderCached, Maildir};

/// Thread a maildir by its reference headers
#[derive(Debug, Parser)]
#[command(name = "mailthread", version)]
struct Args {
    /// Maildir to thread (overrides the config file)
    #[arg(long)]
    maildir: Option<PathBuf>,

    /// Header cache file (overrides the config file)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Print the forest as JSON instead of an indented dump
    #[arg(long)]
    json: bool,

    /// Neither load nor save the header cache
    #[arg(long)]
    no_cache: bool,

    /// Print every known location of a Message-Id and exit
    #[arg(long, value_name = "MESSAGE_ID")]
    locate: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load();

    let maildir_path = args.maildir.unwrap_or_else(|| config.maildir_path());
    let cache_path = args.cache.unwrap_or_else(|| config.cache_path());

    let maildir = Maildir::open(&maildir_path)
        .with_context(|| format!("could not open maildir {}", maildir_path.display()))?;
    let mut mailbox = HeaderCached::new(maildir, HeaderCache::open(cache_path));
    let mut view = mailbox.headers();

    if !args.no_cache {
        view.load();
    }

    if let Some(message_id) = args.locate {
        let found = view.lookup(&message_id);
        if found.is_empty() {
            log::warn!("{} is not in the header cache", message_id);
        }
        for spec in found {
            println!("{}", spec);
        }
        return Ok(());
    }

    let messages = view
        .iter()
        .with_context(|| format!("could not list {}", maildir_path.display()))?
        .filter_map(|result| match result {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!("skipping unreadable message: {}", e);
                None
            }
        });
    let forest = thread(adapt(messages));

    if !args.no_cache {
        view.save();
    }

    log::info!(
        "{} threads from {} containers",
        forest.len(),
        forest.table().len()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &forest)?;
        writeln!(out)?;
    } else {
        forest.dump(&mut out)?;
    }

    Ok(())
}
