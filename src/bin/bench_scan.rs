use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mailthread::config::Config;
use mailthread::mail::{adapt, thread, HeaderCache, HeaderCached, Maildir};

/// One full pass: load cache, read headers, thread, save.
/// Returns (messages, slim hits, threads, elapsed).
fn pass(config: &Config) -> Result<(usize, usize, usize, Duration)> {
    let start = Instant::now();

    let maildir = Maildir::open(config.maildir_path()).context("could not open maildir")?;
    let mut mailbox = HeaderCached::new(maildir, HeaderCache::open(config.cache_path()));
    let mut view = mailbox.headers();
    view.load();

    let messages: Vec<_> = view.iter()?.filter_map(Result::ok).collect();
    let slim = messages.iter().filter(|m| m.is_slim()).count();
    let count = messages.len();

    let forest = thread(adapt(messages));
    view.save();

    Ok((count, slim, forest.len(), start.elapsed()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = Config::load();

    // Check for --clear-cache flag
    if std::env::args().any(|a| a == "--clear-cache") {
        let cache_file = config.cache_path();
        let _ = std::fs::remove_file(&cache_file);
        println!("Cleared cache {}", cache_file.display());
    }

    println!("Scanning: {}", config.maildir_path().display());

    for label in ["First pass", "Second pass"] {
        let (count, slim, threads, elapsed) = pass(&config)?;
        println!(
            "{}: {} messages ({} from cache), {} threads in {:?}",
            label, count, slim, threads, elapsed
        );
        println!(
            "Rate: {:.0} emails/sec",
            count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
    }

    Ok(())
}
