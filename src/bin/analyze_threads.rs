use std::collections::HashMap;

use anyhow::{Context, Result};
use mailthread::config::Config;
use mailthread::mail::{adapt, thread, HeaderCache, HeaderCached, Maildir, MetadataRecord};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = Config::load();
    let maildir = Maildir::open(config.maildir_path()).context("could not open maildir")?;
    let mut mailbox = HeaderCached::new(maildir, HeaderCache::open(config.cache_path()));
    let mut view = mailbox.headers();
    view.load();

    println!("Scanning...");
    let records: Vec<MetadataRecord> = adapt(view.iter()?.filter_map(Result::ok)).collect();
    view.save();
    println!("Total records: {}", records.len());

    // Check for duplicate message-ids before threading collapses them
    let duplicates: Vec<(String, usize)> = {
        let mut message_ids: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *message_ids.entry(record.id.as_str()).or_default() += 1;
        }
        message_ids
            .into_iter()
            .filter(|&(_, count)| count > 1)
            .map(|(mid, count)| (mid.to_string(), count))
            .collect()
    };

    let forest = thread(records);

    let mut thread_sizes: Vec<(usize, usize, String)> = forest
        .roots()
        .map(|root| {
            let subject = root
                .message()
                .subject
                .clone()
                .unwrap_or_else(|| format!("[Placeholder {}]", root.message().id));
            (root.message_count(), root.depth(), subject)
        })
        .collect();
    thread_sizes.sort_by(|a, b| b.0.cmp(&a.0));

    println!("\nThreaded results:");
    println!("  Containers: {}", forest.table().len());
    println!("  Threads: {}", forest.len());
    println!(
        "  Placeholder roots: {}",
        forest.roots().filter(|r| r.is_placeholder()).count()
    );

    println!("\nThread size distribution:");
    let buckets = [
        ("Single message threads", 1, 1),
        ("2-5 messages", 2, 5),
        ("6-10 messages", 6, 10),
        ("11-50 messages", 11, 50),
        ("50+ messages", 51, usize::MAX),
    ];
    for (label, lo, hi) in buckets {
        let count = thread_sizes
            .iter()
            .filter(|(s, _, _)| *s >= lo && *s <= hi)
            .count();
        println!("  {}: {}", label, count);
    }

    println!("\nTop 20 largest threads:");
    for (i, (size, depth, subject)) in thread_sizes.iter().take(20).enumerate() {
        let truncated: String = subject.chars().take(50).collect();
        println!("  {:2}. {:4} msgs (depth {:2}) - {}", i + 1, size, depth, truncated);
    }

    println!("\n--- Checking for issues ---");
    println!("Duplicate message-ids: {}", duplicates.len());
    for (mid, count) in duplicates.iter().take(5) {
        let shown: String = mid.chars().take(60).collect();
        println!("  {} appears {} times", shown, count);
    }

    Ok(())
}
