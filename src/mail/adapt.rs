use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{Headers, MetadataRecord};

static MESSAGE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Collect the reference chain of a message, oldest first.
///
/// Every `<id>` token of References in order, then the first token of
/// In-Reply-To (only when the header starts with one). Later repeats of an id
/// already seen are dropped.
pub fn extract_references(mail: &impl Headers) -> Vec<String> {
    let mut references: Vec<&str> = Vec::new();

    if let Some(refs) = mail.references() {
        references.extend(MESSAGE_ID.find_iter(refs).map(|m| m.as_str()));
    }

    if let Some(reply_to) = mail.in_reply_to() {
        let reply_to = reply_to.trim_start();
        if let Some(m) = MESSAGE_ID.find(reply_to).filter(|m| m.start() == 0) {
            references.push(m.as_str());
        }
    }

    let mut seen = HashSet::new();
    references
        .into_iter()
        .filter(|r| seen.insert(*r))
        .map(str::to_string)
        .collect()
}

/// Strip one leading "Re: " or "Sv: " marker. Single pass: "Re: Re: x" keeps one.
pub fn normalise_subject(subject: Option<&str>) -> String {
    let Some(subject) = subject else {
        return String::new();
    };

    subject
        .strip_prefix("Re: ")
        .or_else(|| subject.strip_prefix("Sv: "))
        .unwrap_or(subject)
        .to_string()
}

/// Read the threading headers of one message.
/// Returns `None` when the message has no Message-Id to thread by.
pub fn read_record(mail: &impl Headers) -> Option<MetadataRecord> {
    let id = mail.message_id()?.trim();
    if id.is_empty() {
        return None;
    }

    Some(MetadataRecord {
        id: id.to_string(),
        subject: Some(normalise_subject(mail.subject())),
        references: extract_references(mail),
    })
}

/// Lazily turn a message source into metadata records, one per message.
/// Messages without a Message-Id are logged and skipped.
pub fn adapt<I>(source: I) -> impl Iterator<Item = MetadataRecord>
where
    I: IntoIterator,
    I::Item: Headers,
{
    source.into_iter().filter_map(|mail| {
        let record = read_record(&mail);
        if record.is_none() {
            log::warn!(
                "skipping message without Message-Id (subject: {:?})",
                mail.subject().unwrap_or("")
            );
        }
        record
    })
}
