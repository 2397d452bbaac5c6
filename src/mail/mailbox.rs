use std::collections::BTreeSet;

use thiserror::Error;

use super::cache::{CacheError, CacheKey, HeaderCache};
use super::types::{Headers, PathSpec, SlimMessage};

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("no message with key {0}")]
    NotFound(String),
    #[error("mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full-message storage backend
pub trait Mailbox {
    type Message: Headers;

    /// Every key currently in the mailbox
    fn keys(&mut self) -> Result<Vec<String>, MailboxError>;

    fn get(&mut self, key: &str) -> Result<Self::Message, MailboxError>;

    fn put(&mut self, key: &str, message: &Self::Message) -> Result<(), MailboxError>;

    /// Locator of `key` in this backend, for the header cache
    fn cache_key(&self, key: &str) -> PathSpec;
}

/// Mailbox wrapper that writes slim headers into a `HeaderCache` on every
/// full read or write.
pub struct HeaderCached<M> {
    inner: M,
    cache: HeaderCache,
}

impl<M: Mailbox> HeaderCached<M> {
    pub fn new(inner: M, cache: HeaderCache) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn cache(&self) -> &HeaderCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut HeaderCache {
        &mut self.cache
    }

    pub fn into_parts(self) -> (M, HeaderCache) {
        (self.inner, self.cache)
    }

    /// Cache-first header view over this mailbox, sharing its cache
    pub fn headers(&mut self) -> HeaderView<'_, M> {
        HeaderView { mailbox: self }
    }

    fn update_cache(&mut self, key: &str, message: &M::Message) {
        let spec = self.inner.cache_key(key);
        match self.cache.put(&spec, message) {
            Ok(()) => {}
            Err(CacheError::MissingMessageId) => {
                log::debug!("not caching {}: no Message-Id", spec);
            }
            Err(e) => log::warn!("not caching {}: {}", spec, e),
        }
    }
}

impl<M: Mailbox> Mailbox for HeaderCached<M> {
    type Message = M::Message;

    fn keys(&mut self) -> Result<Vec<String>, MailboxError> {
        self.inner.keys()
    }

    fn get(&mut self, key: &str) -> Result<Self::Message, MailboxError> {
        let message = self.inner.get(key)?;
        self.update_cache(key, &message);
        Ok(message)
    }

    fn put(&mut self, key: &str, message: &Self::Message) -> Result<(), MailboxError> {
        self.inner.put(key, message)?;
        self.update_cache(key, message);
        Ok(())
    }

    fn cache_key(&self, key: &str) -> PathSpec {
        self.inner.cache_key(key)
    }
}

/// Result of a header lookup: cached headers only, or the full message
#[derive(Debug, Clone)]
pub enum HeaderMessage<T> {
    Slim(SlimMessage),
    Full(T),
}

impl<T> HeaderMessage<T> {
    pub fn is_slim(&self) -> bool {
        matches!(self, HeaderMessage::Slim(_))
    }
}

impl<T: Headers> Headers for HeaderMessage<T> {
    fn header(&self, name: &str) -> Option<&str> {
        match self {
            HeaderMessage::Slim(slim) => slim.header(name),
            HeaderMessage::Full(full) => full.header(name),
        }
    }
}

/// Cache-first view of a mailbox's headers.
///
/// A hit costs no disk I/O. A miss reads the full message through the
/// decorator, which warms the cache for the next pass.
pub struct HeaderView<'a, M> {
    mailbox: &'a mut HeaderCached<M>,
}

impl<'a, M: Mailbox> HeaderView<'a, M> {
    pub fn get(&mut self, key: &str) -> Result<HeaderMessage<M::Message>, MailboxError> {
        let spec = self.mailbox.cache_key(key);
        if let Ok(headers) = self.mailbox.cache.get(&spec) {
            return Ok(HeaderMessage::Slim(SlimMessage {
                headers: headers.clone(),
            }));
        }

        log::trace!("header cache miss for {}", spec);
        self.mailbox.get(key).map(HeaderMessage::Full)
    }

    /// Store `message`'s headers under the locator of `key`
    pub fn put(&mut self, key: &str, message: &impl Headers) -> Result<(), CacheError> {
        let spec = self.mailbox.cache_key(key);
        self.mailbox.cache.put(CacheKey::Path(&spec), message)
    }

    /// Every known locator of a message id
    pub fn lookup(&self, message_id: &str) -> BTreeSet<PathSpec> {
        self.mailbox.cache.lookup(message_id)
    }

    /// Headers of every message, skipping keys that vanish between listing
    /// and fetch. Other errors are yielded.
    pub fn iter(&mut self) -> Result<Iter<'_, 'a, M>, MailboxError> {
        let keys = self.mailbox.keys()?;
        Ok(Iter {
            view: self,
            keys: keys.into_iter(),
        })
    }

    /// Load the backing cache; a missing or unreadable file counts as empty.
    pub fn load(&mut self) -> bool {
        match self.mailbox.cache.load() {
            Ok(()) => true,
            Err(e) => {
                log::info!("could not read header cache, starting empty: {}", e);
                false
            }
        }
    }

    pub fn save(&self) {
        self.mailbox.cache.save();
    }
}

pub struct Iter<'v, 'a, M> {
    view: &'v mut HeaderView<'a, M>,
    keys: std::vec::IntoIter<String>,
}

impl<M: Mailbox> Iterator for Iter<'_, '_, M> {
    type Item = Result<HeaderMessage<M::Message>, MailboxError>;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            match self.view.get(&key) {
                Err(MailboxError::NotFound(_)) => {
                    log::debug!("message {} vanished, skipping", key);
                }
                result => return Some(result),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory mailbox that counts full reads
    #[derive(Default)]
    struct MemoryMailbox {
        messages: BTreeMap<String, Vec<(String, String)>>,
        listed_only: Vec<String>,
        reads: usize,
    }

    impl MemoryMailbox {
        fn with(messages: &[(&str, &str, &str)]) -> Self {
            let mut mailbox = Self::default();
            for (key, id, subject) in messages {
                mailbox.messages.insert(
                    key.to_string(),
                    vec![
                        ("Message-Id".to_string(), id.to_string()),
                        ("Subject".to_string(), subject.to_string()),
                        ("X-Body".to_string(), "large".to_string()),
                    ],
                );
            }
            mailbox
        }
    }

    impl Mailbox for MemoryMailbox {
        type Message = Vec<(String, String)>;

        fn keys(&mut self) -> Result<Vec<String>, MailboxError> {
            let mut keys: Vec<String> = self.messages.keys().cloned().collect();
            keys.extend(self.listed_only.iter().cloned());
            Ok(keys)
        }

        fn get(&mut self, key: &str) -> Result<Self::Message, MailboxError> {
            self.reads += 1;
            self.messages
                .get(key)
                .cloned()
                .ok_or_else(|| MailboxError::NotFound(key.to_string()))
        }

        fn put(&mut self, key: &str, message: &Self::Message) -> Result<(), MailboxError> {
            self.messages.insert(key.to_string(), message.clone());
            Ok(())
        }

        fn cache_key(&self, key: &str) -> PathSpec {
            PathSpec::new("memory", [key])
        }
    }

    #[test]
    fn test_miss_reads_full_message_and_warms_cache() {
        let mailbox = MemoryMailbox::with(&[("k1", "<a@x>", "hi")]);
        let mut cached = HeaderCached::new(mailbox, HeaderCache::default());

        let first = cached.headers().get("k1").unwrap();
        assert!(!first.is_slim());
        assert_eq!(first.header("X-Body"), Some("large"));

        let second = cached.headers().get("k1").unwrap();
        assert!(second.is_slim());
        assert_eq!(second.message_id(), Some("<a@x>"));
        assert_eq!(second.header("X-Body"), None);
        assert_eq!(cached.inner().reads, 1);
    }

    #[test]
    fn test_decorator_put_caches_headers() {
        let mut cached = HeaderCached::new(MemoryMailbox::default(), HeaderCache::default());
        let message = vec![
            ("Message-Id".to_string(), "<n@x>".to_string()),
            ("Subject".to_string(), "new".to_string()),
        ];
        cached.put("k9", &message).unwrap();

        assert!(cached.cache().get("<n@x>").is_ok());
        assert!(cached.headers().get("k9").unwrap().is_slim());
        assert_eq!(cached.inner().reads, 0);
    }

    #[test]
    fn test_message_without_id_is_returned_but_not_cached() {
        let mut mailbox = MemoryMailbox::default();
        mailbox
            .messages
            .insert("k1".to_string(), vec![("Subject".to_string(), "anon".to_string())]);
        let mut cached = HeaderCached::new(mailbox, HeaderCache::default());

        let message = cached.get("k1").unwrap();
        assert_eq!(message.subject(), Some("anon"));
        assert!(cached.cache().is_empty());
    }

    #[test]
    fn test_iteration_skips_vanished_keys() {
        let mut mailbox = MemoryMailbox::with(&[("k1", "<a@x>", "hi"), ("k2", "<b@x>", "yo")]);
        mailbox.listed_only.push("gone".to_string());
        let mut cached = HeaderCached::new(mailbox, HeaderCache::default());

        let mut view = cached.headers();
        let ids: Vec<String> = view
            .iter()
            .unwrap()
            .map(|m| m.unwrap().message_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["<a@x>", "<b@x>"]);
    }

    #[test]
    fn test_view_put_and_lookup() {
        let mut cached = HeaderCached::new(MemoryMailbox::default(), HeaderCache::default());
        let message = vec![("Message-Id".to_string(), "<a@x>".to_string())];

        let mut view = cached.headers();
        view.put("k1", &message).unwrap();
        view.put("k2", &message).unwrap();

        let found = view.lookup("<a@x>");
        assert!(found.contains(&PathSpec::new("memory", ["k1"])));
        assert!(found.contains(&PathSpec::new("memory", ["k2"])));
    }

    #[test]
    fn test_view_load_and_save_share_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headers.bin");

        let mailbox = MemoryMailbox::with(&[("k1", "<a@x>", "hi")]);
        let mut cached = HeaderCached::new(mailbox, HeaderCache::open(&path));
        {
            let mut view = cached.headers();
            assert!(!view.load());
            view.get("k1").unwrap();
            view.save();
        }

        let mailbox = MemoryMailbox::with(&[("k1", "<a@x>", "hi")]);
        let mut warm = HeaderCached::new(mailbox, HeaderCache::open(&path));
        let mut view = warm.headers();
        assert!(view.load());
        assert!(view.get("k1").unwrap().is_slim());
        assert_eq!(warm.inner().reads, 0);
    }
}
