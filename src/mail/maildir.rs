use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use super::mailbox::{Mailbox, MailboxError};
use super::types::{Headers, PathSpec};

/// Provider tag used in this backend's cache locators
pub const PROVIDER: &str = "maildir";

/// A parsed message file: raw header pairs in file order plus the body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaildirMessage {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MaildirMessage {
    /// Parse an RFC 5322 message. Folded header lines are joined with a
    /// single space; the body starts after the first empty line.
    pub fn parse(raw: &str) -> Self {
        let mut headers = Vec::new();
        let mut current_header: Option<String> = None;
        let mut current_value = String::new();
        let mut body = String::new();

        let mut lines = raw.split_inclusive('\n');
        for line in lines.by_ref() {
            let trimmed = line.trim_end_matches(['\r', '\n']);

            // Empty line marks end of headers
            if trimmed.is_empty() {
                break;
            }

            if trimmed.starts_with(' ') || trimmed.starts_with('\t') {
                // Continuation of previous header
                if current_header.is_some() {
                    current_value.push(' ');
                    current_value.push_str(trimmed.trim());
                }
                continue;
            }

            if let Some(header) = current_header.take() {
                headers.push((header, std::mem::take(&mut current_value)));
            }

            if let Some(colon_pos) = trimmed.find(':') {
                current_header = Some(trimmed[..colon_pos].trim().to_string());
                current_value = trimmed[colon_pos + 1..].trim().to_string();
            }
        }

        if let Some(header) = current_header.take() {
            headers.push((header, current_value));
        }

        for line in lines {
            body.push_str(line);
        }

        Self { headers, body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

impl Headers for MaildirMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.header(name)
    }
}

/// One maildir directory (`cur/` and `new/`). Keys are file names with the
/// `:2,flags` info suffix stripped.
#[derive(Debug)]
pub struct Maildir {
    root: PathBuf,
    toc: HashMap<String, PathBuf>,
}

impl Maildir {
    /// Open an existing maildir
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MailboxError> {
        let root = root.into();
        for sub in ["cur", "new"] {
            if !root.join(sub).is_dir() {
                return Err(MailboxError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not a maildir (no {}/)", root.display(), sub),
                )));
            }
        }
        Ok(Self {
            root,
            toc: HashMap::new(),
        })
    }

    /// Open a maildir, creating `cur/`, `new/` and `tmp/` when missing
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, MailboxError> {
        let root = root.into();
        for sub in ["cur", "new", "tmp"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn refresh(&mut self) {
        self.toc.clear();
        for sub in ["cur", "new"] {
            let dir = self.root.join(sub);
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                self.toc
                    .insert(key_from_filename(name).to_string(), entry.into_path());
            }
        }
        log::debug!("{}: {} messages", self.root.display(), self.toc.len());
    }

    fn path_of(&mut self, key: &str) -> Result<PathBuf, MailboxError> {
        if !self.toc.contains_key(key) {
            self.refresh();
        }
        self.toc
            .get(key)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(key.to_string()))
    }
}

/// Strip the maildir info suffix: "123.abc:2,RS" -> "123.abc"
fn key_from_filename(name: &str) -> &str {
    name.split_once(':').map(|(key, _)| key).unwrap_or(name)
}

fn unique_tmp_name(key: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}.{}.{}", key, std::process::id(), nanos)
}

impl Mailbox for Maildir {
    type Message = MaildirMessage;

    fn keys(&mut self) -> Result<Vec<String>, MailboxError> {
        self.refresh();
        let mut keys: Vec<String> = self.toc.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn get(&mut self, key: &str) -> Result<Self::Message, MailboxError> {
        let path = self.path_of(key)?;
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.toc.remove(key);
                return Err(MailboxError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(MaildirMessage::parse(&String::from_utf8_lossy(&raw)))
    }

    /// Deliver through `tmp/`, replacing the file already holding `key`
    /// or landing in `new/`.
    fn put(&mut self, key: &str, message: &Self::Message) -> Result<(), MailboxError> {
        let target = match self.path_of(key) {
            Ok(path) => path,
            Err(MailboxError::NotFound(_)) => self.root.join("new").join(key),
            Err(e) => return Err(e),
        };

        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir)?;
        let tmp_path = tmp_dir.join(unique_tmp_name(key));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&message.to_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &target)?;

        self.toc.insert(key.to_string(), target);
        Ok(())
    }

    fn cache_key(&self, key: &str) -> PathSpec {
        PathSpec::new(PROVIDER, [self.root.to_string_lossy().into_owned(), key.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::cache::HeaderCache;
    use crate::mail::mailbox::HeaderCached;

    const SAMPLE: &str = concat!(
        "Message-ID: <a@example.com>\r\n",
        "From: Alice <alice@example.com>\r\n",
        "Subject: Re: a long\r\n",
        " folded subject\r\n",
        "References: <x@example.com>\r\n",
        "\t<y@example.com>\r\n",
        "\r\n",
        "Body line one\r\n",
        "\r\n",
        "Body line two\r\n",
    );

    fn write_mail(root: &Path, sub: &str, name: &str, raw: &str) {
        fs::write(root.join(sub).join(name), raw).unwrap();
    }

    #[test]
    fn test_parse_unfolds_headers() {
        let message = MaildirMessage::parse(SAMPLE);
        assert_eq!(message.message_id(), Some("<a@example.com>"));
        assert_eq!(message.subject(), Some("Re: a long folded subject"));
        assert_eq!(
            message.references(),
            Some("<x@example.com> <y@example.com>")
        );
        assert_eq!(message.body, "Body line one\r\n\r\nBody line two\r\n");
    }

    #[test]
    fn test_key_from_filename() {
        assert_eq!(key_from_filename("1770.252281_22.host,U=22:2,S"), "1770.252281_22.host,U=22");
        assert_eq!(key_from_filename("plain"), "plain");
    }

    #[test]
    fn test_open_rejects_non_maildir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Maildir::open(dir.path()).is_err());
    }

    #[test]
    fn test_keys_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut maildir = Maildir::create(dir.path()).unwrap();
        write_mail(dir.path(), "cur", "1.host:2,S", SAMPLE);
        write_mail(dir.path(), "new", "2.host", "Message-Id: <b@x>\n\nhi\n");

        assert_eq!(maildir.keys().unwrap(), vec!["1.host", "2.host"]);
        let message = maildir.get("2.host").unwrap();
        assert_eq!(message.message_id(), Some("<b@x>"));
        assert_eq!(message.body, "hi\n");
        assert!(matches!(maildir.get("3.host"), Err(MailboxError::NotFound(_))));
    }

    #[test]
    fn test_vanished_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut maildir = Maildir::create(dir.path()).unwrap();
        write_mail(dir.path(), "new", "1.host", SAMPLE);
        maildir.keys().unwrap();

        fs::remove_file(dir.path().join("new/1.host")).unwrap();
        assert!(matches!(maildir.get("1.host"), Err(MailboxError::NotFound(_))));
    }

    #[test]
    fn test_put_delivers_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut maildir = Maildir::create(dir.path()).unwrap();

        let mut message = MaildirMessage::parse("Message-Id: <n@x>\nSubject: one\n\nbody\n");
        maildir.put("9.host", &message).unwrap();
        assert!(dir.path().join("new/9.host").is_file());

        message.headers[1].1 = "two".to_string();
        maildir.put("9.host", &message).unwrap();
        assert_eq!(maildir.get("9.host").unwrap().subject(), Some("two"));
        assert_eq!(maildir.keys().unwrap(), vec!["9.host"]);
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_cache_key_names_backend_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let maildir = Maildir::create(dir.path()).unwrap();
        let spec = maildir.cache_key("1.host");
        assert_eq!(spec.provider, PROVIDER);
        assert_eq!(spec.locator.last().map(String::as_str), Some("1.host"));
    }

    #[test]
    fn test_header_cached_maildir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mail = dir.path().join("INBOX");
        let cache_path = dir.path().join("cache/headers.bin");
        let maildir = Maildir::create(&mail).unwrap();
        write_mail(&mail, "cur", "1.host:2,S", SAMPLE);

        let mut cached = HeaderCached::new(maildir, HeaderCache::open(&cache_path));
        {
            let mut view = cached.headers();
            let messages: Vec<_> = view.iter().unwrap().collect();
            assert_eq!(messages.len(), 1);
            assert!(!messages[0].as_ref().unwrap().is_slim());
            view.save();
        }

        let mut cache = HeaderCache::open(&cache_path);
        cache.load().unwrap();
        let spec = cached.inner().cache_key("1.host");
        let headers = cache.get(&spec).unwrap();
        assert_eq!(headers, cache.get("<a@example.com>").unwrap());
        assert_eq!(headers[0], ("Message-Id".to_string(), "<a@example.com>".to_string()));
        assert_eq!(cache.lookup("<a@example.com>").len(), 1);
    }
}
