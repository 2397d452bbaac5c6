use serde::{Deserialize, Serialize};

/// Headers kept in the slim cache record, in storage order.
pub const CACHED_HEADERS: [&str; 5] = [
    "Message-Id",
    "From",
    "Subject",
    "References",
    "In-Reply-To",
];

/// Threading metadata for one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: String,
    /// `None` marks a placeholder for a referenced but unseen message
    pub subject: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl MetadataRecord {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, references: Vec<String>) -> Self {
        Self {
            id: id.into(),
            subject: Some(subject.into()),
            references,
        }
    }

    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: None,
            references: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.subject.is_none()
    }
}

/// Provider-tagged locator for refetching a message from its storage
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathSpec {
    pub provider: String,
    pub locator: Vec<String>,
}

impl PathSpec {
    pub fn new<I, S>(provider: impl Into<String>, locator: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            provider: provider.into(),
            locator: locator.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for PathSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.locator.join("/"))
    }
}

/// Anything that can answer header lookups by name.
/// Names compare ASCII case-insensitively, the first occurrence wins.
pub trait Headers {
    fn header(&self, name: &str) -> Option<&str>;

    fn message_id(&self) -> Option<&str> {
        self.header("Message-Id")
    }

    fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    fn from_header(&self) -> Option<&str> {
        self.header("From")
    }

    fn references(&self) -> Option<&str> {
        self.header("References")
    }

    fn in_reply_to(&self) -> Option<&str> {
        self.header("In-Reply-To")
    }

    /// Whitelisted header pairs, in `CACHED_HEADERS` order
    fn slim_headers(&self) -> Vec<(String, String)> {
        CACHED_HEADERS
            .iter()
            .filter_map(|name| {
                self.header(name)
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    }
}

fn find_header<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

impl Headers for [(String, String)] {
    fn header(&self, name: &str) -> Option<&str> {
        find_header(self, name)
    }
}

impl Headers for Vec<(String, String)> {
    fn header(&self, name: &str) -> Option<&str> {
        find_header(self, name)
    }
}

/// Header-only message rebuilt from a cache record (no body)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlimMessage {
    pub headers: Vec<(String, String)>,
}

impl SlimMessage {
    pub fn from_headers(src: &impl Headers) -> Self {
        Self {
            headers: src.slim_headers(),
        }
    }
}

impl Headers for SlimMessage {
    fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl<T: Headers + ?Sized> Headers for &T {
    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }
}
