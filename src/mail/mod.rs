pub mod adapt;
pub mod cache;
pub mod mailbox;
pub mod maildir;
pub mod threading;
pub mod types;

pub use adapt::{adapt, extract_references, normalise_subject, read_record};
pub use cache::{CacheError, CacheKey, HeaderCache, HeaderRecord};
pub use mailbox::{HeaderCached, HeaderMessage, HeaderView, Mailbox, MailboxError};
pub use maildir::{Maildir, MaildirMessage};
pub use threading::{thread, Container, ContainerId, Forest, Node, ThreadTable, Walk};
pub use types::{Headers, MetadataRecord, PathSpec, SlimMessage, CACHED_HEADERS};
