//! Prefixed ULID identifiers: `<prefix>_<ulid>`, e.g. `snp_01hqxyz...`.
//!
//! Message, snapshot and backup ids sort oldest first. Conversation ids
//! are generated from the bit-inverted ULID so a lexical sort of the
//! conversations directory lists the newest first.

use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Conversation,
    Message,
    Snapshot,
    Backup,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Conversation => "cnv",
            IdPrefix::Message => "msg",
            IdPrefix::Snapshot => "snp",
            IdPrefix::Backup => "bak",
        }
    }

    fn newest_first(&self) -> bool {
        matches!(self, IdPrefix::Conversation)
    }
}

/// Identifier generation.
pub struct Identifier;

impl Identifier {
    /// Generate a fresh identifier of the given kind.
    pub fn generate(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        let ulid = if prefix.newest_first() { Ulid(!ulid.0) } else { ulid };
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_ascii_lowercase())
    }

    /// Whether `id` starts with `<prefix>_`.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.len() > 1 && rest.starts_with('_'))
    }

    pub fn conversation() -> String {
        Self::generate(IdPrefix::Conversation)
    }

    pub fn message() -> String {
        Self::generate(IdPrefix::Message)
    }

    pub fn snapshot() -> String {
        Self::generate(IdPrefix::Snapshot)
    }

    pub fn backup() -> String {
        Self::generate(IdPrefix::Backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_shape() {
        let id = Identifier::snapshot();
        assert!(id.starts_with("snp_"));
        assert_eq!(id.len(), 4 + 26);
        assert_eq!(id, id.to_ascii_lowercase());
    }

    #[test]
    fn test_messages_sort_oldest_first() {
        let first = Identifier::message();
        sleep(Duration::from_millis(2));
        let second = Identifier::message();
        assert!(first < second);
    }

    #[test]
    fn test_conversations_sort_newest_first() {
        let first = Identifier::conversation();
        sleep(Duration::from_millis(2));
        let second = Identifier::conversation();
        assert!(first > second);
    }

    #[test]
    fn test_has_prefix() {
        let id = Identifier::backup();
        assert!(Identifier::has_prefix(&id, IdPrefix::Backup));
        assert!(!Identifier::has_prefix(&id, IdPrefix::Snapshot));
        assert!(!Identifier::has_prefix("bak123", IdPrefix::Backup));
        assert!(!Identifier::has_prefix("bak_", IdPrefix::Backup));
        assert!(Identifier::has_prefix("bak_1", IdPrefix::Backup));
    }
}
