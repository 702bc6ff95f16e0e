use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque key/value metadata carried alongside a record.
pub type Metadata = BTreeMap<String, String>;

/// One unit of content to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Stable identifier used as the upsert key.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub size_bytes: usize,
}

impl ContentRecord {
    /// Build a record whose id is derived from its content and metadata.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        let content = content.into();
        let id = Self::generate_id(&content, &metadata);
        Self::with_id(id, content, metadata)
    }

    /// Build a record with a caller-supplied stable identifier.
    pub fn with_id(id: impl Into<String>, content: impl Into<String>, metadata: Metadata) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            size_bytes: content.len(),
            content,
            metadata,
        }
    }

    /// UUIDv5 over a SHA-256 digest of content and metadata, so upserting the
    /// same record twice overwrites rather than duplicates.
    pub fn generate_id(content: &str, metadata: &Metadata) -> String {
        use sha2::{Digest, Sha256};
        use uuid::Uuid;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        for (key, value) in metadata {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes()).to_string()
    }

    /// Reason the record can never be stored, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.id.trim().is_empty() {
            return Some("record id is empty".to_string());
        }
        if self.content.trim().is_empty() {
            return Some("record content is empty".to_string());
        }
        None
    }
}

/// A record paired with its embedding, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

impl VectorRecord {
    pub fn from_record(record: ContentRecord, vector: Vec<f32>) -> Self {
        Self {
            id: record.id,
            content: record.content,
            metadata: record.metadata,
            vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_generate_id_is_stable() {
        let id = ContentRecord::generate_id("class A {}", &meta(&[("ns", "Game")]));
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        let id2 = ContentRecord::generate_id("class A {}", &meta(&[("ns", "Game")]));
        assert_eq!(id, id2);
        let id3 = ContentRecord::generate_id("class A {}", &meta(&[("ns", "Other")]));
        assert_ne!(id, id3);
    }

    #[test]
    fn test_size_bytes_counts_utf8() {
        let record = ContentRecord::new("héllo", Metadata::new());
        assert_eq!(record.size_bytes, 6);
    }

    #[test]
    fn test_validation() {
        assert!(ContentRecord::new("  \n", Metadata::new())
            .validation_error()
            .is_some());
        assert!(ContentRecord::with_id("", "x", Metadata::new())
            .validation_error()
            .is_some());
        assert!(ContentRecord::new("x", Metadata::new())
            .validation_error()
            .is_none());
    }
}
