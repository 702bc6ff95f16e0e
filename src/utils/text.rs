//! Metadata extraction from IL2CPP dump text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ChunkInput, ContentRecord, Metadata};

/// Type names beyond this are dropped from a record's metadata.
pub const MAX_TYPES_PER_RECORD: usize = 64;

static RE_NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^// Namespace:[ \t]*([^\r\n]*)$").unwrap());
static RE_TYPE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|internal|static|sealed|abstract|readonly|ref|unsafe|partial)[ \t]+)*(?:class|struct|enum|interface)[ \t]+([A-Za-z_][\w`]*)",
    )
    .unwrap()
});

/// Distinct, non-empty namespaces declared in `content`, sorted.
pub fn extract_namespaces(content: &str) -> Vec<String> {
    RE_NAMESPACE
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Declared type names in order of appearance, without duplicates.
pub fn extract_type_names(content: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    RE_TYPE_DECL
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_TYPES_PER_RECORD)
        .collect()
}

/// Build the record stored for one dump chunk.
///
/// The id is derived from the source and byte offset so re-ingesting the same
/// dump overwrites the earlier points instead of duplicating them.
pub fn chunk_to_record(source: &str, chunk: &ChunkInput) -> ContentRecord {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), source.to_string());
    metadata.insert("chunk_id".to_string(), chunk.id.to_string());
    metadata.insert("offset".to_string(), chunk.offset.to_string());

    let namespaces = extract_namespaces(&chunk.content);
    if !namespaces.is_empty() {
        metadata.insert("namespaces".to_string(), namespaces.join(","));
    }
    let types = extract_type_names(&chunk.content);
    if !types.is_empty() {
        metadata.insert("types".to_string(), types.join(","));
    }

    let mut key = Metadata::new();
    key.insert("source".to_string(), source.to_string());
    key.insert("offset".to_string(), chunk.offset.to_string());
    let id = ContentRecord::generate_id(&chunk.content, &key);

    ContentRecord::with_id(id, chunk.content.clone(), metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "// Namespace: UnityEngine
public sealed class GameObject : Object // TypeDefIndex: 1
{
}

// Namespace:
internal struct <Module>
{
}

// Namespace: Game.Systems
public enum State // TypeDefIndex: 3
{
}

// Namespace: UnityEngine
public interface ISerializationCallbackReceiver
{
}
public class List`1 // TypeDefIndex: 5
{
}
";

    #[test]
    fn test_extract_namespaces() {
        assert_eq!(
            extract_namespaces(DUMP),
            vec!["Game.Systems".to_string(), "UnityEngine".to_string()]
        );
    }

    #[test]
    fn test_extract_type_names() {
        assert_eq!(
            extract_type_names(DUMP),
            vec!["GameObject", "State", "ISerializationCallbackReceiver", "List`1"]
        );
    }

    #[test]
    fn test_chunk_to_record() {
        let chunk = ChunkInput {
            id: 3,
            offset: 120,
            content: DUMP.to_string(),
        };
        let record = chunk_to_record("dump.cs", &chunk);
        assert_eq!(record.metadata["source"], "dump.cs");
        assert_eq!(record.metadata["chunk_id"], "3");
        assert_eq!(record.metadata["offset"], "120");
        assert_eq!(record.metadata["namespaces"], "Game.Systems,UnityEngine");
        assert!(record.metadata["types"].starts_with("GameObject,"));
        assert_eq!(record.size_bytes, DUMP.len());

        // Same source and offset give the same id
        assert_eq!(record.id, chunk_to_record("dump.cs", &chunk).id);
        assert_ne!(record.id, chunk_to_record("other.cs", &chunk).id);
    }

    #[test]
    fn test_plain_text_has_no_type_metadata() {
        let chunk = ChunkInput {
            id: 0,
            offset: 0,
            content: "\t// RVA: 0x1 Offset: 0x1\n\tpublic void Update() { }\n".to_string(),
        };
        let record = chunk_to_record("dump.cs", &chunk);
        assert!(!record.metadata.contains_key("namespaces"));
        assert!(!record.metadata.contains_key("types"));
    }
}
