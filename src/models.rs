//! Core data models used throughout code-rag.
//!
//! A [`Chunk`] is the unit that flows through the whole pipeline: the
//! extractor produces it, the walker stamps a vector id on it, the chunk
//! store persists it, and the retriever resolves index hits back into it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Category of an extracted chunk.
///
/// Serialized names match the node kinds the AST extractor reports for
/// Python, which became the canonical category names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    #[serde(rename = "function_definition")]
    Function,
    #[serde(rename = "class_definition")]
    Class,
    CsvRow,
    JsonEntry,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function_definition",
            Self::Class => "class_definition",
            Self::CsvRow => "csv_row",
            Self::JsonEntry => "json_entry",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function_definition" => Ok(Self::Function),
            "class_definition" => Ok(Self::Class),
            "csv_row" => Ok(Self::CsvRow),
            "json_entry" => Ok(Self::JsonEntry),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// Zero-based (row, column) position inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub row: usize,
    pub column: usize,
}

impl Point {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// A unit of extracted content with positional and identity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: String,
    pub file_path: String,
    pub start_point: Option<Point>,
    pub end_point: Option<Point>,
    pub name: Option<String>,
    /// Stable fingerprint of `content`, see [`content_hash`].
    pub hash: i64,
    /// Join key with the vector index. `None` until the walker assigns it.
    pub vector_id: Option<i64>,
}

impl Chunk {
    /// Build a chunk without positional data (CSV rows, JSON entries).
    pub fn flat(kind: ChunkKind, content: String, file_path: &str) -> Self {
        Self {
            kind,
            hash: content_hash(&content),
            content,
            file_path: file_path.to_string(),
            start_point: None,
            end_point: None,
            name: None,
            vector_id: None,
        }
    }

    pub fn with_vector_id(mut self, vector_id: i64) -> Self {
        self.vector_id = Some(vector_id);
        self
    }
}

/// Content fingerprint: the leading 8 bytes of the SHA-256 digest,
/// read big-endian as `i64`. Identical across processes and platforms.
pub fn content_hash(content: &str) -> i64 {
    let digest = Sha256::digest(content.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

/// Full hex SHA-256 digest, used as the blob address in the chunk store.
pub fn content_digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// A ranked similarity hit resolved back to stored chunk content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub distance: f32,
    pub vector_id: i64,
    pub file_path: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(
            content_hash("def foo(): pass"),
            content_hash("def foo(): pass")
        );
        assert_ne!(content_hash("a"), content_hash("b"));
        // Known SHA-256("abc") prefix: ba7816bf8f01cfea
        let expected = i64::from_be_bytes([0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea]);
        assert_eq!(content_hash("abc"), expected);
    }

    #[test]
    fn test_content_digest_hex() {
        let d = content_digest("abc");
        assert_eq!(d.len(), 64);
        assert!(d.starts_with("ba7816bf"));
    }

    #[test]
    fn test_chunk_kind_roundtrip_names() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::Class,
            ChunkKind::CsvRow,
            ChunkKind::JsonEntry,
        ] {
            assert_eq!(kind.as_str().parse::<ChunkKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_flat_chunk_has_no_points() {
        let c = Chunk::flat(ChunkKind::CsvRow, "a, b".to_string(), "data.csv");
        assert!(c.start_point.is_none());
        assert!(c.vector_id.is_none());
        assert_eq!(c.hash, content_hash("a, b"));
    }
}
