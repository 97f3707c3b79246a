//! Format-aware chunk extraction.
//!
//! Turns raw file bytes into an ordered list of [`Chunk`]s:
//!
//! | Format | Strategy | Chunk kind |
//! |--------|----------|------------|
//! | Python, JavaScript, Java, C++ | tree-sitter AST, one chunk per function/class node | `function_definition`, `class_definition` |
//! | CSV | one chunk per record, fields joined with `", "` | `csv_row` |
//! | JSON | one chunk per top-level key, `"{key}: {value}"` | `json_entry` |
//!
//! Nested definitions produce their own chunks in addition to the chunk of
//! the enclosing definition, in document (pre-order) order.

use tree_sitter::{Node, Parser};

use crate::error::ExtractionError;
use crate::languages::Lang;
use crate::models::{content_hash, Chunk, ChunkKind, Point};

/// Extract chunks from a file's bytes.
///
/// `extension` includes the leading dot (`".py"`). The returned chunks have
/// no vector id; the walker assigns one at insertion time.
pub fn extract(
    bytes: &[u8],
    extension: &str,
    file_path: &str,
) -> Result<Vec<Chunk>, ExtractionError> {
    if let Some(lang) = Lang::from_extension(extension) {
        return extract_code(bytes, lang, file_path);
    }

    match extension.to_ascii_lowercase().as_str() {
        ".csv" => extract_csv(bytes, file_path),
        ".json" => extract_json(bytes, file_path),
        other => Err(ExtractionError::Unsupported(other.to_string())),
    }
}

/// Everything the recursive AST visit needs, bundled so each call stays small.
struct AstCtx<'a> {
    source: &'a str,
    file_path: &'a str,
    lang: Lang,
}

fn extract_code(bytes: &[u8], lang: Lang, file_path: &str) -> Result<Vec<Chunk>, ExtractionError> {
    let source = std::str::from_utf8(bytes).map_err(|e| ExtractionError::Malformed {
        path: file_path.to_string(),
        reason: format!("not valid UTF-8: {e}"),
    })?;

    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .map_err(|e| ExtractionError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ExtractionError::Parse(format!("parse failed for {file_path}")))?;

    let ctx = AstCtx {
        source,
        file_path,
        lang,
    };
    Ok(collect_chunks(&ctx, tree.root_node()))
}

/// Pre-order visit: the node's own chunk (if any) followed by the chunks of
/// each child subtree, concatenated.
fn collect_chunks(ctx: &AstCtx<'_>, node: Node<'_>) -> Vec<Chunk> {
    let own = ctx
        .lang
        .classify(node.kind())
        .map(|kind| node_chunk(ctx, &node, kind));

    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();

    own.into_iter()
        .chain(children.into_iter().flat_map(|child| collect_chunks(ctx, child)))
        .collect()
}

fn node_chunk(ctx: &AstCtx<'_>, node: &Node<'_>, kind: ChunkKind) -> Chunk {
    let content = ctx.source[node.byte_range()].to_string();
    let start = node.start_position();
    let end = node.end_position();

    Chunk {
        kind,
        hash: content_hash(&content),
        content,
        file_path: ctx.file_path.to_string(),
        start_point: Some(Point::new(start.row, start.column)),
        end_point: Some(Point::new(end.row, end.column)),
        name: node_name(ctx, node),
        vector_id: None,
    }
}

fn node_name(ctx: &AstCtx<'_>, node: &Node<'_>) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(ctx.source[name.byte_range()].to_string());
    }

    // C++ function definitions carry their name at the end of a declarator chain:
    // function_definition > function_declarator > (qualified_)identifier
    if ctx.lang == Lang::Cpp {
        let mut current = node.child_by_field_name("declarator")?;
        while let Some(inner) = current.child_by_field_name("declarator") {
            current = inner;
        }
        return Some(ctx.source[current.byte_range()].to_string());
    }

    None
}

fn extract_csv(bytes: &[u8], file_path: &str) -> Result<Vec<Chunk>, ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut chunks = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractionError::Malformed {
            path: file_path.to_string(),
            reason: e.to_string(),
        })?;
        let content = record.iter().collect::<Vec<_>>().join(", ");
        chunks.push(Chunk::flat(ChunkKind::CsvRow, content, file_path));
    }
    Ok(chunks)
}

fn extract_json(bytes: &[u8], file_path: &str) -> Result<Vec<Chunk>, ExtractionError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractionError::Malformed {
            path: file_path.to_string(),
            reason: e.to_string(),
        })?;

    let object = value.as_object().ok_or_else(|| ExtractionError::Malformed {
        path: file_path.to_string(),
        reason: "top-level JSON value is not an object".to_string(),
    })?;

    Ok(object
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Chunk::flat(
                ChunkKind::JsonEntry,
                format!("{key}: {rendered}"),
                file_path,
            )
        })
        .collect())
}
