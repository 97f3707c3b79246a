//! Language detection and tree-sitter grammar registry.
//!
//! Each language contributes a set of node kinds that map onto the two
//! chunk categories, function and class. Adding a language means adding a
//! grammar and its kind table here; the extractor itself does not change.

use crate::models::ChunkKind;

/// Languages parsed through tree-sitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl Lang {
    /// Resolve a language from a file extension (with leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            ".py" => Some(Self::Python),
            ".js" | ".mjs" | ".cjs" => Some(Self::JavaScript),
            ".java" => Some(Self::Java),
            ".cpp" | ".cc" | ".cxx" | ".hpp" | ".hh" | ".h" => Some(Self::Cpp),
            _ => None,
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    /// Map a node kind to a chunk category, or `None` if the node is not
    /// a chunk boundary in this language.
    pub fn classify(self, node_kind: &str) -> Option<ChunkKind> {
        let (functions, classes): (&[&str], &[&str]) = match self {
            Self::Python => (&["function_definition"], &["class_definition"]),
            Self::JavaScript => (
                &[
                    "function_definition",
                    "function_declaration",
                    "generator_function_declaration",
                    "method_definition",
                ],
                &["class_definition", "class_declaration"],
            ),
            Self::Java => (
                &[
                    "function_definition",
                    "method_declaration",
                    "constructor_declaration",
                ],
                &[
                    "class_definition",
                    "class_declaration",
                    "interface_declaration",
                    "enum_declaration",
                ],
            ),
            Self::Cpp => (
                &["function_definition"],
                &["class_definition", "class_specifier", "struct_specifier"],
            ),
        };

        if functions.contains(&node_kind) {
            Some(ChunkKind::Function)
        } else if classes.contains(&node_kind) {
            Some(ChunkKind::Class)
        } else {
            None
        }
    }
}
