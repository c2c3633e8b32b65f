//! Structure-preserving TOML configuration engine.
//!
//! Parses UTF-8 TOML text into an arena tree in which every node keeps its
//! original lexical surroundings, supports programmatic navigation and
//! edits, and regenerates text either byte-preserving or canonicalized with
//! an optional prefix key. Date-times are recognized structurally but never
//! interpreted.

pub mod edit;
pub mod emit;
pub mod error;
pub mod lexer;
pub mod node;
pub mod parse;
pub mod path;

pub use crate::error::TomlError;
pub use crate::lexer::{KeyKind, QuoteKind, Token, TokenKind};
pub use crate::node::{Document, NodeId, NodeType};
pub use crate::parse::parse;

pub use sdv_object::Value;

impl Document {
    /// Parse a complete TOML source buffer.
    pub fn parse(src: &str) -> Result<Document, TomlError> {
        crate::parse::parse(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_has_a_root() {
        let doc = Document::parse("").unwrap();
        assert_eq!(doc.node_type(doc.root()), NodeType::Table);
        assert_eq!(doc.count(doc.root()), 0);
        assert!(doc.parent(doc.root()).is_none());
    }

    #[test]
    fn values_parse_with_their_types() {
        let doc = Document::parse(
            "name = \"Hammer\"\nid = 42\npi = 3.1415926\nboolean = true\narray = []\ntable = {}\n",
        )
        .unwrap();
        assert_eq!(doc.value(doc.get("name").unwrap()), Value::Str("Hammer".into()));
        assert_eq!(doc.value(doc.get("id").unwrap()), Value::Int(42));
        assert_eq!(doc.value(doc.get("pi").unwrap()), Value::Float(3.1415926));
        assert_eq!(doc.value(doc.get("boolean").unwrap()), Value::Bool(true));
        assert_eq!(doc.node_type(doc.get("array").unwrap()), NodeType::Array);
        assert_eq!(doc.node_type(doc.get("table").unwrap()), NodeType::Table);
    }

    #[test]
    fn unedited_text_round_trips_byte_identically() {
        let src = "# header\nkey = \"value\"  # tail\n\n[table]\nx = 1\n";
        let doc = Document::parse(src).unwrap();
        assert_eq!(doc.generate(), src);
    }

    #[test]
    fn parse_error_carries_an_offset() {
        match Document::parse("a = 1\nb = \n") {
            Err(TomlError::Parse { offset, .. }) => assert!(offset >= 6),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
