//! Structural parsing of the token stream into a [`Document`].
//!
//! The parser walks the token list top to bottom with a small environment
//! stack implied by recursion (root level, inline table, array) and a
//! "current section" table that dotted assignments are displayed under. All
//! structural TOML v1.0 rules are enforced here; the lexer has already
//! validated the scalar syntax.

use crate::error::{Result, TomlError};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::node::{
    Collection, Document, KeySegment, Node, NodeData, NodeId, Section, SectionKind, TableOrigin,
    Trivia,
};

/// Parse a complete TOML source buffer.
pub fn parse(src: &str) -> Result<Document> {
    log::trace!("parsing TOML source of {} bytes", src.len());
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens: &tokens,
        pos: 0,
        doc: Document::new(),
        current: NodeId(0),
    };
    parser.run()?;
    Ok(parser.doc)
}

struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Token],
    pos: usize,
    doc: Document,
    /// The table whose header was most recently opened; dotted assignments
    /// are displayed under it.
    current: NodeId,
}

/// Split a trivia run into the out-of-scope part (up to and including the
/// last blank line) and the part attached directly to the following node.
fn split_oos(run: &str) -> (String, String) {
    let bytes = run.as_bytes();
    let mut split = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b' ' | b'\t' | b'\r') {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'\n' {
                split = j + 1;
            }
        }
        i += 1;
    }
    (run[..split].to_string(), run[split..].to_string())
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.src.len())
    }

    fn err<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(TomlError::parse(self.offset(), message))
    }

    /// Consume whitespace, newlines and comments; returns the raw run.
    fn trivia_run(&mut self) -> String {
        let mut out = String::new();
        while let Some(tok) = self.peek() {
            if tok.is_trivia() {
                out.push_str(tok.raw(self.src));
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    /// Consume whitespace only (inside lines and inline collections).
    fn ws_run(&mut self) -> String {
        let mut out = String::new();
        while let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Whitespace {
                out.push_str(tok.raw(self.src));
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    /// Consume trailing whitespace, an optional tail comment and the line
    /// end. Anything else before the newline is an error.
    fn trivia_to_eol(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(tok) if tok.kind == TokenKind::Whitespace => {
                    out.push_str(tok.raw(self.src));
                    self.pos += 1;
                }
                Some(tok) if tok.kind == TokenKind::Comment => {
                    out.push_str(tok.raw(self.src));
                    self.pos += 1;
                }
                Some(tok) if tok.kind == TokenKind::NewLine => {
                    out.push_str(tok.raw(self.src));
                    self.pos += 1;
                    return Ok(out);
                }
                None => return Ok(out),
                Some(_) => return self.err("expected end of line"),
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let run = self.trivia_run();
            let Some(tok) = self.peek() else {
                self.doc.trailing = run;
                return Ok(());
            };
            let (oos, pre) = split_oos(&run);
            match &tok.kind {
                TokenKind::TableOpen => self.parse_header(oos, pre, false)?,
                TokenKind::TableArrayOpen => self.parse_header(oos, pre, true)?,
                TokenKind::Key { .. } => self.parse_assignment(oos, pre)?,
                _ => return self.err("expected a key or a table header"),
            }
        }
    }

    /// Parse `key ( . key )*` up to (not including) the terminator.
    fn parse_key_path(&mut self) -> Result<Vec<(KeySegment, String)>> {
        let mut segments = Vec::new();
        loop {
            let pre_ws = self.ws_run();
            let tok = match self.peek() {
                Some(tok) => tok,
                None => return self.err("unexpected end of input in key"),
            };
            let (raw, name) = match &tok.kind {
                TokenKind::Key { name, .. } => (tok.raw(self.src).to_string(), name.clone()),
                _ => return self.err("expected a key"),
            };
            self.pos += 1;
            let post_ws = self.ws_run();
            segments.push((
                KeySegment {
                    raw,
                    pre_ws,
                    post_ws,
                },
                name,
            ));
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                }
                _ => return Ok(segments),
            }
        }
    }

    // --- headers ------------------------------------------------------------

    fn parse_header(&mut self, oos: String, pre: String, is_array: bool) -> Result<()> {
        self.pos += 1; // opening bracket(s)
        let segments = self.parse_key_path()?;
        let close_ok = match (is_array, self.peek().map(|t| &t.kind)) {
            (false, Some(TokenKind::TableClose)) => true,
            (true, Some(TokenKind::TableArrayClose)) => true,
            _ => false,
        };
        if !close_ok {
            return self.err("unterminated table header");
        }
        self.pos += 1;

        // Resolve the intermediate path from the root, descending into the
        // last element of table arrays.
        let mut cur = self.doc.root();
        for (_, name) in &segments[..segments.len() - 1] {
            cur = self.descend_header_segment(cur, name)?;
        }

        let (_, final_name) = segments.last().expect("key path is never empty");
        let existing = self.doc.child_by_name(cur, final_name);
        let node_id = if is_array {
            self.append_table_array_element(cur, final_name, existing, &segments)?
        } else {
            self.define_table(cur, final_name, existing, &segments)?
        };

        {
            let node = self.doc.node_mut(node_id);
            node.trivia.oos_before = oos;
            node.trivia.pre_node = pre;
        }
        let post = self.trivia_to_eol()?;
        self.doc.node_mut(node_id).trivia.post_node = post;
        self.current = node_id;
        Ok(())
    }

    fn descend_header_segment(&mut self, cur: NodeId, name: &str) -> Result<NodeId> {
        match self.doc.child_by_name(cur, name) {
            None => Ok(self.new_table(cur, name, TableOrigin::HeaderImplicit)),
            Some(child) => match &self.doc.node(child).data {
                NodeData::Table { origin, .. } => {
                    if *origin == TableOrigin::Inline {
                        self.err(format!("cannot extend inline table '{name}'"))
                    } else {
                        Ok(child)
                    }
                }
                NodeData::Array {
                    table_array_decl: true,
                    coll,
                    ..
                } => match coll.entries.last() {
                    Some(last) => Ok(*last),
                    None => self.err(format!("table array '{name}' has no element")),
                },
                _ => self.err(format!("key '{name}' conflicts with an existing value")),
            },
        }
    }

    fn define_table(
        &mut self,
        cur: NodeId,
        name: &str,
        existing: Option<NodeId>,
        segments: &[(KeySegment, String)],
    ) -> Result<NodeId> {
        let node_id = match existing {
            None => self.new_table(cur, name, TableOrigin::Explicit),
            Some(child) => {
                let origin = match &self.doc.node(child).data {
                    NodeData::Table { origin, .. } => Some(*origin),
                    _ => None,
                };
                match origin {
                    None => {
                        return self.err(format!("key '{name}' conflicts with an existing value"));
                    }
                    Some(TableOrigin::Explicit) => {
                        return self.err(format!("table '{name}' is already defined"));
                    }
                    Some(TableOrigin::DottedImplicit) | Some(TableOrigin::Inline) => {
                        return self.err(format!("cannot redefine key '{name}' as a table"));
                    }
                    Some(TableOrigin::HeaderImplicit) => {
                        // Promotion of an implicit intermediate, allowed once.
                        if let NodeData::Table { origin, .. } = &mut self.doc.node_mut(child).data {
                            *origin = TableOrigin::Explicit;
                        }
                        child
                    }
                }
            }
        };
        let node = self.doc.node_mut(node_id);
        node.raw_name = segments.last().expect("non-empty").0.raw.clone();
        node.key = segments.iter().map(|(seg, _)| seg.clone()).collect();
        self.doc.sections.push(Section {
            node: node_id,
            kind: SectionKind::Table,
        });
        Ok(node_id)
    }

    fn append_table_array_element(
        &mut self,
        cur: NodeId,
        name: &str,
        existing: Option<NodeId>,
        segments: &[(KeySegment, String)],
    ) -> Result<NodeId> {
        let array_id = match existing {
            None => {
                let array = Node {
                    name: name.to_string(),
                    raw_name: segments.last().expect("non-empty").0.raw.clone(),
                    parent: Some(cur),
                    view: None,
                    deleted: false,
                    trivia: Trivia::default(),
                    key: segments.iter().map(|(seg, _)| seg.clone()).collect(),
                    data: NodeData::Array {
                        coll: Collection::default(),
                        inline: false,
                        table_array_decl: true,
                        trailing_comma: false,
                    },
                };
                let id = self.doc.alloc(array);
                self.doc
                    .node_mut(cur)
                    .collection_mut()
                    .expect("parent is a collection")
                    .entries
                    .push(id);
                id
            }
            Some(child) => match &self.doc.node(child).data {
                NodeData::Array {
                    table_array_decl: true,
                    ..
                } => child,
                NodeData::Array { .. } => {
                    return self.err(format!(
                        "array '{name}' was defined inline and cannot be appended to"
                    ));
                }
                _ => return self.err(format!("'{name}' is not an array of tables")),
            },
        };

        let element = Node {
            name: String::new(),
            raw_name: String::new(),
            parent: Some(array_id),
            view: None,
            deleted: false,
            trivia: Trivia::default(),
            key: segments.iter().map(|(seg, _)| seg.clone()).collect(),
            data: NodeData::Table {
                coll: Collection::default(),
                origin: TableOrigin::Explicit,
            },
        };
        let element_id = self.doc.alloc(element);
        let coll = self
            .doc
            .node_mut(array_id)
            .collection_mut()
            .expect("array node");
        coll.entries.push(element_id);
        coll.display.push(element_id);
        self.doc.sections.push(Section {
            node: element_id,
            kind: SectionKind::TableArrayElement,
        });
        Ok(element_id)
    }

    fn new_table(&mut self, parent: NodeId, name: &str, origin: TableOrigin) -> NodeId {
        let node = Node {
            name: name.to_string(),
            raw_name: name.to_string(),
            parent: Some(parent),
            view: None,
            deleted: false,
            trivia: Trivia::default(),
            key: Vec::new(),
            data: NodeData::Table {
                coll: Collection::default(),
                origin,
            },
        };
        let id = self.doc.alloc(node);
        self.doc
            .node_mut(parent)
            .collection_mut()
            .expect("parent is a collection")
            .entries
            .push(id);
        id
    }

    // --- assignments --------------------------------------------------------

    fn parse_assignment(&mut self, oos: String, pre: String) -> Result<()> {
        let node_id = self.parse_keyed_value(self.current, self.current)?;
        {
            let node = self.doc.node_mut(node_id);
            node.trivia.oos_before = oos;
            node.trivia.pre_node = pre;
        }
        let post = self.trivia_to_eol()?;
        self.doc.node_mut(node_id).trivia.post_node = post;
        Ok(())
    }

    /// Parse `key.path = value` relative to `base`; the node is displayed by
    /// `view`. Returns the created value node.
    fn parse_keyed_value(&mut self, base: NodeId, view: NodeId) -> Result<NodeId> {
        let segments = self.parse_key_path()?;
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Assign) => {
                self.pos += 1;
            }
            _ => return self.err("expected '='"),
        }
        let pre_value = self.ws_run();

        // Create dotted intermediates below `base`.
        let mut cur = base;
        for (_, name) in &segments[..segments.len() - 1] {
            cur = match self.doc.child_by_name(cur, name) {
                None => self.new_table(cur, name, TableOrigin::DottedImplicit),
                Some(child) => match &self.doc.node(child).data {
                    NodeData::Table { origin, .. } => match origin {
                        TableOrigin::DottedImplicit | TableOrigin::HeaderImplicit => child,
                        TableOrigin::Explicit => {
                            return self
                                .err(format!("cannot extend table '{name}' with dotted keys"));
                        }
                        TableOrigin::Inline => {
                            return self.err(format!("cannot extend inline table '{name}'"));
                        }
                    },
                    _ => {
                        return self.err(format!("key '{name}' conflicts with an existing value"));
                    }
                },
            };
        }

        let (final_seg, final_name) = segments.last().expect("key path is never empty");
        if self.doc.child_by_name(cur, final_name).is_some() {
            return self.err(format!("duplicate key '{final_name}'"));
        }

        let node = Node {
            name: final_name.clone(),
            raw_name: final_seg.raw.clone(),
            parent: Some(cur),
            view: Some(view),
            deleted: false,
            trivia: Trivia {
                pre_value,
                ..Trivia::default()
            },
            key: segments.iter().map(|(seg, _)| seg.clone()).collect(),
            // Placeholder; overwritten by parse_value_into.
            data: NodeData::Boolean {
                value: false,
                raw: String::new(),
            },
        };
        let node_id = self.doc.alloc(node);
        self.doc
            .node_mut(cur)
            .collection_mut()
            .expect("intermediate is a table")
            .entries
            .push(node_id);
        self.doc
            .node_mut(view)
            .collection_mut()
            .expect("view is a collection")
            .display
            .push(node_id);

        self.parse_value_into(node_id)?;
        Ok(node_id)
    }

    fn parse_value_into(&mut self, node_id: NodeId) -> Result<()> {
        let tok = match self.peek() {
            Some(tok) => tok,
            None => return self.err("expected a value"),
        };
        let raw = tok.raw(self.src).to_string();
        let data = match &tok.kind {
            TokenKind::Bool(value) => NodeData::Boolean { value: *value, raw },
            TokenKind::Integer(value) => NodeData::Integer { value: *value, raw },
            TokenKind::Float(value) => NodeData::Float { value: *value, raw },
            TokenKind::Str { value, quote } => NodeData::Str {
                value: value.clone(),
                raw,
                quote: *quote,
            },
            TokenKind::DateTime => NodeData::DateTime { raw },
            TokenKind::ArrayOpen => {
                self.pos += 1;
                self.doc.node_mut(node_id).data = NodeData::Array {
                    coll: Collection::default(),
                    inline: true,
                    table_array_decl: false,
                    trailing_comma: false,
                };
                return self.parse_array_body(node_id);
            }
            TokenKind::InlineTableOpen => {
                self.pos += 1;
                self.doc.node_mut(node_id).data = NodeData::Table {
                    coll: Collection::default(),
                    origin: TableOrigin::Inline,
                };
                return self.parse_inline_table_body(node_id);
            }
            _ => return self.err("expected a value"),
        };
        self.pos += 1;
        self.doc.node_mut(node_id).data = data;
        Ok(())
    }

    fn parse_array_body(&mut self, array_id: NodeId) -> Result<()> {
        let mut saw_comma = false;
        loop {
            let pre = self.trivia_run();
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::ArrayClose) => {
                    self.pos += 1;
                    let node = self.doc.node_mut(array_id);
                    node.trivia.post_items = pre;
                    if let NodeData::Array { trailing_comma, .. } = &mut node.data {
                        *trailing_comma = saw_comma;
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => return self.err("unterminated array"),
            }

            let element = Node {
                name: String::new(),
                raw_name: String::new(),
                parent: Some(array_id),
                view: None,
                deleted: false,
                trivia: Trivia {
                    pre_node: pre,
                    ..Trivia::default()
                },
                key: Vec::new(),
                data: NodeData::Boolean {
                    value: false,
                    raw: String::new(),
                },
            };
            let element_id = self.doc.alloc(element);
            {
                let coll = self
                    .doc
                    .node_mut(array_id)
                    .collection_mut()
                    .expect("array node");
                coll.entries.push(element_id);
                coll.display.push(element_id);
            }
            self.parse_value_into(element_id)?;

            let post = self.trivia_run();
            self.doc.node_mut(element_id).trivia.post_node = post;
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => {
                    self.pos += 1;
                    saw_comma = true;
                }
                Some(TokenKind::ArrayClose) => {
                    saw_comma = false;
                    // Loop once more; the close branch consumes the bracket.
                }
                _ => return self.err("expected ',' or ']' in array"),
            }
        }
    }

    fn parse_inline_table_body(&mut self, table_id: NodeId) -> Result<()> {
        // `{}` and `{ }`.
        let lead = self.ws_run();
        if let Some(TokenKind::InlineTableClose) = self.peek().map(|t| &t.kind) {
            self.pos += 1;
            self.doc.node_mut(table_id).trivia.post_items = lead;
            return Ok(());
        }

        let mut pending_ws = lead;
        loop {
            let child_id = self.parse_keyed_value(table_id, table_id)?;
            // The whitespace after `{` or the comma leads the child's key.
            if !pending_ws.is_empty() {
                let node = self.doc.node_mut(child_id);
                if let Some(first) = node.key.first_mut() {
                    first.pre_ws = format!("{pending_ws}{}", first.pre_ws);
                }
            }
            let post = self.ws_run();
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => {
                    self.pos += 1;
                    self.doc.node_mut(child_id).trivia.post_node = post;
                    pending_ws = String::new();
                    if let Some(TokenKind::InlineTableClose) = self.peek().map(|t| &t.kind) {
                        return self.err("trailing comma in inline table");
                    }
                }
                Some(TokenKind::InlineTableClose) => {
                    self.pos += 1;
                    self.doc.node_mut(child_id).trivia.post_node = post;
                    return Ok(());
                }
                _ => return self.err("expected ',' or '}' in inline table"),
            }
        }
    }
}
