//! Text generation from the parse tree.
//!
//! Two generators exist, mirroring the two consumers of the tree:
//!
//! * [`Document::generate`] reproduces the original text from the stored
//!   code snippets and raw slices. An unedited document round-trips
//!   byte-identically; edited nodes emit their regenerated canonical raw
//!   text, deleted nodes are omitted.
//! * [`Document::generate_with_prefix`] rewrites the document canonically:
//!   comments and stored whitespace are dropped, dotted keys are regrouped
//!   under explicit headers, values are written in canonical form, and every
//!   emitted header/key is prepended with the prefix key. Key spellings
//!   (bare, quoted, literal) are kept.

use crate::node::{Document, KeySegment, NodeData, NodeId, SectionKind, TableOrigin};

impl Document {
    /// Position-preserving emission of the whole document.
    pub fn generate(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let node = self.node(section.node);
            if node.deleted {
                continue;
            }
            match section.kind {
                SectionKind::Root => {}
                SectionKind::Table => {
                    out.push_str(&node.trivia.oos_before);
                    out.push_str(&node.trivia.pre_node);
                    out.push('[');
                    push_key(&node.key, &mut out);
                    out.push(']');
                    out.push_str(&node.trivia.post_node);
                }
                SectionKind::TableArrayElement => {
                    out.push_str(&node.trivia.oos_before);
                    out.push_str(&node.trivia.pre_node);
                    out.push_str("[[");
                    push_key(&node.key, &mut out);
                    out.push_str("]]");
                    out.push_str(&node.trivia.post_node);
                }
            }
            if let Some(coll) = node.collection() {
                for child in &coll.display {
                    self.emit_preserved_entry(*child, &mut out);
                }
            }
        }
        out.push_str(&self.trailing);
        out
    }

    fn emit_preserved_entry(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        if node.deleted {
            return;
        }
        out.push_str(&node.trivia.oos_before);
        out.push_str(&node.trivia.pre_node);
        push_key(&node.key, out);
        out.push('=');
        out.push_str(&node.trivia.pre_value);
        self.emit_preserved_value(id, out);
        out.push_str(&node.trivia.post_node);
    }

    fn emit_preserved_value(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        match &node.data {
            NodeData::Boolean { raw, .. }
            | NodeData::Integer { raw, .. }
            | NodeData::Float { raw, .. }
            | NodeData::Str { raw, .. }
            | NodeData::DateTime { raw } => out.push_str(raw),
            NodeData::Array {
                coll,
                trailing_comma,
                ..
            } => {
                out.push('[');
                let live: Vec<NodeId> = coll
                    .entries
                    .iter()
                    .copied()
                    .filter(|e| !self.node(*e).deleted)
                    .collect();
                for (i, element) in live.iter().enumerate() {
                    let elem = self.node(*element);
                    out.push_str(&elem.trivia.pre_node);
                    self.emit_preserved_value(*element, out);
                    out.push_str(&elem.trivia.post_node);
                    if i + 1 < live.len() || *trailing_comma {
                        out.push(',');
                    }
                }
                out.push_str(&node.trivia.post_items);
                out.push(']');
            }
            NodeData::Table { coll, .. } => {
                out.push('{');
                let live: Vec<NodeId> = coll
                    .display
                    .iter()
                    .copied()
                    .filter(|e| !self.node(*e).deleted)
                    .collect();
                for (i, child_id) in live.iter().enumerate() {
                    let child = self.node(*child_id);
                    push_key(&child.key, out);
                    out.push('=');
                    out.push_str(&child.trivia.pre_value);
                    self.emit_preserved_value(*child_id, out);
                    out.push_str(&child.trivia.post_node);
                    if i + 1 < live.len() {
                        out.push(',');
                    }
                }
                out.push_str(&node.trivia.post_items);
                out.push('}');
            }
        }
    }

    /// Canonicalizing emission. `prefix` is prepended to every emitted
    /// header; an empty prefix canonicalizes in place.
    pub fn generate_with_prefix(&self, prefix: &str) -> String {
        let mut out = String::new();
        let prefix_segs = split_spelled_key(prefix);
        self.canon_table(self.root(), &prefix_segs, true, &mut out);
        let trimmed = out.trim_start_matches('\n');
        trimmed.to_string()
    }

    /// Canonical emission of a table body without its own header; nested
    /// tables emit headers relative to the table. This is the form object
    /// configurations are stored and replayed in.
    pub fn generate_table_body(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.canon_table(id, &[], true, &mut out);
        out.trim_start_matches('\n').to_string()
    }

    fn canon_table(&self, id: NodeId, path: &[String], top: bool, out: &mut String) {
        let node = self.node(id);
        let coll = match node.collection() {
            Some(coll) => coll,
            None => return,
        };
        let live: Vec<NodeId> = coll
            .entries
            .iter()
            .copied()
            .filter(|e| !self.node(*e).deleted)
            .collect();
        let (values, sections): (Vec<NodeId>, Vec<NodeId>) = live
            .iter()
            .copied()
            .partition(|child| !self.canon_is_section(*child));

        let explicit = matches!(
            node.data,
            NodeData::Table {
                origin: TableOrigin::Explicit,
                ..
            }
        );
        let needs_header = if top {
            !path.is_empty() && !values.is_empty()
        } else {
            explicit || !values.is_empty()
        };
        if needs_header {
            out.push('\n');
            out.push('[');
            out.push_str(&path.join("."));
            out.push_str("]\n");
        }
        for value in &values {
            self.canon_value_line(*value, out);
        }
        for section in &sections {
            let child = self.node(*section);
            let mut child_path = path.to_vec();
            child_path.push(child.raw_name.clone());
            match &child.data {
                NodeData::Table { .. } => self.canon_table(*section, &child_path, false, out),
                NodeData::Array { .. } => self.canon_table_array(*section, &child_path, out),
                _ => {}
            }
        }
    }

    fn canon_table_array(&self, id: NodeId, path: &[String], out: &mut String) {
        let coll = match self.node(id).collection() {
            Some(coll) => coll,
            None => return,
        };
        for element in coll.entries.iter().filter(|e| !self.node(**e).deleted) {
            out.push_str(&format!("\n[[{}]]\n", path.join(".")));
            let element_coll = match self.node(*element).collection() {
                Some(coll) => coll,
                None => continue,
            };
            let live: Vec<NodeId> = element_coll
                .entries
                .iter()
                .copied()
                .filter(|e| !self.node(*e).deleted)
                .collect();
            let (values, sections): (Vec<NodeId>, Vec<NodeId>) = live
                .iter()
                .copied()
                .partition(|child| !self.canon_is_section(*child));
            for value in &values {
                self.canon_value_line(*value, out);
            }
            for section in &sections {
                let child = self.node(*section);
                let mut child_path = path.to_vec();
                child_path.push(child.raw_name.clone());
                match &child.data {
                    NodeData::Table { .. } => self.canon_table(*section, &child_path, false, out),
                    NodeData::Array { .. } => self.canon_table_array(*section, &child_path, out),
                    _ => {}
                }
            }
        }
    }

    /// Non-inline tables and table-array declarations emit as sections;
    /// everything else stays in value position.
    fn canon_is_section(&self, id: NodeId) -> bool {
        match &self.node(id).data {
            NodeData::Table { origin, .. } => *origin != TableOrigin::Inline,
            NodeData::Array {
                table_array_decl, ..
            } => *table_array_decl,
            _ => false,
        }
    }

    fn canon_value_line(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        out.push_str(&node.raw_name);
        out.push_str(" = ");
        out.push_str(&self.canon_value(id));
        out.push('\n');
    }

    pub(crate) fn canon_value(&self, id: NodeId) -> String {
        let node = self.node(id);
        match &node.data {
            NodeData::Boolean { value, .. } => value.to_string(),
            NodeData::Integer { value, .. } => value.to_string(),
            NodeData::Float { value, .. } => canonical_float(*value),
            NodeData::Str { value, .. } => quote_basic(value),
            NodeData::DateTime { raw } => raw.clone(),
            NodeData::Array { coll, .. } => {
                let items: Vec<String> = coll
                    .entries
                    .iter()
                    .filter(|e| !self.node(**e).deleted)
                    .map(|e| self.canon_value(*e))
                    .collect();
                if items.is_empty() {
                    "[]".to_string()
                } else {
                    format!("[ {} ]", items.join(", "))
                }
            }
            NodeData::Table { coll, .. } => {
                let items: Vec<String> = coll
                    .entries
                    .iter()
                    .filter(|e| !self.node(**e).deleted)
                    .map(|e| {
                        let child = self.node(*e);
                        format!("{} = {}", child.raw_name, self.canon_value(*e))
                    })
                    .collect();
                if items.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {} }}", items.join(", "))
                }
            }
        }
    }
}

fn push_key(key: &[KeySegment], out: &mut String) {
    for (i, seg) in key.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.pre_ws);
        out.push_str(&seg.raw);
        out.push_str(&seg.post_ws);
    }
}

/// Split a spelled prefix key into its segments, honoring quoted and literal
/// segments. An empty prefix yields no segments.
pub(crate) fn split_spelled_key(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = key;
    while !rest.is_empty() {
        let first = rest.chars().next().unwrap();
        let (seg, remainder) = if first == '"' || first == '\'' {
            match rest[1..].find(first) {
                Some(end) => rest.split_at(end + 2),
                None => (rest, ""),
            }
        } else {
            match rest.find('.') {
                Some(end) => (&rest[..end], &rest[end..]),
                None => (rest, ""),
            }
        };
        segments.push(seg.to_string());
        rest = remainder.strip_prefix('.').unwrap_or(remainder);
        if remainder == "." {
            // Trailing dot: record the empty final segment.
            segments.push(String::new());
            break;
        }
    }
    segments
}

/// Canonical float form. Always re-parses as a float: a fractional part or
/// an exponent is guaranteed.
pub(crate) fn canonical_float(v: f64) -> String {
    if v.is_nan() {
        return if v.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mag = v.abs();
    let mut s = if v != 0.0 && !(1e-5..1e16).contains(&mag) {
        format!("{v:e}")
    } else {
        format!("{v}")
    };
    if !s.contains(['.', 'e', 'E']) {
        s.push_str(".0");
    }
    s
}

/// Canonical basic-quoted string. Control characters and non-ASCII code
/// points are escaped.
pub(crate) fn quote_basic(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c if (c as u32) > 0x7e => {
                if (c as u32) > 0xffff {
                    out.push_str(&format!("\\U{:08X}", c as u32));
                } else {
                    out.push_str(&format!("\\u{:04X}", c as u32));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Spell a decoded key name the way the canonical emitter would: bare when
/// possible, basic-quoted otherwise.
pub(crate) fn spell_key(name: &str) -> String {
    let bare_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare_ok {
        name.to_string()
    } else {
        quote_basic(name)
    }
}
