//! Direct access paths for programmatic navigation.
//!
//! Distinct from TOML's own dotted-key syntax: segments are separated by
//! `.`, array elements are addressed as `array[i]` or `array.i`, and an
//! empty index (or an empty segment on an array) addresses the last
//! element. Paths can be chained: `table.array[2][1].subtable.element`.

use crate::node::{Document, NodeData, NodeId};

#[derive(Debug)]
struct PathSegment {
    name: String,
    /// `None` means "last element".
    indices: Vec<Option<usize>>,
}

fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut rest = path;
    loop {
        let mut name = String::new();
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            let end = rest[1..].find(quote)?;
            name = rest[1..1 + end].to_string();
            rest = &rest[end + 2..];
        } else {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            name.push_str(&rest[..end]);
            rest = &rest[end..];
        }
        let mut indices = Vec::new();
        while let Some(tail) = rest.strip_prefix('[') {
            let close = tail.find(']')?;
            let body = &tail[..close];
            if body.is_empty() {
                indices.push(None);
            } else {
                indices.push(Some(body.parse().ok()?));
            }
            rest = &tail[close + 1..];
        }
        segments.push(PathSegment { name, indices });
        if rest.is_empty() {
            return Some(segments);
        }
        rest = rest.strip_prefix('.')?;
        if rest.is_empty() {
            // Trailing dot: empty final segment (last element of an array).
            segments.push(PathSegment {
                name: String::new(),
                indices: Vec::new(),
            });
            return Some(segments);
        }
    }
}

impl Document {
    /// Navigate from the root. Returns `None` when any step misses.
    pub fn get(&self, path: &str) -> Option<NodeId> {
        self.direct(self.root(), path)
    }

    /// Navigate from an arbitrary node.
    pub fn direct(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let segments = parse_path(path)?;
        let mut cur = from;
        for segment in &segments {
            if self.node(cur).deleted {
                return None;
            }
            if !segment.name.is_empty() || segment.indices.is_empty() {
                cur = self.step_name(cur, &segment.name)?;
            }
            for index in &segment.indices {
                cur = self.step_index(cur, *index)?;
            }
        }
        if self.node(cur).deleted {
            None
        } else {
            Some(cur)
        }
    }

    fn step_name(&self, cur: NodeId, name: &str) -> Option<NodeId> {
        match &self.node(cur).data {
            NodeData::Table { .. } => self.child_by_name(cur, name),
            NodeData::Array { .. } => {
                // On an array, a numeric segment is an index and an empty
                // segment means the last element.
                if name.is_empty() {
                    self.last_live_child(cur)
                } else {
                    self.child(cur, name.parse().ok()?)
                }
            }
            _ => None,
        }
    }

    fn step_index(&self, cur: NodeId, index: Option<usize>) -> Option<NodeId> {
        if !matches!(self.node(cur).data, NodeData::Array { .. }) {
            return None;
        }
        match index {
            Some(i) => self.child(cur, i),
            None => self.last_live_child(cur),
        }
    }

    fn last_live_child(&self, cur: NodeId) -> Option<NodeId> {
        let coll = self.node(cur).collection()?;
        coll.entries
            .iter()
            .copied()
            .filter(|e| !self.node(*e).deleted)
            .last()
    }
}
