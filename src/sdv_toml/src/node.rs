//! Arena-backed parse tree.
//!
//! Nodes live in one vector owned by the [`Document`]; parent and view links
//! are indices, never owning references, so dropping the document frees the
//! whole tree at once. Deleting a node unlinks it from its parent's ordered
//! lists and moves it to the recycle bin; the arena keeps it alive so stale
//! [`NodeId`]s observe a defined deleted state instead of a dangling read.
//!
//! Every node keeps the lexical surroundings it was parsed with: leading and
//! trailing trivia, out-of-scope comment blocks, the spelled key path with
//! per-segment whitespace, and the raw value text. The emitters in
//! [`crate::emit`] reproduce them.

use sdv_object::Value;

use crate::lexer::QuoteKind;

/// Index of a node inside its document. Ids stay valid for the lifetime of
/// the document, including for deleted nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

/// Discriminant exposed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Boolean,
    Integer,
    Float,
    Str,
    DateTime,
    Array,
    Table,
}

/// One segment of a spelled key path, with the whitespace that surrounded it.
#[derive(Debug, Clone, Default)]
pub struct KeySegment {
    /// Raw spelling including quotes.
    pub raw: String,
    /// Whitespace before the segment (after `[`, a dot, or nothing).
    pub pre_ws: String,
    /// Whitespace after the segment (before a dot, `]` or `=`).
    pub post_ws: String,
}

impl KeySegment {
    pub fn bare(raw: impl Into<String>) -> Self {
        KeySegment {
            raw: raw.into(),
            pre_ws: String::new(),
            post_ws: String::new(),
        }
    }
}

/// Lexical surroundings of a node.
#[derive(Debug, Clone, Default)]
pub struct Trivia {
    /// Whitespace and attached comment lines directly before the node.
    pub pre_node: String,
    /// Tail whitespace, tail comment and the line end after the node.
    pub post_node: String,
    /// Comment blocks before the node separated from it by blank lines.
    pub oos_before: String,
    /// Whitespace between `=` and the value.
    pub pre_value: String,
    /// Inside collections: trivia between the last element and the closing
    /// bracket.
    pub post_items: String,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Direct children in insertion order.
    pub entries: Vec<NodeId>,
    /// Nodes displayed under this collection at emission. Holds dotted
    /// grandchildren as well, which is how `[a]` + `b.c = 1` keeps `c`
    /// contained in `a.b` but displayed under the `[a]` header.
    pub display: Vec<NodeId>,
    /// Deleted children; kept alive for outstanding ids.
    pub recycle: Vec<NodeId>,
}

/// Origin of a table, deciding later promotion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOrigin {
    /// Introduced by its own `[header]` (or as a table-array element).
    Explicit,
    /// Intermediate segment of a `[header]` path; may be promoted to
    /// explicit exactly once.
    HeaderImplicit,
    /// Intermediate segment of a dotted assignment; never promotable.
    DottedImplicit,
    /// Written as `{...}`; closed to any later extension.
    Inline,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Boolean {
        value: bool,
        raw: String,
    },
    Integer {
        value: i64,
        raw: String,
    },
    Float {
        value: f64,
        raw: String,
    },
    Str {
        value: String,
        raw: String,
        quote: QuoteKind,
    },
    DateTime {
        raw: String,
    },
    Table {
        coll: Collection,
        origin: TableOrigin,
    },
    Array {
        coll: Collection,
        inline: bool,
        /// Introduced through `[[header]]` lines.
        table_array_decl: bool,
        trailing_comma: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Decoded key name; empty for array elements and the root.
    pub name: String,
    /// Raw spelling of the final key segment.
    pub raw_name: String,
    pub parent: Option<NodeId>,
    /// Collection that displays the node at emission when it differs from
    /// the parent that contains it.
    pub view: Option<NodeId>,
    pub deleted: bool,
    pub trivia: Trivia,
    /// The key path as spelled in the source, relative to the view (for
    /// values) or the root (for section headers).
    pub key: Vec<KeySegment>,
    pub data: NodeData,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match &self.data {
            NodeData::Boolean { .. } => NodeType::Boolean,
            NodeData::Integer { .. } => NodeType::Integer,
            NodeData::Float { .. } => NodeType::Float,
            NodeData::Str { .. } => NodeType::Str,
            NodeData::DateTime { .. } => NodeType::DateTime,
            NodeData::Table { .. } => NodeType::Table,
            NodeData::Array { .. } => NodeType::Array,
        }
    }

    pub fn collection(&self) -> Option<&Collection> {
        match &self.data {
            NodeData::Table { coll, .. } | NodeData::Array { coll, .. } => Some(coll),
            _ => None,
        }
    }

    pub fn collection_mut(&mut self) -> Option<&mut Collection> {
        match &mut self.data {
            NodeData::Table { coll, .. } | NodeData::Array { coll, .. } => Some(coll),
            _ => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        match &self.data {
            NodeData::Table { origin, .. } => *origin == TableOrigin::Inline,
            NodeData::Array { inline, .. } => *inline,
            _ => true,
        }
    }

    /// Explicit tables and table-array declarations form their own emitted
    /// sections; everything else emits in value position.
    pub fn is_section(&self) -> bool {
        match &self.data {
            NodeData::Table { origin, .. } => *origin == TableOrigin::Explicit,
            NodeData::Array {
                table_array_decl, ..
            } => *table_array_decl,
            _ => false,
        }
    }
}

/// Kind of emitted section a header node opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Root,
    /// `[path]`
    Table,
    /// `[[path]]`, one section per appended element.
    TableArrayElement,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub node: NodeId,
    pub kind: SectionKind,
}

/// A parsed TOML document: the node arena, the root table and the ordered
/// list of emitted sections.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) sections: Vec<Section>,
    /// Trivia after the last node in the file.
    pub(crate) trailing: String,
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

impl Document {
    /// An empty document holding only the root table.
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            raw_name: String::new(),
            parent: None,
            view: None,
            deleted: false,
            trivia: Trivia::default(),
            key: Vec::new(),
            data: NodeData::Table {
                coll: Collection::default(),
                origin: TableOrigin::Explicit,
            },
        };
        Document {
            nodes: vec![root],
            root: NodeId(0),
            sections: vec![Section {
                node: NodeId(0),
                kind: SectionKind::Root,
            }],
            trailing: String::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    // --- read access --------------------------------------------------------

    pub fn node_type(&self, id: NodeId) -> NodeType {
        self.node(id).node_type()
    }

    /// Decoded key name; empty for the root and for array elements.
    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.node(id).deleted
    }

    /// Scalar value of the node. Collections, date-times and deleted nodes
    /// yield [`Value::None`].
    pub fn value(&self, id: NodeId) -> Value {
        let node = self.node(id);
        if node.deleted {
            return Value::None;
        }
        match &node.data {
            NodeData::Boolean { value, .. } => Value::Bool(*value),
            NodeData::Integer { value, .. } => Value::Int(*value),
            NodeData::Float { value, .. } => Value::Float(*value),
            NodeData::Str { value, .. } => Value::Str(value.clone()),
            _ => Value::None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Number of live children of a collection node.
    pub fn count(&self, id: NodeId) -> usize {
        self.node(id)
            .collection()
            .map(|c| {
                c.entries
                    .iter()
                    .filter(|child| !self.node(**child).deleted)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Live child of a collection by position.
    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        let coll = self.node(id).collection()?;
        coll.entries
            .iter()
            .filter(|child| !self.node(**child).deleted)
            .nth(index)
            .copied()
    }

    /// Live child of a table by decoded name.
    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let coll = self.node(id).collection()?;
        coll.entries
            .iter()
            .copied()
            .find(|child| !self.node(*child).deleted && self.node(*child).name == name)
    }

    /// Position of a node within its parent's live children, or `None` for
    /// the root and deleted nodes.
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id).parent?;
        if self.node(id).deleted {
            return None;
        }
        self.node(parent)
            .collection()?
            .entries
            .iter()
            .filter(|child| !self.node(**child).deleted)
            .position(|child| child == &id)
    }

    /// Key path of the node. With `resolve_arrays`, array elements appear as
    /// `name[index]`; without, the element index is omitted.
    pub fn path(&self, id: NodeId, resolve_arrays: bool) -> String {
        let mut segments: Vec<String> = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            if node_id == self.root {
                break;
            }
            let node = self.node(node_id);
            let parent = node.parent;
            let elem_of_array = parent
                .map(|p| matches!(self.node(p).data, NodeData::Array { .. }))
                .unwrap_or(false);
            if elem_of_array {
                // The element borrows its array's name; the index is the
                // position within the array.
                if resolve_arrays {
                    if let (Some(p), Some(idx)) = (parent, self.index_in_parent(node_id)) {
                        segments.push(format!("{}[{}]", self.node(p).name, idx));
                    }
                } else if let Some(p) = parent {
                    segments.push(self.node(p).name.clone());
                }
                // Skip the array node itself; its name was consumed here.
                cur = parent.and_then(|p| self.node(p).parent);
                continue;
            }
            segments.push(node.name.clone());
            cur = parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Structural equality: names, types, values and live child order;
    /// trivia and raw spellings are ignored.
    pub fn structural_eq(&self, other: &Document) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }

    /// Structural equality of two subtrees, ignoring the subtree root names.
    pub fn structural_eq_at(&self, id: NodeId, other: &Document, other_id: NodeId) -> bool {
        let children_a: Vec<NodeId> = (0..self.count(id)).filter_map(|i| self.child(id, i)).collect();
        let children_b: Vec<NodeId> = (0..other.count(other_id))
            .filter_map(|i| other.child(other_id, i))
            .collect();
        children_a.len() == children_b.len()
            && children_a
                .iter()
                .zip(children_b.iter())
                .all(|(a, b)| self.subtree_eq(*a, other, *b))
    }

    fn subtree_eq(&self, a: NodeId, other: &Document, b: NodeId) -> bool {
        let na = self.node(a);
        let nb = other.node(b);
        if na.name != nb.name || na.node_type() != nb.node_type() {
            return false;
        }
        match (&na.data, &nb.data) {
            (NodeData::Table { .. }, NodeData::Table { .. })
            | (NodeData::Array { .. }, NodeData::Array { .. }) => {
                let children_a: Vec<NodeId> = (0..self.count(a))
                    .filter_map(|i| self.child(a, i))
                    .collect();
                let children_b: Vec<NodeId> = (0..other.count(b))
                    .filter_map(|i| other.child(b, i))
                    .collect();
                children_a.len() == children_b.len()
                    && children_a
                        .iter()
                        .zip(children_b.iter())
                        .all(|(ca, cb)| self.subtree_eq(*ca, other, *cb))
            }
            (NodeData::DateTime { raw: ra }, NodeData::DateTime { raw: rb }) => ra == rb,
            _ => self.value(a) == other.value(b),
        }
    }
}
