//! Edit operations on the parse tree.
//!
//! All operations validate the data-model invariants and report violations
//! as [`TomlError::InvalidOperation`]. Deletion never frees a node: the node
//! moves to its parent's recycle bin and reports `is_deleted`, so stale ids
//! held by callers stay observable.

use sdv_object::Value;

use crate::emit::{canonical_float, quote_basic, spell_key};
use crate::error::{Result, TomlError};
use crate::node::{
    Collection, Document, KeySegment, Node, NodeData, NodeId, Section, SectionKind, TableOrigin,
    Trivia,
};

impl Document {
    // --- delete -------------------------------------------------------------

    /// Delete a node: unlink it from its parent's ordered lists, move it to
    /// the recycle bin and mark the subtree deleted. The root is not
    /// deletable.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        if id == self.root() {
            return Err(TomlError::invalid("the root table cannot be deleted"));
        }
        if self.node(id).deleted {
            return Err(TomlError::invalid("node is already deleted"));
        }
        let parent = self
            .node(id)
            .parent
            .ok_or_else(|| TomlError::invalid("node has no parent"))?;

        // The next displayed sibling inherits the leading trivia when it has
        // none of its own, so deleting a line does not swallow the blank
        // line or comment block above it.
        let display_owner = self.node(id).view.unwrap_or(parent);
        if let Some(coll) = self.node(display_owner).collection() {
            let pos = coll.display.iter().position(|n| *n == id);
            if let Some(pos) = pos {
                let next = coll.display[pos + 1..]
                    .iter()
                    .copied()
                    .find(|n| !self.node(*n).deleted);
                if let Some(next) = next {
                    let pre = self.node(id).trivia.pre_node.clone();
                    let oos = self.node(id).trivia.oos_before.clone();
                    let next_node = self.node_mut(next);
                    if next_node.trivia.pre_node.is_empty() {
                        next_node.trivia.pre_node = pre;
                    }
                    if !oos.is_empty() {
                        next_node.trivia.oos_before =
                            format!("{oos}{}", next_node.trivia.oos_before);
                    }
                }
            }
        }

        self.mark_deleted(id);

        // Unlink from the containing parent and from the displaying view.
        if let Some(coll) = self.node_mut(parent).collection_mut() {
            coll.entries.retain(|n| *n != id);
            coll.display.retain(|n| *n != id);
            coll.recycle.push(id);
        }
        if display_owner != parent {
            if let Some(coll) = self.node_mut(display_owner).collection_mut() {
                coll.display.retain(|n| *n != id);
            }
        }
        Ok(())
    }

    fn mark_deleted(&mut self, id: NodeId) {
        self.node_mut(id).deleted = true;
        let children = match self.node_mut(id).collection_mut() {
            Some(coll) => {
                let children: Vec<NodeId> = coll.entries.drain(..).collect();
                coll.display.clear();
                coll.recycle.extend(children.iter().copied());
                children
            }
            None => Vec::new(),
        };
        for child in children {
            self.mark_deleted(child);
        }
    }

    // --- value and name updates ---------------------------------------------

    /// Change the value of a scalar node. The value is converted to the
    /// node's type where possible; a type change is refused.
    pub fn change_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        if self.node(id).deleted {
            return Err(TomlError::invalid("node is deleted"));
        }
        let node = self.node_mut(id);
        match (&mut node.data, value) {
            (NodeData::Boolean { value, raw }, Value::Bool(new)) => {
                *value = new;
                *raw = new.to_string();
            }
            (NodeData::Integer { value, raw }, Value::Int(new)) => {
                *value = new;
                *raw = new.to_string();
            }
            (NodeData::Float { value, raw }, Value::Float(new)) => {
                *value = new;
                *raw = canonical_float(new);
            }
            (NodeData::Float { value, raw }, Value::Int(new)) => {
                *value = new as f64;
                *raw = canonical_float(new as f64);
            }
            (NodeData::Str { value, raw, .. }, Value::Str(new)) => {
                *raw = quote_basic(&new);
                *value = new;
            }
            _ => {
                return Err(TomlError::invalid(
                    "value type does not match the node type",
                ));
            }
        }
        Ok(())
    }

    /// Rename a node. Array elements, the root and implicit dotted
    /// intermediates cannot be renamed.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        if id == self.root() {
            return Err(TomlError::invalid("the root table cannot be renamed"));
        }
        if self.node(id).deleted {
            return Err(TomlError::invalid("node is deleted"));
        }
        let parent = self
            .node(id)
            .parent
            .ok_or_else(|| TomlError::invalid("node has no parent"))?;
        if matches!(self.node(parent).data, NodeData::Array { .. }) {
            return Err(TomlError::invalid("array elements carry no key"));
        }
        match &self.node(id).data {
            NodeData::Table {
                origin: TableOrigin::DottedImplicit | TableOrigin::HeaderImplicit,
                ..
            } => {
                return Err(TomlError::invalid(
                    "implicit tables cannot be renamed; promote them first",
                ));
            }
            _ => {}
        }
        if let Some(existing) = self.child_by_name(parent, new_name) {
            if existing != id {
                return Err(TomlError::invalid(format!(
                    "key '{new_name}' already exists"
                )));
            }
        }

        let spelled = spell_key(new_name);
        {
            let node = self.node_mut(id);
            node.name = new_name.to_string();
            node.raw_name = spelled.clone();
            if let Some(last) = node.key.last_mut() {
                last.raw = spelled.clone();
            }
        }

        // Header paths of descendant sections spell this node's name too.
        let section_nodes: Vec<NodeId> = self.sections.iter().map(|s| s.node).collect();
        for section in section_nodes {
            if section == id || self.node(section).deleted {
                continue;
            }
            if let Some(pos) = self.header_chain(section).iter().position(|n| *n == id) {
                let node = self.node_mut(section);
                if let Some(seg) = node.key.get_mut(pos) {
                    seg.raw = spelled.clone();
                }
            }
        }
        Ok(())
    }

    /// Chain of nodes a section header spells, root-first. Table-array
    /// elements contribute their array.
    fn header_chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            if node_id == self.root() {
                break;
            }
            let node = self.node(node_id);
            let parent = node.parent;
            let elem_of_array = parent
                .map(|p| matches!(self.node(p).data, NodeData::Array { .. }))
                .unwrap_or(false);
            if elem_of_array {
                // The element spells its array's name.
                cur = parent;
                continue;
            }
            chain.push(node_id);
            cur = parent;
        }
        chain.reverse();
        chain
    }

    // --- insertion ----------------------------------------------------------

    /// Insert a scalar value into a table (named) or an array (name is
    /// ignored). `index` positions the node within the collection's value
    /// block; `None` appends.
    pub fn insert_value(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        name: &str,
        value: Value,
    ) -> Result<NodeId> {
        let data = match value {
            Value::Bool(v) => NodeData::Boolean {
                value: v,
                raw: v.to_string(),
            },
            Value::Int(v) => NodeData::Integer {
                value: v,
                raw: v.to_string(),
            },
            Value::Float(v) => NodeData::Float {
                value: v,
                raw: canonical_float(v),
            },
            Value::Str(v) => NodeData::Str {
                raw: quote_basic(&v),
                value: v,
                quote: crate::lexer::QuoteKind::Basic,
            },
            Value::None => {
                return Err(TomlError::invalid("cannot insert an empty value"));
            }
        };
        self.insert_node(parent, index, name, data)
    }

    /// Insert an (inline) array.
    pub fn insert_array(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.insert_node(
            parent,
            None,
            name,
            NodeData::Array {
                coll: Collection::default(),
                inline: true,
                table_array_decl: false,
                trailing_comma: false,
            },
        )
    }

    /// Insert a table. Under a table parent this creates an explicit
    /// `[header]` section; under a table-array declaration it appends an
    /// element; under an inline collection it stays inline.
    pub fn insert_table(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        #[derive(PartialEq)]
        enum ParentKind {
            TableArray,
            InlineArray,
            InlineTable,
            Table,
            Value,
        }
        let kind = match &self.node(parent).data {
            NodeData::Array {
                table_array_decl: true,
                ..
            } => ParentKind::TableArray,
            NodeData::Array { .. } => ParentKind::InlineArray,
            NodeData::Table {
                origin: TableOrigin::Inline,
                ..
            } => ParentKind::InlineTable,
            NodeData::Table { .. } => ParentKind::Table,
            _ => ParentKind::Value,
        };
        match kind {
            ParentKind::TableArray => {
                let key = self.spelled_header_path(parent);
                let element = Node {
                    name: String::new(),
                    raw_name: String::new(),
                    parent: Some(parent),
                    view: None,
                    deleted: false,
                    trivia: Trivia {
                        post_node: "\n".to_string(),
                        ..Trivia::default()
                    },
                    key,
                    data: NodeData::Table {
                        coll: Collection::default(),
                        origin: TableOrigin::Explicit,
                    },
                };
                let element_id = self.alloc(element);
                let coll = self
                    .node_mut(parent)
                    .collection_mut()
                    .expect("array parent");
                coll.entries.push(element_id);
                coll.display.push(element_id);
                self.sections.push(Section {
                    node: element_id,
                    kind: SectionKind::TableArrayElement,
                });
                Ok(element_id)
            }
            ParentKind::InlineArray => {
                // Inline array: table elements stay inline.
                self.insert_node(
                    parent,
                    None,
                    "",
                    NodeData::Table {
                        coll: Collection::default(),
                        origin: TableOrigin::Inline,
                    },
                )
            }
            ParentKind::InlineTable => self.insert_node(
                parent,
                None,
                name,
                NodeData::Table {
                    coll: Collection::default(),
                    origin: TableOrigin::Inline,
                },
            ),
            ParentKind::Table => {
                let id = self.insert_node(
                    parent,
                    None,
                    name,
                    NodeData::Table {
                        coll: Collection::default(),
                        origin: TableOrigin::Explicit,
                    },
                )?;
                let key = self.spelled_header_path(id);
                {
                    let node = self.node_mut(id);
                    node.key = key;
                    node.trivia.pre_node = "\n".to_string();
                    node.trivia.post_node = "\n".to_string();
                }
                // Inserted sections emit after everything present so far.
                self.sections.push(Section {
                    node: id,
                    kind: SectionKind::Table,
                });
                Ok(id)
            }
            ParentKind::Value => Err(TomlError::invalid("parent is not a collection")),
        }
    }

    /// Insert an (empty) array-of-tables declaration; elements are appended
    /// with [`Document::insert_table`].
    pub fn insert_table_array(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if !matches!(
            &self.node(parent).data,
            NodeData::Table { origin, .. } if *origin != TableOrigin::Inline
        ) {
            return Err(TomlError::invalid(
                "table arrays can only live in non-inline tables",
            ));
        }
        let id = self.insert_node(
            parent,
            None,
            name,
            NodeData::Array {
                coll: Collection::default(),
                inline: false,
                table_array_decl: true,
                trailing_comma: false,
            },
        )?;
        let key = self.spelled_header_path(id);
        self.node_mut(id).key = key;
        Ok(id)
    }

    fn insert_node(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        name: &str,
        data: NodeData,
    ) -> Result<NodeId> {
        if self.node(parent).deleted {
            return Err(TomlError::invalid("parent is deleted"));
        }
        let parent_is_array = match &self.node(parent).data {
            NodeData::Array { .. } => true,
            NodeData::Table { .. } => false,
            _ => return Err(TomlError::invalid("parent is not a collection")),
        };
        if !parent_is_array && self.child_by_name(parent, name).is_some() {
            return Err(TomlError::invalid(format!("key '{name}' already exists")));
        }

        // Values contained in an implicit (dotted) table are displayed by
        // the nearest section ancestor, spelled with their dotted path.
        let (display_owner, node_name, raw_name, key) = if parent_is_array {
            (parent, String::new(), String::new(), Vec::new())
        } else {
            let mut chain: Vec<NodeId> = Vec::new();
            let mut owner = parent;
            loop {
                if owner == self.root() || self.node(owner).is_section() {
                    break;
                }
                if matches!(
                    self.node(owner).data,
                    NodeData::Table {
                        origin: TableOrigin::Inline,
                        ..
                    }
                ) {
                    break;
                }
                chain.push(owner);
                match self.node(owner).parent {
                    Some(p) => owner = p,
                    None => break,
                }
            }
            chain.reverse();
            let spelled = spell_key(name);
            let mut key: Vec<KeySegment> = chain
                .iter()
                .map(|n| KeySegment::bare(spell_key(&self.node(*n).name)))
                .collect();
            // Emission composes `key` + `=` + `pre_value` + value; inserted
            // nodes carry canonical single-space spacing.
            key.push(KeySegment {
                raw: spelled.clone(),
                pre_ws: String::new(),
                post_ws: " ".to_string(),
            });
            (owner, name.to_string(), spelled, key)
        };
        let is_value_position = !matches!(
            data,
            NodeData::Table {
                origin: TableOrigin::Explicit,
                ..
            } | NodeData::Array {
                table_array_decl: true,
                ..
            }
        );

        let node = Node {
            name: node_name,
            raw_name,
            parent: Some(parent),
            view: Some(display_owner),
            deleted: false,
            trivia: Trivia {
                pre_node: if parent_is_array {
                    " ".to_string()
                } else {
                    String::new()
                },
                pre_value: if parent_is_array {
                    String::new()
                } else {
                    " ".to_string()
                },
                post_node: if parent_is_array || !is_value_position {
                    String::new()
                } else {
                    "\n".to_string()
                },
                ..Trivia::default()
            },
            key,
            data,
        };
        let node_id = self.alloc(node);

        // The display list holds only live value-position nodes, so the
        // requested index maps onto it directly; the entries position is
        // taken from the displayed anchor the node is inserted before.
        let (display_pos, entry_pos) = {
            let owner_coll = self
                .node(display_owner)
                .collection()
                .expect("owner collection");
            let display_pos = if display_owner == parent {
                index
                    .unwrap_or(owner_coll.display.len())
                    .min(owner_coll.display.len())
            } else {
                owner_coll.display.len()
            };
            let parent_coll = self.node(parent).collection().expect("parent collection");
            let entry_pos = match owner_coll.display.get(display_pos) {
                Some(anchor) if display_owner == parent => parent_coll
                    .entries
                    .iter()
                    .position(|n| n == anchor)
                    .unwrap_or(parent_coll.entries.len()),
                _ => parent_coll.entries.len(),
            };
            (display_pos, entry_pos)
        };

        self.node_mut(parent)
            .collection_mut()
            .expect("parent collection")
            .entries
            .insert(entry_pos, node_id);
        if is_value_position {
            // Sections are emitted through the section list, not the
            // display list.
            self.node_mut(display_owner)
                .collection_mut()
                .expect("owner collection")
                .display
                .insert(display_pos, node_id);
        }
        Ok(node_id)
    }

    /// Spelled header path of a node: chain of ancestor names, root-first.
    fn spelled_header_path(&self, id: NodeId) -> Vec<KeySegment> {
        self.header_chain(id)
            .iter()
            .map(|n| KeySegment::bare(spell_key(&self.node(*n).name)))
            .collect()
    }

    // --- reordering ---------------------------------------------------------

    /// Move the node one position towards the front of its collection.
    pub fn move_up(&mut self, id: NodeId) -> Result<()> {
        self.shift(id, -1)
    }

    /// Move the node one position towards the back of its collection.
    pub fn move_down(&mut self, id: NodeId) -> Result<()> {
        self.shift(id, 1)
    }

    fn shift(&mut self, id: NodeId, dir: isize) -> Result<()> {
        if self.node(id).deleted {
            return Err(TomlError::invalid("node is deleted"));
        }
        let parent = self
            .node(id)
            .parent
            .ok_or_else(|| TomlError::invalid("the root table cannot be moved"))?;

        let neighbor = {
            let coll = self
                .node(parent)
                .collection()
                .ok_or_else(|| TomlError::invalid("parent is not a collection"))?;
            let live: Vec<NodeId> = coll
                .entries
                .iter()
                .copied()
                .filter(|n| !self.node(*n).deleted)
                .collect();
            let pos = live
                .iter()
                .position(|n| *n == id)
                .ok_or_else(|| TomlError::invalid("node is not part of its parent"))?;
            let target = pos as isize + dir;
            if target < 0 || target as usize >= live.len() {
                return Err(TomlError::invalid("node is already at the boundary"));
            }
            live[target as usize]
        };

        // Values stay in front of sections.
        let self_section = self.node(id).is_section();
        let neighbor_section = self.node(neighbor).is_section();
        if self_section != neighbor_section {
            return Err(TomlError::invalid(
                "values cannot be moved across tables or table arrays",
            ));
        }

        let coll = self
            .node_mut(parent)
            .collection_mut()
            .expect("parent collection");
        let a = coll.entries.iter().position(|n| *n == id).unwrap();
        let b = coll.entries.iter().position(|n| *n == neighbor).unwrap();
        coll.entries.swap(a, b);
        if let (Some(da), Some(db)) = (
            coll.display.iter().position(|n| *n == id),
            coll.display.iter().position(|n| *n == neighbor),
        ) {
            coll.display.swap(da, db);
        }

        // Section order follows for header nodes.
        if self_section {
            let sa = self.sections.iter().position(|s| s.node == id);
            let sb = self.sections.iter().position(|s| s.node == neighbor);
            if let (Some(sa), Some(sb)) = (sa, sb) {
                self.sections.swap(sa, sb);
            }
        }
        Ok(())
    }
}
