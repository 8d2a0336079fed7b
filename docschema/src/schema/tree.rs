use bson::oid::ObjectId;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Maximum number of object-identifier samples kept per field.
pub const MAX_ID_SAMPLES: usize = 4;

pub const OBJECT_TYPE: &str = "object";
pub const ARRAY_TYPE: &str = "array";
pub const INDEXED_ARRAY_TYPE: &str = "array of integer";
pub const ENUM_TYPE: &str = "enum";
pub const DBREF_TYPE: &str = "dbref";

/// Position of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Leaf. Opaque arrays are fields typed `array`.
    Field,
    /// Nested document; children are its fields.
    Object,
    /// Array whose children form the shared schema of its elements.
    Array,
}

impl NodeKind {
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Object | NodeKind::Array)
    }
}

/// Where a typed reference value points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceTarget {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    /// Dotted path from the collection root; empty for the root itself.
    pub path: String,
    pub kind: NodeKind,
    pub type_name: String,
    pub mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(skip)]
    pub parent: Option<NodeId>,
    #[serde(skip)]
    pub children: Vec<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub id_samples: Vec<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceTarget>,
    /// Containers only: no document has been folded in yet.
    #[serde(skip)]
    pub first_document: bool,
}

impl Node {
    fn new(name: &str, path: String, kind: NodeKind, type_name: &str, mandatory: bool) -> Self {
        Node {
            name: name.to_string(),
            path,
            kind,
            type_name: type_name.to_string(),
            mandatory,
            description: None,
            options: None,
            parent: None,
            children: Vec::new(),
            id_samples: Vec::new(),
            reference: None,
            first_document: true,
        }
    }

    /// Record an object-identifier sample, keeping at most `MAX_ID_SAMPLES`.
    pub fn push_id_sample(&mut self, id: ObjectId) {
        if self.id_samples.len() < MAX_ID_SAMPLES && !self.id_samples.contains(&id) {
            self.id_samples.push(id);
        }
    }
}

/// One collection's schema: an arena of nodes rooted at an object node.
///
/// Parents own their children through `children`; each node keeps its
/// parent's id, never a handle.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaTree {
    nodes: Vec<Node>,
    #[serde(skip)]
    by_path: HashMap<String, NodeId>,
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaTree {
    pub fn new() -> Self {
        let root = Node::new("", String::new(), NodeKind::Object, OBJECT_TYPE, true);
        SchemaTree {
            nodes: vec![root],
            by_path: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Number of discovered fields, root excluded.
    pub fn field_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.node(id)
            .children
            .iter()
            .map(move |child| (*child, self.node(*child)))
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }

    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return Some(NodeId::ROOT);
        }
        self.by_path.get(path).copied()
    }

    /// Return the child named `name`, creating it when absent.
    ///
    /// An existing child is returned untouched whatever its kind: the first
    /// observation of a name fixes the node's identity and type.
    pub fn get_or_create_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        type_name: &str,
        mandatory: bool,
    ) -> (NodeId, bool) {
        if let Some(existing) = self.child(parent, name) {
            return (existing, false);
        }

        let parent_path = &self.node(parent).path;
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}.{name}")
        };

        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(name, path.clone(), kind, type_name, mandatory);
        node.parent = Some(parent);
        self.nodes.push(node);
        self.node_mut(parent).children.push(id);
        // a literal dotted key and a nested field can share a path
        match self.by_path.entry(path) {
            Entry::Occupied(entry) => log::debug!(
                "Path '{}' already names another field, lookups keep the first",
                entry.key()
            ),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        (id, true)
    }

    /// All nodes except the root, depth-first in child order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.field_count());
        let mut stack: Vec<NodeId> = self.node(NodeId::ROOT).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        out
    }

    /// Nested, serializable view of the tree below `id`.
    pub fn view(&self, id: NodeId) -> FieldView {
        let node = self.node(id);
        FieldView {
            name: node.name.clone(),
            path: node.path.clone(),
            kind: node.kind,
            type_name: node.type_name.clone(),
            mandatory: node.mandatory,
            description: node.description.clone(),
            options: node.options.clone(),
            reference: node.reference.clone(),
            fields: node.children.iter().map(|child| self.view(*child)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    #[serde(rename = "type")]
    pub type_name: String,
    pub mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceTarget>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldView>,
}
