//! The in-memory device tree.
//!
//! Nodes live in an arena owned by the [`Tree`]; parents, children and the
//! label table all refer to them through stable [`NodeId`] indices, so parent
//! traversal and label lookup are O(1) without reference cycles. A deleted
//! node is unlinked from its parent and its subtree's labels are dropped from
//! the table; the arena slot itself is simply abandoned, which is fine for a
//! short-lived tool.

use std::cmp::Ordering;

use indexmap::{IndexMap, IndexSet};

use crate::error::{DtsError, Result};
use crate::value;

/// Stable handle to a node in a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One term of a `<...>` cell vector, kept as its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Num(String),
    Ref(String),
}

/// One comma-separated part of a property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A quoted string (body only, escapes verbatim).
    Str(String),
    /// A whole-value `&label` reference.
    Ref(String),
    /// A `<...>` vector; `size` is the element width in bytes.
    Cells { size: usize, items: Vec<Cell> },
    /// A `[...]` vector of hex byte tokens.
    Bytes(Vec<String>),
}

impl Chunk {
    /// A default-width (32-bit) cell vector.
    pub fn cells(items: Vec<Cell>) -> Self {
        Chunk::Cells { size: 4, items }
    }

    /// Byte length of this chunk within the property value, used to locate
    /// override offsets.
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            Chunk::Str(s) => s.len() + 1,
            Chunk::Ref(_) => 4,
            Chunk::Cells { size, items } => size * items.len(),
            Chunk::Bytes(items) => items.iter().map(|b| b.len() / 2).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub props: Vec<Property>,
    pub labels: Vec<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    depth: usize,
}

impl Node {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    /// True iff `/plugin/;` appeared in the header.
    pub plugin: bool,
    labels: IndexMap<String, NodeId>,
    /// Include directives in first-seen order, with their delimiters.
    pub includes: IndexSet<String>,
    /// `/memreserve/` start/length literal pairs.
    pub memreserves: IndexSet<(String, String)>,
    /// Number of fragments at the root, set by renumbering.
    pub frag_count: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: vec![Node {
                name: "/".to_string(),
                props: Vec::new(),
                labels: Vec::new(),
                children: Vec::new(),
                parent: None,
                depth: 0,
            }],
            root: NodeId(0),
            plugin: false,
            labels: IndexMap::new(),
            includes: IndexSet::new(),
            memreserves: IndexSet::new(),
            frag_count: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let depth = self.nodes[parent.0].depth + 1;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            props: Vec::new(),
            labels: Vec::new(),
            children: Vec::new(),
            parent: Some(parent),
            depth,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Look up a child by name. An exact match wins; a name without a unit
    /// address also matches a child named `name@<anything>`.
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let children = &self.nodes[parent.0].children;
        if let Some(&id) = children.iter().find(|&&id| self.nodes[id.0].name == name) {
            return Some(id);
        }
        if name.contains('@') {
            return None;
        }
        children.iter().copied().find(|&id| {
            let child = &self.nodes[id.0].name;
            child
                .split_once('@')
                .is_some_and(|(base, _)| base == name)
        })
    }

    pub fn child_or_add(&mut self, parent: NodeId, name: &str) -> NodeId {
        match self.child(parent, name) {
            Some(id) => id,
            None => self.add_child(parent, name),
        }
    }

    /// Remove a node and its whole subtree, dropping every label the subtree
    /// holds from the label table.
    pub fn delete_node(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for label in &self.nodes[current.0].labels {
                self.labels.shift_remove(label);
            }
            stack.extend(self.nodes[current.0].children.iter().copied());
        }
        self.detach(id);
    }

    /// Unlink a node from its parent without touching labels. The node stays
    /// alive in the arena and can be re-attached.
    pub(crate) fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
        self.nodes[id.0].parent = None;
    }

    pub(crate) fn attach(&mut self, parent: NodeId, id: NodeId) {
        self.nodes[parent.0].children.push(id);
        self.nodes[id.0].parent = Some(parent);
        let depth = self.nodes[parent.0].depth + 1;
        self.fix_depth(id, depth);
    }

    fn fix_depth(&mut self, id: NodeId, depth: usize) {
        self.nodes[id.0].depth = depth;
        let children = self.nodes[id.0].children.clone();
        for child in children {
            self.fix_depth(child, depth + 1);
        }
    }

    pub fn find_label(&self, label: &str) -> Option<NodeId> {
        self.labels.get(label).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.labels.iter().map(|(name, &id)| (name.as_str(), id))
    }

    /// Attach a label to a node. A label already naming a *different* node is
    /// fatal; repeating it on the same node is only worth a warning.
    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<()> {
        match self.labels.get(label) {
            Some(&existing) if existing != id => Err(DtsError::DuplicateLabel(label.to_string())),
            Some(_) => {
                log::warn!("label `{label}` repeated on the same node");
                Ok(())
            }
            None => {
                self.labels.insert(label.to_string(), id);
                let node = &mut self.nodes[id.0];
                node.labels.push(label.to_string());
                if node.labels.len() > 1 {
                    log::warn!("node `{}` has multiple labels", node.name);
                }
                Ok(())
            }
        }
    }

    pub(crate) fn rename_label(&mut self, old: &str, new: &str) {
        if let Some((_, id)) = self.labels.shift_remove_entry(old) {
            self.labels.insert(new.to_string(), id);
            for label in &mut self.nodes[id.0].labels {
                if label == old {
                    *label = new.to_string();
                }
            }
        }
    }

    pub fn property(&self, id: NodeId, name: &str) -> Option<&Property> {
        self.nodes[id.0].props.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, id: NodeId, name: &str) -> Option<&mut Property> {
        self.nodes[id.0].props.iter_mut().find(|p| p.name == name)
    }

    /// The property write rule. An existing property is replaced, except that
    /// `status` values are coerced to `"okay"`/`"disabled"` and `bootargs`
    /// strings accumulate separated by spaces.
    pub fn set_property(&mut self, id: NodeId, name: &str, mut chunks: Vec<Chunk>) -> Result<()> {
        if name == "status" {
            if let Some(Chunk::Str(s)) = chunks.first_mut() {
                let enabled = value::boolean_value(Some(s.as_str()))?;
                *s = if enabled { "okay" } else { "disabled" }.to_string();
            }
        }
        let node = &mut self.nodes[id.0];
        if let Some(prop) = node.props.iter_mut().find(|p| p.name == name) {
            if name == "bootargs" {
                if let (Some(Chunk::Str(old)), Some(Chunk::Str(new))) =
                    (prop.chunks.first(), chunks.first())
                {
                    let joined = format!("{old} {new}");
                    prop.chunks = vec![Chunk::Str(joined)];
                    return Ok(());
                }
            }
            prop.chunks = chunks;
        } else {
            node.props.push(Property {
                name: name.to_string(),
                chunks,
            });
        }
        Ok(())
    }

    pub fn delete_property(&mut self, id: NodeId, name: &str) -> bool {
        let props = &mut self.nodes[id.0].props;
        let before = props.len();
        props.retain(|p| p.name != name);
        props.len() != before
    }

    /// Replace the `@unit-address` suffix of a node's name (adding one if the
    /// name had none).
    pub fn set_unit_address(&mut self, id: NodeId, address: u64) {
        let node = &mut self.nodes[id.0];
        let base = match node.name.split_once('@') {
            Some((base, _)) => base.to_string(),
            None => node.name.clone(),
        };
        node.name = format!("{base}@{address:x}");
    }

    /// Resolve a path to a node. Absolute paths walk from the root; a path
    /// with no leading `/` routes its first component through `/aliases`,
    /// which may hold either a `&label` or an absolute path string.
    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        if let Some(rest) = path.strip_prefix('/') {
            return self.walk_path(self.root, rest);
        }
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        let aliases = self.child(self.root, "aliases")?;
        let alias = self.property(aliases, head)?;
        let target = match alias.chunks.first()? {
            Chunk::Ref(label) => self.find_label(label)?,
            Chunk::Str(path) => self.resolve_path(path)?,
            Chunk::Cells { items, .. } => match items.first()? {
                Cell::Ref(label) => self.find_label(label)?,
                Cell::Num(_) => return None,
            },
            Chunk::Bytes(_) => return None,
        };
        self.walk_path(target, rest)
    }

    fn walk_path(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let mut current = from;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.child(current, component)?;
        }
        Some(current)
    }

    /// All nodes reachable from the root, preorder.
    pub fn nodes_preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &child in self.nodes[id.0].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Deep-copy a subtree of `other` under `parent`, bringing its labels
    /// into this tree's table.
    pub fn adopt(&mut self, parent: NodeId, other: &Tree, source: NodeId) -> Result<NodeId> {
        let src = other.node(source);
        let id = self.add_child(parent, &src.name);
        self.nodes[id.0].props = src.props.clone();
        for label in &src.labels {
            self.add_label(id, label)?;
        }
        for &child in src.children.iter() {
            self.adopt(id, other, child)?;
        }
        Ok(id)
    }
}

/// Trees compare structurally: same shape, names, labels and values,
/// regardless of how the arenas are laid out.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.plugin == other.plugin
            && self.includes == other.includes
            && self.memreserves == other.memreserves
            && node_eq(self, self.root, other, other.root)
    }
}

fn node_eq(a: &Tree, an: NodeId, b: &Tree, bn: NodeId) -> bool {
    let (x, y) = (a.node(an), b.node(bn));
    x.name == y.name
        && x.props == y.props
        && x.labels == y.labels
        && x.children.len() == y.children.len()
        && x.children
            .iter()
            .zip(y.children.iter())
            .all(|(&c, &d)| node_eq(a, c, b, d))
}

/// Sibling order for sorted emission: numeric by unit address, nodes with an
/// address before those without, the rest by name.
pub(crate) fn address_order(a: &str, b: &str) -> Ordering {
    let address = |name: &str| {
        name.split_once('@')
            .and_then(|(_, addr)| u64::from_str_radix(addr, 16).ok())
    };
    match (address(a), address(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_depth_are_maintained() {
        let mut tree = Tree::new();
        let soc = tree.add_child(tree.root(), "soc");
        let uart = tree.add_child(soc, "uart@fe001000");
        assert_eq!(tree.node(soc).parent(), Some(tree.root()));
        assert_eq!(tree.node(uart).parent(), Some(soc));
        assert_eq!(tree.node(tree.root()).depth(), 0);
        assert_eq!(tree.node(soc).depth(), 1);
        assert_eq!(tree.node(uart).depth(), 2);
    }

    #[test]
    fn unit_address_tolerant_lookup() {
        let mut tree = Tree::new();
        let soc = tree.add_child(tree.root(), "soc");
        let uart = tree.add_child(soc, "uart@fe001000");
        assert_eq!(tree.child(soc, "uart@fe001000"), Some(uart));
        assert_eq!(tree.child(soc, "uart"), Some(uart));
        assert_eq!(tree.child(soc, "uart@0"), None);
    }

    #[test]
    fn delete_drops_subtree_labels() {
        let mut tree = Tree::new();
        let soc = tree.add_child(tree.root(), "soc");
        let uart = tree.add_child(soc, "uart");
        tree.add_label(soc, "soc").unwrap();
        tree.add_label(uart, "uart0").unwrap();
        tree.delete_node(soc);
        assert_eq!(tree.find_label("soc"), None);
        assert_eq!(tree.find_label("uart0"), None);
        assert!(tree.node(tree.root()).children().is_empty());
    }

    #[test]
    fn duplicate_label_on_distinct_nodes_fails() {
        let mut tree = Tree::new();
        let a = tree.add_child(tree.root(), "a");
        let b = tree.add_child(tree.root(), "b");
        tree.add_label(a, "x").unwrap();
        assert!(tree.add_label(a, "x").is_ok());
        assert!(matches!(
            tree.add_label(b, "x"),
            Err(DtsError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn status_and_bootargs_write_rules() {
        let mut tree = Tree::new();
        let node = tree.add_child(tree.root(), "uart");
        tree.set_property(node, "status", vec![Chunk::Str("on".into())])
            .unwrap();
        assert_eq!(
            tree.property(node, "status").unwrap().chunks,
            vec![Chunk::Str("okay".into())]
        );
        tree.set_property(node, "status", vec![Chunk::Str("n".into())])
            .unwrap();
        assert_eq!(
            tree.property(node, "status").unwrap().chunks,
            vec![Chunk::Str("disabled".into())]
        );

        tree.set_property(node, "bootargs", vec![Chunk::Str("a=0".into())])
            .unwrap();
        tree.set_property(node, "bootargs", vec![Chunk::Str("b=1".into())])
            .unwrap();
        assert_eq!(
            tree.property(node, "bootargs").unwrap().chunks,
            vec![Chunk::Str("a=0 b=1".into())]
        );
    }

    #[test]
    fn alias_paths_resolve() {
        let mut tree = Tree::new();
        let aliases = tree.add_child(tree.root(), "aliases");
        let soc = tree.add_child(tree.root(), "soc");
        let i2c = tree.add_child(soc, "i2c@7e804000");
        tree.add_label(i2c, "i2c1").unwrap();
        tree.set_property(aliases, "i2c1", vec![Chunk::Ref("i2c1".into())])
            .unwrap();
        tree.set_property(aliases, "spi", vec![Chunk::Str("/soc".into())])
            .unwrap();

        assert_eq!(tree.resolve_path("/soc/i2c@7e804000"), Some(i2c));
        assert_eq!(tree.resolve_path("/soc/i2c"), Some(i2c));
        assert_eq!(tree.resolve_path("i2c1"), Some(i2c));
        assert_eq!(tree.resolve_path("spi/i2c"), Some(i2c));
        assert_eq!(tree.resolve_path("/nope"), None);
    }

    #[test]
    fn unit_address_rewrite() {
        let mut tree = Tree::new();
        let node = tree.add_child(tree.root(), "sensor@48");
        tree.set_unit_address(node, 0x49);
        assert_eq!(tree.node(node).name, "sensor@49");
        let bare = tree.add_child(tree.root(), "probe");
        tree.set_unit_address(bare, 0x1a);
        assert_eq!(tree.node(bare).name, "probe@1a");
    }

    #[test]
    fn address_ordering() {
        assert_eq!(address_order("a@2", "a@10"), Ordering::Less);
        assert_eq!(address_order("b@1", "a"), Ordering::Less);
        assert_eq!(address_order("a", "b@1"), Ordering::Greater);
        assert_eq!(address_order("alpha", "beta"), Ordering::Less);
    }
}
