//! The aggregate API model of one extraction run.

use serde::Serialize;
use std::collections::HashMap;

use crate::node::{ApiNode, ApiNodeKind, NodeId};

/// Ordered database of API nodes.
///
/// Nodes live in an arena in first-encountered order and are linked into a tree that
/// mirrors the declared nesting. The database is read-only once built; the only writer
/// is [`DatabaseBuilder`](crate::DatabaseBuilder).
///
/// Serializing the database yields the arena and the top-level order only, so two runs
/// over the same input produce identical output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassesDatabase {
    pub(crate) nodes: Vec<ApiNode>,
    pub(crate) roots: Vec<NodeId>,

    #[serde(skip)]
    pub(crate) by_key: HashMap<String, Vec<NodeId>>,

    #[serde(skip)]
    pub(crate) by_qualified_name: HashMap<String, Vec<NodeId>>,

    #[serde(skip)]
    pub(crate) by_name: HashMap<String, Vec<NodeId>>,
}

impl ClassesDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-seen node with the given fully-qualified name.
    pub fn get(&self, qualified_name: &str) -> Option<&ApiNode> {
        self.by_qualified_name
            .get(qualified_name)
            .and_then(|ids| ids.first())
            .map(|&id| &self.nodes[id])
    }

    /// Every node sharing a qualified name (an overload set or conflicting
    /// declarations), in insertion order.
    pub fn get_all(&self, qualified_name: &str) -> Vec<&ApiNode> {
        self.collect(self.by_qualified_name.get(qualified_name))
    }

    /// First node with the given overload key.
    pub fn get_by_key(&self, key: &str) -> Option<&ApiNode> {
        self.by_key
            .get(key)
            .and_then(|ids| ids.first())
            .map(|&id| &self.nodes[id])
    }

    /// Nodes whose unqualified name matches, in insertion order.
    pub fn find_by_name(&self, name: &str) -> Vec<&ApiNode> {
        self.collect(self.by_name.get(name))
    }

    pub fn node(&self, id: NodeId) -> Option<&ApiNode> {
        self.nodes.get(id)
    }

    pub fn children<'a>(&'a self, node: &'a ApiNode) -> impl Iterator<Item = &'a ApiNode> + 'a {
        node.children.iter().map(move |&id| &self.nodes[id])
    }

    pub fn parent(&self, node: &ApiNode) -> Option<&ApiNode> {
        node.parent.map(|id| &self.nodes[id])
    }

    /// Top-level nodes in first-seen order. Call again (or clone the iterator) to
    /// restart the traversal.
    pub fn top_level(&self) -> TopLevel<'_> {
        TopLevel {
            database: self,
            ids: self.roots.iter(),
        }
    }

    /// All nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ApiNode> {
        self.nodes.iter()
    }

    /// Depth-first pre-order traversal yielding `(depth, node)`.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            database: self,
            stack: self.roots.iter().rev().map(|&id| (0, id)).collect(),
        }
    }

    /// Specializations of a class or function template, linked to the primary by
    /// qualified-name prefix (`N::Vec` → `N::Vec<bool>`).
    pub fn specializations_of(&self, qualified_name: &str) -> Vec<&ApiNode> {
        self.nodes
            .iter()
            .filter(|node| {
                matches!(node.kind, ApiNodeKind::Class(_) | ApiNodeKind::Function(_))
                    && node
                        .qualified_name
                        .strip_prefix(qualified_name)
                        .is_some_and(|rest| rest.starts_with('<'))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn collect(&self, ids: Option<&Vec<NodeId>>) -> Vec<&ApiNode> {
        ids.map(|ids| ids.iter().map(|&id| &self.nodes[id]).collect())
            .unwrap_or_default()
    }
}

/// Iterator over the top-level nodes of a [`ClassesDatabase`].
#[derive(Clone)]
pub struct TopLevel<'a> {
    database: &'a ClassesDatabase,
    ids: std::slice::Iter<'a, NodeId>,
}

impl<'a> Iterator for TopLevel<'a> {
    type Item = &'a ApiNode;

    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next().map(|&id| &self.database.nodes[id])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for TopLevel<'_> {}

/// Depth-first pre-order traversal of a [`ClassesDatabase`].
pub struct Walk<'a> {
    database: &'a ClassesDatabase,
    stack: Vec<(usize, NodeId)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a ApiNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, id) = self.stack.pop()?;
        let node = &self.database.nodes[id];
        self.stack
            .extend(node.children.iter().rev().map(|&child| (depth + 1, child)));
        Some((depth, node))
    }
}

impl<'a> IntoIterator for &'a ClassesDatabase {
    type Item = &'a ApiNode;
    type IntoIter = std::slice::Iter<'a, ApiNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
