//! Single writer of a [`ClassesDatabase`].
//!
//! The walker produces one builder per translation unit. The processor then absorbs the
//! per-unit builders, in input order, into one run-wide builder; that absorb is the only
//! point where results of different units meet.

use log::{debug, trace};

use crate::database::ClassesDatabase;
use crate::error::{DatabaseError, Result};
use crate::node::{ApiNode, ApiNodeKind, FunctionInfo, NodeId, SourceLocation};

/// What [`DatabaseBuilder::insert_or_merge`] did with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was created
    Inserted(NodeId),

    /// The node matched an existing entry and only contributed metadata
    Merged(NodeId),

    /// An entry with the same key but a different signature exists; both are kept
    Conflict { existing: NodeId, inserted: NodeId },
}

impl MergeOutcome {
    /// The node that now represents the inserted declaration.
    pub fn id(&self) -> NodeId {
        match *self {
            MergeOutcome::Inserted(id) | MergeOutcome::Merged(id) => id,
            MergeOutcome::Conflict { inserted, .. } => inserted,
        }
    }
}

/// Summary of [`DatabaseBuilder::absorb`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbsorbReport {
    pub inserted: usize,
    pub merged: usize,

    /// `(existing, inserted)` pairs, ids in the absorbing builder
    pub conflicts: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    db: ClassesDatabase,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the database under construction.
    pub fn database(&self) -> &ClassesDatabase {
        &self.db
    }

    pub fn node(&self, id: NodeId) -> Option<&ApiNode> {
        self.db.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Record `node` under `parent` (or at top level), folding it into an existing
    /// entry when one with the same key and signature is already present.
    ///
    /// A class definition upgrades an earlier forward declaration of the same class in
    /// place; the entry keeps its first-seen position and its children.
    pub fn insert_or_merge(&mut self, parent: Option<NodeId>, node: ApiNode) -> Result<MergeOutcome> {
        if let Some(parent) = parent {
            let owner = self
                .db
                .nodes
                .get(parent)
                .ok_or(DatabaseError::UnknownNode { id: parent })?;
            if !owner.is_container() {
                return Err(DatabaseError::NotAContainer {
                    id: parent,
                    kind: owner.kind_name(),
                });
            }
        }

        let candidates = self.db.by_key.get(&node.key).cloned().unwrap_or_default();

        for &existing in &candidates {
            if self.db.nodes[existing].signature == node.signature {
                trace!("Merging duplicate declaration {}", node.key);
                self.merge_metadata(existing, &node);
                return Ok(MergeOutcome::Merged(existing));
            }
        }

        // Default arguments appear on one declaration of a function only
        if let ApiNodeKind::Function(incoming) = &node.kind {
            for &existing in &candidates {
                let ApiNodeKind::Function(recorded) = &self.db.nodes[existing].kind else {
                    continue;
                };
                if same_but_defaults(recorded, incoming) {
                    trace!("Merging redeclaration of {} without default arguments", node.key);
                    self.merge_metadata(existing, &node);
                    return Ok(MergeOutcome::Merged(existing));
                }
                if same_but_defaults(incoming, recorded) {
                    trace!("Redeclaration of {} adds default arguments", node.key);
                    self.merge_metadata(existing, &node);
                    let entry = &mut self.db.nodes[existing];
                    entry.kind = node.kind;
                    entry.signature = node.signature;
                    return Ok(MergeOutcome::Merged(existing));
                }
            }
        }

        for &existing in &candidates {
            let (existing_forward, same_class_key) = match (&self.db.nodes[existing].kind, &node.kind) {
                (ApiNodeKind::Class(old), ApiNodeKind::Class(new)) => {
                    (old.is_forward_declaration, old.key == new.key)
                }
                _ => continue,
            };
            if !same_class_key {
                continue;
            }
            if existing_forward && !node.is_forward_declaration() {
                debug!("Definition of {} replaces its forward declaration", node.key);
                self.upgrade(existing, node);
                return Ok(MergeOutcome::Merged(existing));
            }
            if node.is_forward_declaration() {
                self.merge_metadata(existing, &node);
                return Ok(MergeOutcome::Merged(existing));
            }
        }

        let id = self.insert(parent, node);
        match candidates.first() {
            Some(&existing) => {
                debug!(
                    "Conflicting declarations of {}: {:?} vs {:?}",
                    self.db.nodes[id].key, self.db.nodes[existing].signature, self.db.nodes[id].signature
                );
                Ok(MergeOutcome::Conflict {
                    existing,
                    inserted: id,
                })
            }
            None => Ok(MergeOutcome::Inserted(id)),
        }
    }

    /// Attach documentation and a source location to the entry with the given key,
    /// without creating anything. Returns false when no such entry exists.
    pub fn attach_metadata(&mut self, key: &str, doc: Option<String>, location: SourceLocation) -> bool {
        let Some(&id) = self.db.by_key.get(key).and_then(|ids| ids.first()) else {
            return false;
        };
        let node = &mut self.db.nodes[id];
        if node.doc_comment.is_none() {
            node.doc_comment = doc;
        }
        add_location(node, location);
        true
    }

    /// Merge another builder's tree into this one, preserving its order.
    pub fn absorb(&mut self, other: DatabaseBuilder) -> Result<AbsorbReport> {
        let roots = other.db.roots.clone();
        let mut nodes: Vec<Option<ApiNode>> = other.db.nodes.into_iter().map(Some).collect();
        let mut report = AbsorbReport::default();

        for root in roots {
            self.absorb_subtree(&mut nodes, root, None, &mut report)?;
        }

        Ok(report)
    }

    pub fn finish(self) -> ClassesDatabase {
        self.db
    }

    fn absorb_subtree(
        &mut self,
        nodes: &mut [Option<ApiNode>],
        id: NodeId,
        parent: Option<NodeId>,
        report: &mut AbsorbReport,
    ) -> Result<()> {
        let Some(mut node) = nodes.get_mut(id).and_then(Option::take) else {
            return Err(DatabaseError::UnknownNode { id });
        };
        let children = std::mem::take(&mut node.children);

        let target = match self.insert_or_merge(parent, node)? {
            MergeOutcome::Inserted(id) => {
                report.inserted += 1;
                id
            }
            MergeOutcome::Merged(id) => {
                report.merged += 1;
                id
            }
            MergeOutcome::Conflict { existing, inserted } => {
                report.conflicts.push((existing, inserted));
                inserted
            }
        };

        for child in children {
            self.absorb_subtree(nodes, child, Some(target), report)?;
        }
        Ok(())
    }

    fn insert(&mut self, parent: Option<NodeId>, mut node: ApiNode) -> NodeId {
        let id = self.db.nodes.len();
        node.id = id;
        node.parent = parent;
        node.children.clear();

        self.db.by_key.entry(node.key.clone()).or_default().push(id);
        self.db
            .by_qualified_name
            .entry(node.qualified_name.clone())
            .or_default()
            .push(id);
        self.db.by_name.entry(node.name.clone()).or_default().push(id);

        match parent {
            Some(parent) => self.db.nodes[parent].children.push(id),
            None => self.db.roots.push(id),
        }
        self.db.nodes.push(node);
        id
    }

    fn merge_metadata(&mut self, id: NodeId, incoming: &ApiNode) {
        let node = &mut self.db.nodes[id];
        if node.doc_comment.is_none() {
            node.doc_comment = incoming.doc_comment.clone();
        }
        add_location(node, incoming.location.clone());
        for location in &incoming.additional_locations {
            add_location(node, location.clone());
        }
    }

    fn upgrade(&mut self, id: NodeId, definition: ApiNode) {
        let node = &mut self.db.nodes[id];
        let forward_location = std::mem::replace(&mut node.location, definition.location);
        node.kind = definition.kind;
        node.signature = definition.signature;
        node.extraction_failed = definition.extraction_failed;
        if definition.doc_comment.is_some() {
            node.doc_comment = definition.doc_comment;
        }
        let current = node.location.clone();
        node.additional_locations.retain(|l| *l != current);
        add_location(node, forward_location);
        for location in definition.additional_locations {
            add_location(node, location);
        }
    }
}

/// `with` and `without` declare the same function, `without` omitting the default
/// arguments `with` gives.
fn same_but_defaults(with: &FunctionInfo, without: &FunctionInfo) -> bool {
    if with.parameters.len() != without.parameters.len()
        || without.parameters.iter().any(|p| p.default_value.is_some())
        || with.parameters.iter().all(|p| p.default_value.is_none())
    {
        return false;
    }
    let mut stripped = with.clone();
    for parameter in &mut stripped.parameters {
        parameter.default_value = None;
    }
    stripped == *without
}

fn add_location(node: &mut ApiNode, location: SourceLocation) {
    if node.location != location && !node.additional_locations.contains(&location) {
        node.additional_locations.push(location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ClassInfo, ClassKey, FunctionKind, ParameterInfo};

    fn namespace(name: &str, line: usize) -> ApiNode {
        ApiNode::new(
            ApiNodeKind::Namespace { is_inline: false },
            name,
            name,
            format!("namespace {name}"),
            SourceLocation::new("a.hpp", line),
        )
    }

    fn class(qn: &str, forward: bool, signature: &str, line: usize) -> ApiNode {
        let mut info = ClassInfo::new(ClassKey::Class);
        info.is_forward_declaration = forward;
        let name = qn.rsplit("::").next().unwrap_or(qn);
        ApiNode::new(
            ApiNodeKind::Class(info),
            name,
            qn,
            signature,
            SourceLocation::new("a.hpp", line),
        )
    }

    #[test]
    fn test_duplicate_merges() {
        let mut builder = DatabaseBuilder::new();
        let first = builder.insert_or_merge(None, namespace("N", 1)).unwrap();
        let second = builder.insert_or_merge(None, namespace("N", 9)).unwrap();

        assert_eq!(first, MergeOutcome::Inserted(0));
        assert_eq!(second, MergeOutcome::Merged(0));
        assert_eq!(builder.len(), 1);
        assert_eq!(
            builder.node(0).unwrap().additional_locations,
            vec![SourceLocation::new("a.hpp", 9)]
        );
    }

    #[test]
    fn test_merge_fills_missing_doc_only() {
        let mut builder = DatabaseBuilder::new();
        builder.insert_or_merge(None, namespace("N", 1)).unwrap();
        builder
            .insert_or_merge(None, namespace("N", 1).with_doc(Some("/// docs".into())))
            .unwrap();
        builder
            .insert_or_merge(None, namespace("N", 1).with_doc(Some("/// other".into())))
            .unwrap();

        let node = builder.node(0).unwrap();
        assert_eq!(node.doc_comment.as_deref(), Some("/// docs"));
        assert!(node.additional_locations.is_empty());
    }

    #[test]
    fn test_parent_must_be_container() {
        let mut builder = DatabaseBuilder::new();
        let alias = ApiNode::new(
            ApiNodeKind::TypeAlias {
                target: "int".into(),
            },
            "Id",
            "Id",
            "using Id = int",
            SourceLocation::new("a.hpp", 1),
        );
        let id = builder.insert_or_merge(None, alias).unwrap().id();

        let err = builder.insert_or_merge(Some(id), namespace("N", 2)).unwrap_err();
        assert!(matches!(err, DatabaseError::NotAContainer { kind: "type_alias", .. }));

        let err = builder.insert_or_merge(Some(42), namespace("N", 2)).unwrap_err();
        assert_eq!(err, DatabaseError::UnknownNode { id: 42 });
    }

    #[test]
    fn test_definition_upgrades_forward_declaration() {
        let mut builder = DatabaseBuilder::new();
        let ns = builder.insert_or_merge(None, namespace("N", 1)).unwrap().id();
        let fwd = builder
            .insert_or_merge(Some(ns), class("N::C", true, "class C", 2))
            .unwrap()
            .id();
        let def = builder
            .insert_or_merge(Some(ns), class("N::C", false, "class C : public B", 10))
            .unwrap();

        assert_eq!(def, MergeOutcome::Merged(fwd));
        let node = builder.node(fwd).unwrap();
        assert!(!node.is_forward_declaration());
        assert_eq!(node.signature, "class C : public B");
        assert_eq!(node.location.line, 10);
        assert_eq!(node.additional_locations, vec![SourceLocation::new("a.hpp", 2)]);

        // A later forward declaration folds into the definition
        let again = builder
            .insert_or_merge(Some(ns), class("N::C", true, "class C", 20))
            .unwrap();
        assert_eq!(again, MergeOutcome::Merged(fwd));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_conflict_keeps_both() {
        let mut builder = DatabaseBuilder::new();
        builder
            .insert_or_merge(None, class("C", false, "class C", 1))
            .unwrap();
        let outcome = builder
            .insert_or_merge(None, class("C", false, "class C final", 5))
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Conflict {
                existing: 0,
                inserted: 1
            }
        );
        let db = builder.finish();
        assert_eq!(db.get_all("C").len(), 2);
        assert_eq!(db.get("C").unwrap().signature, "class C");
    }

    #[test]
    fn test_attach_metadata_never_creates() {
        let mut builder = DatabaseBuilder::new();
        assert!(!builder.attach_metadata("N::C::F(int)", None, SourceLocation::new("a.cpp", 3)));
        assert!(builder.is_empty());

        builder.insert_or_merge(None, namespace("N", 1)).unwrap();
        assert!(builder.attach_metadata(
            "N",
            Some("/// ns".into()),
            SourceLocation::new("b.hpp", 4)
        ));
        let node = builder.node(0).unwrap();
        assert_eq!(node.doc_comment.as_deref(), Some("/// ns"));
        assert_eq!(node.additional_locations, vec![SourceLocation::new("b.hpp", 4)]);
    }

    #[test]
    fn test_absorb_maps_tree() {
        let mut unit_a = DatabaseBuilder::new();
        let ns = unit_a.insert_or_merge(None, namespace("N", 1)).unwrap().id();
        unit_a
            .insert_or_merge(Some(ns), class("N::C", false, "class C", 2))
            .unwrap();

        let mut unit_b = DatabaseBuilder::new();
        let ns = unit_b.insert_or_merge(None, namespace("N", 1)).unwrap().id();
        unit_b
            .insert_or_merge(Some(ns), class("N::C", false, "class C", 2))
            .unwrap();
        unit_b
            .insert_or_merge(Some(ns), class("N::D", false, "class D", 8))
            .unwrap();

        let mut run = DatabaseBuilder::new();
        let first = run.absorb(unit_a).unwrap();
        let second = run.absorb(unit_b).unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 1);
        assert_eq!(second.merged, 2);
        assert!(second.conflicts.is_empty());

        let db = run.finish();
        let names: Vec<_> = db.walk().map(|(d, n)| (d, n.qualified_name.as_str())).collect();
        assert_eq!(names, vec![(0, "N"), (1, "N::C"), (1, "N::D")]);
    }

    fn function(defaults: &[Option<&str>], signature: &str, line: usize) -> ApiNode {
        let mut info = FunctionInfo::new(FunctionKind::Free);
        info.return_type = Some("void".to_string());
        info.parameters = defaults
            .iter()
            .map(|default| match default {
                Some(value) => ParameterInfo::new("int").with_default(*value),
                None => ParameterInfo::new("int"),
            })
            .collect();
        ApiNode::new(
            ApiNodeKind::Function(info),
            "f",
            "N::f",
            signature,
            SourceLocation::new("a.hpp", line),
        )
        .with_key("N::f(int)")
    }

    #[test]
    fn test_definition_without_defaults_merges_into_declaration() {
        let mut builder = DatabaseBuilder::new();
        let declared = builder
            .insert_or_merge(None, function(&[Some("0")], "void f(int = 0)", 1))
            .unwrap();
        let defined = builder
            .insert_or_merge(None, function(&[None], "void f(int)", 2))
            .unwrap();
        assert_eq!(defined, MergeOutcome::Merged(declared.id()));

        let db = builder.finish();
        let entries = db.get_all("N::f");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].signature, "void f(int = 0)");
        assert_eq!(entries[0].location.line, 1);
        assert_eq!(entries[0].additional_locations, vec![SourceLocation::new("a.hpp", 2)]);
    }

    #[test]
    fn test_redeclaration_adding_defaults_updates_signature() {
        let mut builder = DatabaseBuilder::new();
        builder
            .insert_or_merge(None, function(&[None], "void f(int)", 1))
            .unwrap();
        let outcome = builder
            .insert_or_merge(None, function(&[Some("0")], "void f(int = 0)", 3))
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged(_)));

        let db = builder.finish();
        let entries = db.get_all("N::f");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].signature, "void f(int = 0)");
    }

    #[test]
    fn test_different_defaults_still_conflict() {
        let mut builder = DatabaseBuilder::new();
        builder
            .insert_or_merge(None, function(&[Some("0")], "void f(int = 0)", 1))
            .unwrap();
        let outcome = builder
            .insert_or_merge(None, function(&[Some("1")], "void f(int = 1)", 2))
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Conflict { .. }));
    }
}
