//! Pre-pass collecting the aliases hidden from consumers.
//!
//! Runs over every file of a translation unit before the main walk, so that a visible
//! declaration can mention a hidden alias declared in any header of the unit.

use apiview::AccessLevel;
use tree_sitter::Node;

use crate::filter::{self, DeclContext, DeclOrigin, Decision, FilterConfig};
use crate::frontend::{FileRole, ParsedFile};
use crate::normalize::{HiddenAlias, NormalizationContext, TypeSpec};
use crate::syntax::{self, named_children, text};

use super::{class_key, class_name, namespace_segments};

/// Register every hidden alias of `files` with `context`.
pub fn collect_hidden_aliases<'t>(
    files: &'t [ParsedFile],
    config: &FilterConfig,
    context: &mut NormalizationContext<'t>,
) {
    for file in files {
        let mut collector = AliasCollector {
            config,
            role: file.role,
            source: file.source.as_bytes(),
            scope: Vec::new(),
            namespaces: Vec::new(),
            context: &mut *context,
        };
        collector.visit_children(file.tree.root_node(), AccessLevel::None, false);
    }
}

struct AliasCollector<'a, 't> {
    config: &'a FilterConfig,
    role: FileRole,
    source: &'t [u8],

    /// Names for qualification; anonymous namespaces add nothing
    scope: Vec<String>,

    /// Namespace segments for the filter; `""` for anonymous namespaces
    namespaces: Vec<String>,

    context: &'a mut NormalizationContext<'t>,
}

impl<'t> AliasCollector<'_, 't> {
    fn visit_children(&mut self, node: Node<'t>, default_access: AccessLevel, hidden: bool) {
        let mut access = default_access;
        for child in named_children(node) {
            if child.kind() == "access_specifier" {
                let written = text(child, self.source).trim_end_matches(':').trim();
                access = AccessLevel::from_specifier(written).unwrap_or(access);
                continue;
            }
            self.visit(child, access, hidden, None);
        }
    }

    fn visit(&mut self, node: Node<'t>, access: AccessLevel, hidden: bool, template: Option<Node<'t>>) {
        match node.kind() {
            "namespace_definition" => self.visit_namespace(node, hidden),
            "linkage_specification" => {
                if let Some(body) = node.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.visit_children(body, access, hidden);
                    } else {
                        self.visit(body, access, hidden, None);
                    }
                }
            }
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.visit_class(node, access, hidden)
            }
            "declaration" | "field_declaration" => {
                if let Some(spec) = node.child_by_field_name("type") {
                    if class_key(spec.kind()).is_some() && spec.child_by_field_name("body").is_some() {
                        self.visit_class(spec, access, hidden);
                    }
                }
            }
            "template_declaration" => {
                let parameters = node.child_by_field_name("parameters");
                if let Some(inner) = named_children(node)
                    .into_iter()
                    .rev()
                    .find(|c| !matches!(c.kind(), "template_parameter_list" | "requires_clause"))
                {
                    self.visit(inner, access, hidden, parameters);
                }
            }
            "alias_declaration" => {
                let (Some(name), Some(target)) = (
                    node.child_by_field_name("name"),
                    node.child_by_field_name("type").and_then(TypeSpec::of),
                ) else {
                    return;
                };
                let name = text(name, self.source).trim().to_string();
                self.record(name, target, access, hidden, template);
            }
            "type_definition" => {
                let Some(type_node) = node.child_by_field_name("type") else {
                    return;
                };
                let mut cursor = node.walk();
                let declarators: Vec<_> = node.children_by_field_name("declarator", &mut cursor).collect();
                for declarator in declarators {
                    let Some(name) = syntax::declarator_name(declarator) else {
                        continue;
                    };
                    let target = TypeSpec {
                        holder: node,
                        type_node,
                        declarator: Some(declarator),
                    };
                    let name = text(name, self.source).trim().to_string();
                    self.record(name, target, access, hidden, None);
                }
            }
            _ => {}
        }
    }

    fn visit_namespace(&mut self, node: Node<'t>, hidden: bool) {
        let segments = namespace_segments(node, self.source);
        let pushed_scope = segments.iter().filter(|s| !s.is_empty()).count();
        for segment in &segments {
            if !segment.is_empty() {
                self.scope.push(segment.clone());
            }
            self.namespaces.push(segment.clone());
        }

        let context = DeclContext {
            file_role: self.role,
            access: AccessLevel::None,
            origin: DeclOrigin::Written,
            namespaces: &self.namespaces,
            is_namespace: true,
        };
        let hidden = hidden || hides(&filter::check(&context, self.config));

        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, AccessLevel::None, hidden);
        }

        self.scope.truncate(self.scope.len() - pushed_scope);
        self.namespaces.truncate(self.namespaces.len() - segments.len());
    }

    fn visit_class(&mut self, node: Node<'t>, access: AccessLevel, hidden: bool) {
        let (Some(name), Some(body), Some(key)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("body"),
            class_key(node.kind()),
        ) else {
            return;
        };
        let Ok((name, _)) = class_name(self.context, name, self.source, &self.scope) else {
            return;
        };

        let context = DeclContext {
            file_role: self.role,
            access,
            origin: DeclOrigin::Written,
            namespaces: &self.namespaces,
            is_namespace: false,
        };
        let hidden = hidden || hides(&filter::check(&context, self.config));

        self.scope.push(name);
        self.visit_children(body, key.default_access(), hidden);
        self.scope.pop();
    }

    fn record(
        &mut self,
        name: String,
        target: TypeSpec<'t>,
        access: AccessLevel,
        hidden: bool,
        template: Option<Node<'t>>,
    ) {
        let context = DeclContext {
            file_role: self.role,
            access,
            origin: DeclOrigin::Written,
            namespaces: &self.namespaces,
            is_namespace: false,
        };
        if !(hidden || hides(&filter::check(&context, self.config))) {
            return;
        }

        let template_parameters = template
            .and_then(|list| {
                self.context
                    .render_template_parameters(list, self.source, &self.scope)
                    .ok()
            })
            .map(|params| params.into_iter().filter_map(|p| p.name).collect())
            .unwrap_or_default();

        let qualified_name = if self.scope.is_empty() {
            name
        } else {
            format!("{}::{}", self.scope.join("::"), name)
        };
        self.context.add_hidden_alias(
            qualified_name,
            HiddenAlias {
                target,
                source: self.source,
                scope: self.scope.clone(),
                template_parameters,
            },
        );
    }
}

fn hides(decision: &Decision) -> bool {
    match decision {
        Decision::Include => false,
        Decision::Exclude(reason) => reason.hides_from_consumers(),
    }
}
