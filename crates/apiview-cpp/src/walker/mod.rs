//! AST walker and model builder
//!
//! Walks the syntax trees of one translation unit in declaration order and records every
//! declaration the filter admits into a per-unit [`DatabaseBuilder`]. Namespaces are
//! recorded lazily, when the first admitted declaration inside them is recorded.

mod aliases;

pub use aliases::collect_hidden_aliases;

use apiview::{
    AccessLevel, ApiNode, ApiNodeKind, BaseSpecifier, ClassInfo, ClassKey, DatabaseBuilder, Diagnostic,
    EnumInfo, Enumerator, FieldInfo, FunctionInfo, FunctionKind, MergeOutcome, NodeId, ParameterInfo,
    SourceLocation, TemplateParameterInfo,
};
use log::{debug, trace, warn};
use std::collections::HashMap;
use tree_sitter::Node;

use crate::filter::{self, DeclContext, DeclOrigin, Decision, FilterConfig};
use crate::frontend::{FileRole, ParsedFile, TranslationUnit};
use crate::normalize::{
    collapse_whitespace, render_tokens, signature, NormalizationContext, NormalizeResult, TemplateParam, TypeSpec,
    UNKNOWN_TYPE,
};
use crate::syntax::{self, children, named_children, text, MethodClause};

/// Counters of one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub recorded: usize,
    pub merged: usize,
    pub conflicts: usize,
    pub excluded: usize,
    pub failures: usize,
}

/// Result of walking one translation unit.
#[derive(Debug)]
pub struct WalkOutput {
    pub builder: DatabaseBuilder,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: WalkStats,
}

/// Walk every file of `unit`, headers first, and build its partial database.
pub fn walk_unit(unit: &TranslationUnit, config: &FilterConfig) -> WalkOutput {
    let mut context = NormalizationContext::new();
    collect_hidden_aliases(&unit.files, config, &mut context);
    debug!(
        "{}: {} hidden alias(es)",
        unit.primary.display(),
        context.hidden_alias_count()
    );

    let mut walker = Walker::new(config, context);
    for file in &unit.files {
        walker.walk_file(file);
    }
    walker.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    NotVisited,
    Visiting,
    Recorded,
}

/// An enclosing namespace or class.
#[derive(Debug)]
struct Scope {
    name: String,
    qualified_name: String,

    /// Recorded node; `None` for a namespace nothing was recorded in yet
    node: Option<NodeId>,

    /// Namespace node to record on first use
    pending: Option<ApiNode>,

    is_namespace: bool,

    /// Current access inside a class body
    access: AccessLevel,

    /// Class name without template arguments, for constructor detection
    constructor_name: Option<String>,
}

/// Template header of the declaration being visited.
#[derive(Debug)]
struct Template<'t> {
    anchor: Node<'t>,
    parameters: Vec<TemplateParam>,
    failure: Option<String>,
}

impl Template<'_> {
    fn rendered(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.rendered.clone()).collect()
    }
}

struct Walker<'a, 't> {
    config: &'a FilterConfig,
    context: NormalizationContext<'t>,
    builder: DatabaseBuilder,
    diagnostics: Vec<Diagnostic>,
    stats: WalkStats,

    source: &'t [u8],
    path: &'t str,
    role: FileRole,

    scopes: Vec<Scope>,
    states: HashMap<String, VisitState>,
}

impl<'a, 't> Walker<'a, 't> {
    fn new(config: &'a FilterConfig, context: NormalizationContext<'t>) -> Self {
        Self {
            config,
            context,
            builder: DatabaseBuilder::new(),
            diagnostics: Vec::new(),
            stats: WalkStats::default(),
            source: b"",
            path: "",
            role: FileRole::Primary,
            scopes: Vec::new(),
            states: HashMap::new(),
        }
    }

    fn finish(self) -> WalkOutput {
        WalkOutput {
            builder: self.builder,
            diagnostics: self.diagnostics,
            stats: self.stats,
        }
    }

    fn walk_file(&mut self, file: &'t ParsedFile) {
        self.source = file.source.as_bytes();
        self.path = &file.display_path;
        self.role = file.role;
        self.scopes.clear();
        trace!("Walking {} ({:?})", file.display_path, file.role);
        self.visit_children(file.tree.root_node());
    }

    fn visit_children(&mut self, node: Node<'t>) {
        for child in named_children(node) {
            self.visit(child, None);
        }
    }

    fn visit(&mut self, node: Node<'t>, template: Option<&Template<'t>>) {
        match node.kind() {
            "namespace_definition" => self.visit_namespace(node),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                let anchor = template.map_or(node, |t| t.anchor);
                self.visit_class(node, anchor, template, None);
            }
            "enum_specifier" => {
                let anchor = template.map_or(node, |t| t.anchor);
                self.visit_enum(node, anchor, None);
            }
            "declaration" | "field_declaration" => self.visit_declaration(node, template),
            "function_definition" | "inline_method_definition" => self.visit_function_definition(node, template),
            "template_declaration" => self.visit_template(node),
            "alias_declaration" | "type_definition" => self.visit_alias(node, template),
            "linkage_specification" => {
                if let Some(body) = node.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.visit_children(body);
                    } else {
                        self.visit(body, template);
                    }
                }
            }
            "access_specifier" => self.set_access(node),
            "ERROR" => trace!("Skipping unparsable region at {}:{}", self.path, syntax::line(node)),
            other => trace!("Ignoring {} at {}:{}", other, self.path, syntax::line(node)),
        }
    }

    fn set_access(&mut self, node: Node<'t>) {
        let written = text(node, self.source).trim_end_matches(':').trim();
        if let (Some(scope), Some(access)) = (self.scopes.last_mut(), AccessLevel::from_specifier(written)) {
            if !scope.is_namespace {
                scope.access = access;
            }
        }
    }

    // Scope queries

    fn scope_names(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.name.clone()).collect()
    }

    fn namespaces(&self) -> Vec<String> {
        self.scopes
            .iter()
            .filter(|s| s.is_namespace)
            .map(|s| s.name.clone())
            .collect()
    }

    fn qualify(&self, name: &str) -> String {
        match self.scopes.last() {
            Some(scope) => format!("{}::{}", scope.qualified_name, name),
            None => name.to_string(),
        }
    }

    fn current_class(&self) -> Option<&Scope> {
        self.scopes.last().filter(|s| !s.is_namespace)
    }

    fn current_access(&self) -> AccessLevel {
        self.current_class().map_or(AccessLevel::None, |s| s.access)
    }

    fn location(&self, node: Node<'t>) -> SourceLocation {
        SourceLocation::new(self.path, syntax::line(node))
    }

    fn state(&self, qualified_name: &str) -> VisitState {
        self.states
            .get(qualified_name)
            .copied()
            .unwrap_or(VisitState::NotVisited)
    }

    /// Run the filter for a declaration in the current scope.
    fn admit(&mut self, access: AccessLevel, origin: DeclOrigin, qualified_name: &str) -> bool {
        self.admit_in(access, origin, qualified_name, &[])
    }

    /// Like [`admit`](Self::admit), with scope segments written in the declaration's own
    /// name (`class detail::Impl`) appended to the enclosing namespaces.
    fn admit_in(
        &mut self,
        access: AccessLevel,
        origin: DeclOrigin,
        qualified_name: &str,
        written: &[String],
    ) -> bool {
        let mut namespaces = self.namespaces();
        namespaces.extend(written.iter().cloned());
        let context = DeclContext {
            file_role: self.role,
            access,
            origin,
            namespaces: &namespaces,
            is_namespace: false,
        };
        match filter::check(&context, self.config) {
            Decision::Include => true,
            Decision::Exclude(reason) => {
                trace!("Excluding {}: {}", qualified_name, reason);
                self.stats.excluded += 1;
                false
            }
        }
    }

    // Recording

    /// Record the namespaces on the scope stack that have no node yet; returns the
    /// innermost scope's node.
    fn materialize(&mut self) -> apiview::Result<Option<NodeId>> {
        let mut parent = None;
        for i in 0..self.scopes.len() {
            if let Some(id) = self.scopes[i].node {
                parent = Some(id);
                continue;
            }
            let Some(pending) = self.scopes[i].pending.take() else {
                continue;
            };
            let id = match self.builder.insert_or_merge(parent, pending)? {
                MergeOutcome::Inserted(id) => {
                    self.stats.recorded += 1;
                    id
                }
                outcome => {
                    self.stats.merged += 1;
                    outcome.id()
                }
            };
            self.scopes[i].node = Some(id);
            parent = Some(id);
        }
        Ok(parent)
    }

    fn record(&mut self, node: ApiNode) -> Option<NodeId> {
        match self.materialize() {
            Ok(parent) => self.record_under(parent, node),
            Err(e) => {
                warn!("Failed to record {}: {}", node.qualified_name, e);
                None
            }
        }
    }

    fn record_under(&mut self, parent: Option<NodeId>, node: ApiNode) -> Option<NodeId> {
        let location = node.location.clone();
        let qualified_name = node.qualified_name.clone();

        match self.builder.insert_or_merge(parent, node) {
            Ok(MergeOutcome::Inserted(id)) => {
                self.stats.recorded += 1;
                Some(id)
            }
            Ok(MergeOutcome::Merged(id)) => {
                self.stats.merged += 1;
                Some(id)
            }
            Ok(MergeOutcome::Conflict { existing, inserted }) => {
                self.stats.conflicts += 1;
                let earlier = self
                    .builder
                    .node(existing)
                    .map(|n| format!("`{}` at {}", n.signature, n.location))
                    .unwrap_or_default();
                self.diagnostics.push(Diagnostic::merge_conflict(
                    &location,
                    &qualified_name,
                    format!("conflicts with earlier declaration {earlier}"),
                ));
                Some(inserted)
            }
            Err(e) => {
                warn!("Failed to record {}: {}", qualified_name, e);
                None
            }
        }
    }

    /// Mark a node as partially extracted and report why.
    fn flag_failures(&mut self, node: ApiNode, failures: Vec<String>) -> ApiNode {
        if failures.is_empty() {
            return node;
        }
        self.stats.failures += 1;
        self.diagnostics.push(Diagnostic::extraction(
            &node.location,
            &node.qualified_name,
            failures.join("; "),
        ));
        node.failed()
    }

    fn render_or_placeholder(result: NormalizeResult<String>, failures: &mut Vec<String>) -> String {
        result.unwrap_or_else(|e| {
            failures.push(e.to_string());
            UNKNOWN_TYPE.to_string()
        })
    }

    // Declarations

    fn visit_namespace(&mut self, node: Node<'t>) {
        let segments = namespace_segments(node, self.source);
        let is_inline = syntax::has_token(node, self.source, "inline");
        let location = self.location(node);
        let doc = syntax::doc_comment(node, self.source);

        let mut pushed = 0;
        for (i, segment) in segments.iter().enumerate() {
            let mut namespaces = self.namespaces();
            namespaces.push(segment.clone());
            let context = DeclContext {
                file_role: self.role,
                access: AccessLevel::None,
                origin: DeclOrigin::Written,
                namespaces: &namespaces,
                is_namespace: true,
            };
            let qualified_name = self.qualify(segment);
            if let Decision::Exclude(reason) = filter::check(&context, self.config) {
                trace!("Excluding namespace {}: {}", qualified_name, reason);
                self.stats.excluded += 1;
                break;
            }

            let last = i + 1 == segments.len();
            let inline_here = is_inline && last;
            let pending = ApiNode::new(
                ApiNodeKind::Namespace { is_inline: inline_here },
                segment.clone(),
                qualified_name.clone(),
                signature::namespace(segment, inline_here),
                location.clone(),
            )
            .with_doc(if last { doc.clone() } else { None });

            self.scopes.push(Scope {
                name: segment.clone(),
                qualified_name,
                node: None,
                pending: Some(pending),
                is_namespace: true,
                access: AccessLevel::None,
                constructor_name: None,
            });
            pushed += 1;
        }

        if pushed == segments.len() {
            if let Some(body) = node.child_by_field_name("body") {
                self.visit_children(body);
            }
        }
        self.scopes.truncate(self.scopes.len() - pushed);
    }

    fn visit_template(&mut self, node: Node<'t>) {
        let scope = self.scope_names();
        let (parameters, failure) = match node.child_by_field_name("parameters") {
            Some(list) => match self.context.render_template_parameters(list, self.source, &scope) {
                Ok(parameters) => (parameters, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            },
            None => (Vec::new(), None),
        };
        let template = Template {
            anchor: node,
            parameters,
            failure,
        };

        let inner = named_children(node)
            .into_iter()
            .rev()
            .find(|c| !matches!(c.kind(), "template_parameter_list" | "requires_clause"));
        match inner {
            Some(inner) => self.visit(inner, Some(&template)),
            None => trace!("Empty template declaration at {}:{}", self.path, syntax::line(node)),
        }
    }

    fn visit_class(
        &mut self,
        spec: Node<'t>,
        anchor: Node<'t>,
        template: Option<&Template<'t>>,
        name_override: Option<String>,
    ) -> Option<NodeId> {
        let key = class_key(spec.kind())?;
        let scope = self.scope_names();
        let body = spec.child_by_field_name("body");
        let name_node = spec.child_by_field_name("name");

        let mut failures: Vec<String> = template.and_then(|t| t.failure.clone()).into_iter().collect();
        let (name, is_specialization) = match (name_override, name_node) {
            (Some(name), _) => (name, false),
            (None, Some(node)) => match class_name(&mut self.context, node, self.source, &scope) {
                Ok(named) => named,
                Err(e) => {
                    failures.push(e.to_string());
                    (collapse_whitespace(text(node, self.source)), false)
                }
            },
            (None, None) => {
                trace!("Skipping anonymous {} at {}:{}", key, self.path, syntax::line(spec));
                return None;
            }
        };

        let qualified_name = self.qualify(&name);
        let access = self.current_access();
        let origin = if name_node.is_some_and(|n| n.is_missing()) {
            DeclOrigin::Synthesized
        } else {
            DeclOrigin::Written
        };
        let written = match name_node {
            Some(node) if node.kind() == "qualified_identifier" => written_qualifier(&name),
            _ => None,
        };
        if !self.admit_in(access, origin, &qualified_name, written.as_deref().unwrap_or(&[])) {
            return None;
        }

        // A qualified definition (`class Outer::Impl { ... }`) completes a declaration
        // recorded in its own scope and never introduces one
        let declared_parent = match written {
            Some(_) => {
                let declared = if is_specialization {
                    qualified_name.split('<').next().unwrap_or(&qualified_name)
                } else {
                    &qualified_name
                };
                match self.builder.database().get_by_key(declared) {
                    Some(existing) => Some(existing.parent),
                    None => {
                        trace!("No recorded declaration for qualified definition {}", qualified_name);
                        return None;
                    }
                }
            }
            None => None,
        };

        let mut info = ClassInfo::new(key);
        info.is_forward_declaration = body.is_none();
        info.is_specialization = is_specialization;
        info.template_parameters = template.map(Template::rendered).unwrap_or_default();
        info.is_final = children(spec)
            .iter()
            .any(|c| c.kind() == "virtual_specifier" && text(*c, self.source).trim() == "final");
        if let Some(clause) = syntax::child_of_kind(spec, "base_class_clause") {
            info.bases = self.base_specifiers(clause, key, &scope, &mut failures);
        }

        let location = self.location(anchor);
        let node = ApiNode::new(
            ApiNodeKind::Class(info.clone()),
            name.clone(),
            qualified_name.clone(),
            signature::class(&name, &info),
            location.clone(),
        )
        .with_access(access)
        .with_doc(syntax::doc_comment(anchor, self.source));
        let node = self.flag_failures(node, failures);
        let id = match declared_parent {
            Some(parent) => self.record_under(parent, node)?,
            None => self.record(node)?,
        };

        let Some(body) = body else {
            return Some(id);
        };
        if self.state(&qualified_name) == VisitState::Visiting {
            debug!("Recursive definition of {} at {}", qualified_name, location);
            return Some(id);
        }

        self.states.insert(qualified_name.clone(), VisitState::Visiting);
        let constructor_name = name.split('<').next().unwrap_or(&name);
        let constructor_name = constructor_name.rsplit("::").next().unwrap_or(constructor_name).to_string();
        self.scopes.push(Scope {
            name,
            qualified_name: qualified_name.clone(),
            node: Some(id),
            pending: None,
            is_namespace: false,
            access: key.default_access(),
            constructor_name: Some(constructor_name),
        });

        if let Some(template) = template {
            self.record_template_parameters(&template.parameters, &location);
        }
        self.visit_children(body);

        self.scopes.pop();
        self.states.insert(qualified_name, VisitState::Recorded);
        Some(id)
    }

    fn base_specifiers(
        &mut self,
        clause: Node<'t>,
        key: ClassKey,
        scope: &[String],
        failures: &mut Vec<String>,
    ) -> Vec<BaseSpecifier> {
        let mut tokens = Vec::new();
        for child in children(clause) {
            if child.kind() == "base_class_specifier" {
                tokens.extend(children(child));
            } else {
                tokens.push(child);
            }
        }

        let mut bases = Vec::new();
        let mut access = None;
        let mut is_virtual = false;
        for token in tokens {
            match token.kind() {
                "access_specifier" => access = AccessLevel::from_specifier(text(token, self.source).trim()),
                "virtual" => is_virtual = true,
                "type_identifier" | "qualified_identifier" | "template_type" => {
                    let name = Self::render_or_placeholder(
                        self.context.render_type_name(token, self.source, scope),
                        failures,
                    );
                    bases.push(BaseSpecifier {
                        name,
                        access: access.take().unwrap_or_else(|| key.default_access()),
                        is_virtual: std::mem::take(&mut is_virtual),
                    });
                }
                _ => {}
            }
        }
        bases
    }

    fn record_template_parameters(&mut self, parameters: &[TemplateParam], location: &SourceLocation) {
        for (position, parameter) in parameters.iter().enumerate() {
            let Some(name) = &parameter.name else {
                continue;
            };
            let info = TemplateParameterInfo {
                kind: parameter.kind,
                is_variadic: parameter.is_variadic,
                default_value: parameter.default_value.clone(),
                position,
            };
            let node = ApiNode::new(
                ApiNodeKind::TemplateParameter(info),
                name.clone(),
                self.qualify(name),
                parameter.rendered.clone(),
                location.clone(),
            );
            self.record(node);
        }
    }

    fn visit_enum(&mut self, spec: Node<'t>, anchor: Node<'t>, name_override: Option<String>) {
        let name = match (name_override, spec.child_by_field_name("name")) {
            (Some(name), _) => name,
            (None, Some(node)) => collapse_whitespace(text(node, self.source)),
            (None, None) => {
                trace!("Skipping anonymous enum at {}:{}", self.path, syntax::line(spec));
                return;
            }
        };
        let Some(body) = spec.child_by_field_name("body") else {
            trace!("Skipping opaque enum declaration {}", name);
            return;
        };

        let qualified_name = self.qualify(&name);
        let access = self.current_access();
        if !self.admit(access, DeclOrigin::Written, &qualified_name) {
            return;
        }

        let scope = self.scope_names();
        let mut failures = Vec::new();
        let underlying_type = spec.child_by_field_name("base").map(|base| {
            Self::render_or_placeholder(
                self.context.render_type_name(base, self.source, &scope),
                &mut failures,
            )
        });
        let enumerators = named_children(body)
            .into_iter()
            .filter(|e| e.kind() == "enumerator")
            .filter_map(|e| {
                let name = e.child_by_field_name("name")?;
                Some(Enumerator {
                    name: text(name, self.source).trim().to_string(),
                    value: e.child_by_field_name("value").map(|v| render_tokens(v, self.source)),
                })
            })
            .collect();

        let info = EnumInfo {
            is_scoped: syntax::has_token(spec, self.source, "class") || syntax::has_token(spec, self.source, "struct"),
            underlying_type,
            enumerators,
        };
        let node = ApiNode::new(
            ApiNodeKind::Enum(info.clone()),
            name.clone(),
            qualified_name,
            signature::enumeration(&name, &info),
            self.location(anchor),
        )
        .with_access(access)
        .with_doc(syntax::doc_comment(anchor, self.source));
        let node = self.flag_failures(node, failures);
        self.record(node);
    }

    fn visit_declaration(&mut self, node: Node<'t>, template: Option<&Template<'t>>) {
        let anchor = template.map_or(node, |t| t.anchor);
        let declarators = declarators_with_values(node);

        if let Some(type_node) = node.child_by_field_name("type") {
            let defines_type = type_node.child_by_field_name("body").is_some();
            let type_anchor = if declarators.is_empty() { anchor } else { node };
            if class_key(type_node.kind()).is_some() && (defines_type || declarators.is_empty()) {
                self.visit_class(type_node, type_anchor, template, None);
            } else if type_node.kind() == "enum_specifier" && defines_type {
                self.visit_enum(type_node, type_anchor, None);
            }
        }

        for (declarator, value) in declarators {
            match syntax::function_declarator(declarator) {
                Some(function) => self.visit_function(node, declarator, function, anchor, template),
                None => self.visit_variable(node, declarator, value, anchor, template),
            }
        }
    }

    fn visit_variable(
        &mut self,
        holder: Node<'t>,
        declarator: Node<'t>,
        value: Option<Node<'t>>,
        anchor: Node<'t>,
        template: Option<&Template<'t>>,
    ) {
        let (Some(type_node), Some(name_node)) = (
            holder.child_by_field_name("type"),
            syntax::declarator_name(declarator),
        ) else {
            return;
        };
        let name = collapse_whitespace(text(name_node, self.source));

        // Out-of-line definition of a static data member
        if name_node.kind() == "qualified_identifier" {
            let key = self.qualify(&strip_scope_arguments(&name, template.is_some()));
            self.attach(&key, anchor);
            return;
        }

        let qualified_name = self.qualify(&name);
        let access = self.current_access();
        let origin = if name_node.is_missing() {
            DeclOrigin::Synthesized
        } else {
            DeclOrigin::Written
        };
        if !self.admit(access, origin, &qualified_name) {
            return;
        }

        let scope = self.scope_names();
        let mut failures: Vec<String> = template.and_then(|t| t.failure.clone()).into_iter().collect();
        let spec = TypeSpec {
            holder,
            type_node,
            declarator: Some(declarator),
        };
        let type_name = Self::render_or_placeholder(
            self.context.render_type(spec, self.source, &scope),
            &mut failures,
        );

        let storage = syntax::specifier_texts(holder, self.source, "storage_class_specifier");
        let qualifiers = syntax::specifier_texts(holder, self.source, "type_qualifier");
        let has = |word: &str| {
            storage.contains(&word) || qualifiers.contains(&word) || syntax::has_token(holder, self.source, word)
        };
        let info = FieldInfo {
            type_name,
            is_static: has("static"),
            is_constexpr: has("constexpr"),
            is_mutable: has("mutable"),
            initializer: value.map(|v| render_tokens(v, self.source)),
        };

        let template_parameters = template.map(Template::rendered).unwrap_or_default();
        let signature = format!(
            "{}{}",
            signature::template_prefix(&template_parameters),
            signature::field(&name, &info)
        );
        let node = ApiNode::new(
            ApiNodeKind::Field(info),
            name,
            qualified_name,
            signature,
            self.location(anchor),
        )
        .with_access(access)
        .with_doc(syntax::doc_comment(anchor, self.source));
        let node = self.flag_failures(node, failures);
        self.record(node);
    }

    fn visit_function_definition(&mut self, node: Node<'t>, template: Option<&Template<'t>>) {
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let Some(function) = syntax::function_declarator(declarator) else {
            trace!("No function declarator at {}:{}", self.path, syntax::line(node));
            return;
        };
        let anchor = template.map_or(node, |t| t.anchor);
        self.visit_function(node, declarator, function, anchor, template);
    }

    /// `holder` is the declaration or definition, `declarator` its top declarator and
    /// `function` the function declarator (or `operator_cast`) inside it.
    fn visit_function(
        &mut self,
        holder: Node<'t>,
        declarator: Node<'t>,
        function: Node<'t>,
        anchor: Node<'t>,
        template: Option<&Template<'t>>,
    ) {
        let source = self.source;
        let is_conversion = function.kind() == "operator_cast";
        let name_node = if is_conversion {
            function
        } else {
            match function.child_by_field_name("declarator") {
                Some(name) => name,
                None => return,
            }
        };
        // Parameters and qualifiers of a conversion live in its abstract declarator
        let shape = if is_conversion {
            function
                .child_by_field_name("declarator")
                .filter(|d| d.kind() == "abstract_function_declarator")
        } else {
            Some(function)
        };

        if name_node.kind() == "qualified_identifier" {
            self.attach_out_of_line(name_node, shape, anchor, template);
            return;
        }

        let scope = self.scope_names();
        let mut failures: Vec<String> = template.and_then(|t| t.failure.clone()).into_iter().collect();
        let in_class = self.current_class().is_some();

        let (name, kind) = match name_node.kind() {
            "destructor_name" => (collapse_whitespace(text(name_node, source)), FunctionKind::Destructor),
            "operator_name" => (render_tokens(name_node, source), FunctionKind::Operator),
            "operator_cast" => {
                let target = match name_node.child_by_field_name("type") {
                    Some(type_node) => {
                        let spec = TypeSpec {
                            holder: name_node,
                            type_node,
                            declarator: shape.and_then(|s| s.child_by_field_name("declarator")),
                        };
                        Self::render_or_placeholder(self.context.render_type(spec, source, &scope), &mut failures)
                    }
                    None => UNKNOWN_TYPE.to_string(),
                };
                (format!("operator {target}"), FunctionKind::Conversion)
            }
            _ => {
                let name = render_tokens(name_node, source);
                let base = name.split('<').next().unwrap_or(&name);
                let is_constructor = self
                    .current_class()
                    .and_then(|c| c.constructor_name.as_deref())
                    .is_some_and(|c| c == base);
                let kind = if is_constructor {
                    FunctionKind::Constructor
                } else if in_class {
                    FunctionKind::Method
                } else {
                    FunctionKind::Free
                };
                (name, kind)
            }
        };

        let qualified_name = self.qualify(&name);
        let access = self.current_access();
        let clause = syntax::method_clause(holder, source);
        let origin = match clause {
            _ if name_node.is_missing() => DeclOrigin::Synthesized,
            Some(MethodClause::Default) => DeclOrigin::Defaulted,
            Some(MethodClause::Delete) => DeclOrigin::Deleted,
            _ => DeclOrigin::Written,
        };
        if !self.admit(access, origin, &qualified_name) {
            return;
        }

        let mut info = FunctionInfo::new(kind);
        info.parameters = self.function_parameters(shape, &scope, &mut failures);
        info.template_parameters = template.map(Template::rendered).unwrap_or_default();

        let trailing = shape.and_then(|s| syntax::child_of_kind(s, "trailing_return_type"));
        if !matches!(
            kind,
            FunctionKind::Constructor | FunctionKind::Destructor | FunctionKind::Conversion
        ) {
            info.return_type = match (trailing, holder.child_by_field_name("type")) {
                (Some(trailing), _) => named_children(trailing).into_iter().next().map(|descriptor| {
                    Self::render_or_placeholder(
                        self.context.render_type_descriptor(descriptor, source, &scope),
                        &mut failures,
                    )
                }),
                (None, Some(type_node)) => {
                    let spec = TypeSpec {
                        holder,
                        type_node,
                        declarator: Some(declarator),
                    };
                    Some(Self::render_or_placeholder(
                        self.context.render_return_type(spec, source, &scope),
                        &mut failures,
                    ))
                }
                (None, None) => None,
            };
        }

        let storage = syntax::specifier_texts(holder, source, "storage_class_specifier");
        let holder_qualifiers = syntax::specifier_texts(holder, source, "type_qualifier");
        info.is_static = storage.contains(&"static");
        info.is_virtual = syntax::has_token(holder, source, "virtual");

        if let Some(explicit) = syntax::child_of_kind(holder, "explicit_function_specifier") {
            info.attributes.push(render_tokens(explicit, source));
        }
        for word in ["constexpr", "consteval"] {
            if holder_qualifiers.contains(&word) || storage.contains(&word) || syntax::has_token(holder, source, word) {
                info.attributes.push(word.to_string());
            }
        }
        if let Some(shape) = shape {
            apply_function_qualifiers(&mut info, shape, source);
        }
        match clause {
            Some(MethodClause::Pure) => info.is_pure = true,
            Some(MethodClause::Default) => info.attributes.push("default".to_string()),
            Some(MethodClause::Delete) => info.attributes.push("delete".to_string()),
            None => {}
        }

        let key = signature::function_key(&qualified_name, &info);
        let signature = signature::function(&name, &info, trailing.is_some());
        let node = ApiNode::new(
            ApiNodeKind::Function(info),
            name,
            qualified_name,
            signature,
            self.location(anchor),
        )
        .with_key(key)
        .with_access(access)
        .with_doc(syntax::doc_comment(anchor, source));
        let node = self.flag_failures(node, failures);
        self.record(node);
    }

    fn function_parameters(
        &mut self,
        shape: Option<Node<'t>>,
        scope: &[String],
        failures: &mut Vec<String>,
    ) -> Vec<ParameterInfo> {
        let Some(list) = shape.and_then(|s| s.child_by_field_name("parameters")) else {
            return Vec::new();
        };
        self.context
            .render_parameters(list, self.source, scope)
            .unwrap_or_else(|e| {
                failures.push(e.to_string());
                vec![ParameterInfo::new(UNKNOWN_TYPE)]
            })
    }

    /// An out-of-line definition (`void C::F(int) {}`) contributes documentation and a
    /// location to the declaration it defines, and never creates a node.
    fn attach_out_of_line(
        &mut self,
        name_node: Node<'t>,
        shape: Option<Node<'t>>,
        anchor: Node<'t>,
        template: Option<&Template<'t>>,
    ) {
        let written = render_tokens(name_node, self.source);
        let relative = strip_scope_arguments(&written, template.is_some());
        let qualified_name = self.qualify(&relative);

        let mut scope = self.scope_names();
        if let Some((prefix, _)) = relative.rsplit_once("::") {
            scope.extend(prefix.split("::").map(str::to_string));
        }

        let mut failures = Vec::new();
        let mut info = FunctionInfo::new(FunctionKind::Method);
        info.parameters = self.function_parameters(shape, &scope, &mut failures);
        if let Some(shape) = shape {
            apply_function_qualifiers(&mut info, shape, self.source);
        }

        let mut key = signature::function_key(&qualified_name, &info);
        let mut attached = self.attach(&key, anchor);
        if !attached {
            if let Some(template) = template {
                info.template_parameters = template.rendered();
                key = signature::function_key(&qualified_name, &info);
                attached = self.attach(&key, anchor);
            }
        }
        if !attached {
            trace!("No recorded declaration for out-of-line definition {}", key);
        }
    }

    fn attach(&mut self, key: &str, anchor: Node<'t>) -> bool {
        let doc = syntax::doc_comment(anchor, self.source);
        let attached = self.builder.attach_metadata(key, doc, self.location(anchor));
        if attached {
            self.stats.merged += 1;
        }
        attached
    }

    fn visit_alias(&mut self, node: Node<'t>, template: Option<&Template<'t>>) {
        let anchor = template.map_or(node, |t| t.anchor);
        match node.kind() {
            "alias_declaration" => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let name = text(name, self.source).trim().to_string();
                let target = node.child_by_field_name("type").and_then(TypeSpec::of);
                self.record_alias(name, target, anchor, template);
            }
            "type_definition" => {
                let Some(type_node) = node.child_by_field_name("type") else {
                    return;
                };
                let declarators = declarators_with_values(node);
                let has_body = type_node.child_by_field_name("body").is_some();
                let is_anonymous = type_node.child_by_field_name("name").is_none();

                // `typedef struct { ... } Name;` names the struct itself
                if has_body && is_anonymous {
                    let first = declarators
                        .first()
                        .and_then(|(d, _)| syntax::declarator_name(*d))
                        .map(|n| text(n, self.source).trim().to_string());
                    if let Some(name) = first {
                        if class_key(type_node.kind()).is_some() {
                            self.visit_class(type_node, anchor, template, Some(name));
                        } else if type_node.kind() == "enum_specifier" {
                            self.visit_enum(type_node, anchor, Some(name));
                        }
                    }
                    return;
                }
                if has_body {
                    if class_key(type_node.kind()).is_some() {
                        self.visit_class(type_node, anchor, template, None);
                    } else if type_node.kind() == "enum_specifier" {
                        self.visit_enum(type_node, anchor, None);
                    }
                }

                for (declarator, _) in declarators {
                    let Some(name) = syntax::declarator_name(declarator) else {
                        continue;
                    };
                    let name = text(name, self.source).trim().to_string();
                    let target = TypeSpec {
                        holder: node,
                        type_node,
                        declarator: Some(declarator),
                    };
                    self.record_alias(name, Some(target), anchor, None);
                }
            }
            _ => {}
        }
    }

    fn record_alias(
        &mut self,
        name: String,
        target: Option<TypeSpec<'t>>,
        anchor: Node<'t>,
        template: Option<&Template<'t>>,
    ) {
        let qualified_name = self.qualify(&name);
        let access = self.current_access();
        if !self.admit(access, DeclOrigin::Written, &qualified_name) {
            return;
        }

        let scope = self.scope_names();
        let mut failures: Vec<String> = template.and_then(|t| t.failure.clone()).into_iter().collect();
        let target = match target {
            Some(spec) => Self::render_or_placeholder(self.context.render_type(spec, self.source, &scope), &mut failures),
            None => {
                failures.push(format!("alias {qualified_name} has no target"));
                UNKNOWN_TYPE.to_string()
            }
        };
        let template_parameters = template.map(Template::rendered).unwrap_or_default();
        let signature = signature::type_alias(&name, &target, &template_parameters);

        let node = ApiNode::new(
            ApiNodeKind::TypeAlias { target },
            name,
            qualified_name,
            signature,
            self.location(anchor),
        )
        .with_access(access)
        .with_doc(syntax::doc_comment(anchor, self.source));
        let node = self.flag_failures(node, failures);
        self.record(node);
    }
}

/// Function qualifiers and trailing specifiers, in signature order.
fn apply_function_qualifiers(info: &mut FunctionInfo, shape: Node, source: &[u8]) {
    let qualifiers = syntax::specifier_texts(shape, source, "type_qualifier");
    info.is_const = qualifiers.contains(&"const");
    if qualifiers.contains(&"volatile") {
        info.attributes.push("volatile".to_string());
    }

    for child in children(shape) {
        match child.kind() {
            "ref_qualifier" => info.ref_qualifier = Some(text(child, source).trim().to_string()),
            "&" | "&&" => info.ref_qualifier = Some(child.kind().to_string()),
            "noexcept" | "throw_specifier" => info.attributes.push(render_tokens(child, source)),
            _ => {}
        }
    }
    for child in children(shape) {
        if child.kind() == "virtual_specifier" {
            info.attributes.push(text(child, source).trim().to_string());
        }
    }
}

pub(crate) fn class_key(kind: &str) -> Option<ClassKey> {
    match kind {
        "class_specifier" => Some(ClassKey::Class),
        "struct_specifier" => Some(ClassKey::Struct),
        "union_specifier" => Some(ClassKey::Union),
        _ => None,
    }
}

/// Name of a class as used in qualified names, and whether it names a specialization.
pub(crate) fn class_name<'t>(
    context: &mut NormalizationContext<'t>,
    node: Node<'t>,
    source: &'t [u8],
    scope: &[String],
) -> NormalizeResult<(String, bool)> {
    match node.kind() {
        "template_type" => Ok((context.render_type_name(node, source, scope)?, true)),
        "qualified_identifier" => {
            let name = context.render_type_name(node, source, scope)?;
            let is_specialization = name.ends_with('>');
            Ok((name, is_specialization))
        }
        _ => Ok((text(node, source).trim().to_string(), false)),
    }
}

/// Segments of a namespace definition's name; `""` for an anonymous namespace.
pub(crate) fn namespace_segments(node: Node, source: &[u8]) -> Vec<String> {
    let Some(name) = node.child_by_field_name("name") else {
        return vec![String::new()];
    };
    let segments: Vec<String> = text(name, source)
        .split("::")
        .map(|s| {
            let s = s.trim();
            s.strip_prefix("inline ").unwrap_or(s).trim().to_string()
        })
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        vec![String::new()]
    } else {
        segments
    }
}

/// Scope segments written in front of a qualified name, template arguments removed
/// (`detail::Impl` → `["detail"]`); `None` for an unqualified name.
fn written_qualifier(name: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = name.trim_start_matches("::").chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ':' if depth == 0 && chars.peek() == Some(&':') => {
                chars.next();
                segments.push(std::mem::take(&mut current).trim().to_string());
            }
            _ if depth == 0 => current.push(c),
            _ => {}
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// Declarators of a declaration with the initializer that belongs to each.
fn declarators_with_values(node: Node) -> Vec<(Node, Option<Node>)> {
    let mut out: Vec<(Node, Option<Node>)> = Vec::new();
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            match cursor.field_name() {
                Some("declarator") => out.push((cursor.node(), None)),
                Some("default_value") => {
                    if let Some(last) = out.last_mut() {
                        last.1 = Some(cursor.node());
                    }
                }
                _ => {}
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    for entry in &mut out {
        if entry.0.kind() == "init_declarator" {
            entry.1 = entry.0.child_by_field_name("value").or(entry.1);
        }
    }
    out
}

/// `C<T>::F` → `C::F` for members of a class template; explicit specializations keep
/// their arguments.
fn strip_scope_arguments(name: &str, templated: bool) -> String {
    let name = name.trim_start_matches("::");
    if !templated {
        return name.to_string();
    }
    let Some((prefix, last)) = name.rsplit_once("::") else {
        return name.to_string();
    };

    let mut stripped = String::with_capacity(prefix.len());
    let mut depth = 0usize;
    for c in prefix.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }
    format!("{stripped}::{last}")
}
