//! Name and type normalizer
//!
//! Renders types, parameter lists and template parameter lists from the syntax tree
//! into one canonical textual form, so that different spellings of the same type
//! (`char const*` and `const char *`) produce identical signatures.
//!
//! Aliases that are hidden from consumers (declared in a detail namespace, a private
//! section or an anonymous namespace) are replaced by their target wherever a visible
//! declaration mentions them. Visible aliases keep their name.

pub mod signature;
pub mod tokens;

use log::trace;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tree_sitter::Node;

use apiview::{ParameterInfo, TemplateParameterKind};

use crate::syntax::{children, named_children, text};
pub use tokens::{collapse_whitespace, render_tokens};

/// Signature placeholder for a type that could not be rendered.
pub const UNKNOWN_TYPE: &str = "<unknown>";

/// Alias resolution depth; deeper chains keep the alias name.
const MAX_ALIAS_DEPTH: usize = 16;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// A type or declarator shape the normalizer cannot render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported(pub String);

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot normalize {}", self.0)
    }
}

pub type NormalizeResult<T> = Result<T, Unsupported>;

/// A type as it appears in a declaration: the node carrying the cv-qualifiers, the
/// type specifier, and the (possibly abstract) declarator wrapped around the name.
#[derive(Debug, Clone, Copy)]
pub struct TypeSpec<'t> {
    pub holder: Node<'t>,
    pub type_node: Node<'t>,
    pub declarator: Option<Node<'t>>,
}

impl<'t> TypeSpec<'t> {
    /// The type of a declaration-like node (`declaration`, `parameter_declaration`,
    /// `type_descriptor`, ...).
    pub fn of(holder: Node<'t>) -> Option<Self> {
        Some(Self {
            holder,
            type_node: holder.child_by_field_name("type")?,
            declarator: holder.child_by_field_name("declarator"),
        })
    }
}

/// An alias excluded from the API surface.
#[derive(Debug, Clone)]
pub struct HiddenAlias<'t> {
    pub target: TypeSpec<'t>,
    pub source: &'t [u8],

    /// Scope the target is written in, for resolving names inside it
    pub scope: Vec<String>,

    /// Parameter names of an alias template
    pub template_parameters: Vec<String>,
}

/// One rendered template parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParam {
    pub name: Option<String>,
    pub kind: TemplateParameterKind,
    pub is_variadic: bool,
    pub default_value: Option<String>,

    /// Canonical text, e.g. `typename T = int`
    pub rendered: String,
}

/// Per-translation-unit normalization state.
#[derive(Debug, Default)]
pub struct NormalizationContext<'t> {
    hidden: HashMap<String, HiddenAlias<'t>>,

    /// Resolved targets of non-template hidden aliases
    resolved: HashMap<String, String>,

    /// Aliases being resolved right now
    resolving: HashSet<String>,
}

impl<'t> NormalizationContext<'t> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hidden_alias(&mut self, qualified_name: impl Into<String>, alias: HiddenAlias<'t>) {
        let qualified_name = qualified_name.into();
        trace!("Hidden alias {}", qualified_name);
        self.hidden.entry(qualified_name).or_insert(alias);
    }

    pub fn is_hidden_alias(&self, qualified_name: &str) -> bool {
        self.hidden.contains_key(qualified_name)
    }

    pub fn hidden_alias_count(&self) -> usize {
        self.hidden.len()
    }

    /// Canonical text of a type.
    pub fn render_type(&mut self, spec: TypeSpec<'t>, source: &'t [u8], scope: &[String]) -> NormalizeResult<String> {
        self.render_type_at(spec, source, scope, false)
    }

    /// Canonical text of a function's return type: everything the declarator wraps
    /// around the function declarator (`const char* f()` → `const char*`).
    pub fn render_return_type(
        &mut self,
        spec: TypeSpec<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<String> {
        self.render_type_at(spec, source, scope, true)
    }

    fn render_type_at(
        &mut self,
        spec: TypeSpec<'t>,
        source: &'t [u8],
        scope: &[String],
        stop_at_function: bool,
    ) -> NormalizeResult<String> {
        if spec.type_node.has_error() || spec.type_node.is_missing() {
            return Err(Unsupported(format!("type `{}`", text(spec.type_node, source).trim())));
        }

        let base = self.render_base(spec.type_node, source, scope)?;
        let cv = cv_qualifiers(spec.holder, source);
        let base = if cv.is_empty() {
            base
        } else {
            format!("{} {}", cv.join(" "), base)
        };

        let suffix = match spec.declarator {
            Some(declarator) => self.render_declarator(declarator, source, scope, stop_at_function)?,
            None => String::new(),
        };
        Ok(join_declarator(base, &suffix))
    }

    /// Canonical text of a bare type name (`std::vector<int>`), as in a base clause.
    pub fn render_type_name(&mut self, node: Node<'t>, source: &'t [u8], scope: &[String]) -> NormalizeResult<String> {
        if node.has_error() {
            return Err(Unsupported(format!("type `{}`", text(node, source).trim())));
        }
        self.render_base(node, source, scope)
    }

    fn render_base(&mut self, node: Node<'t>, source: &'t [u8], scope: &[String]) -> NormalizeResult<String> {
        match node.kind() {
            "primitive_type" | "auto" => Ok(text(node, source).trim().to_string()),
            "sized_type_specifier" => Ok(canonical_sized_type(node, source)),
            "type_identifier" => self.resolve_alias(text(node, source).trim(), None, scope),
            "qualified_identifier" => {
                let (name, arguments) = self.flatten_qualified(node, source, scope)?;
                self.resolve_alias(&name, arguments, scope)
            }
            "template_type" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| text(n, source).trim().to_string())
                    .unwrap_or_default();
                let arguments = match node.child_by_field_name("arguments") {
                    Some(list) => self.render_template_arguments(list, source, scope)?,
                    None => Vec::new(),
                };
                self.resolve_alias(&name, Some(arguments), scope)
            }
            "struct_specifier" | "class_specifier" | "union_specifier" | "enum_specifier" => {
                let keyword = children(node)
                    .first()
                    .map(|k| text(*k, source).trim().to_string())
                    .unwrap_or_default();
                match node.child_by_field_name("name") {
                    Some(name) => Ok(format!("{} {}", keyword, self.render_base(name, source, scope)?)),
                    None => Ok(keyword),
                }
            }
            "dependent_type" => {
                let inner = named_children(node)
                    .into_iter()
                    .next()
                    .ok_or_else(|| Unsupported("empty dependent type".to_string()))?;
                Ok(format!("typename {}", self.render_base(inner, source, scope)?))
            }
            "ERROR" => Err(Unsupported(format!("type `{}`", text(node, source).trim()))),
            _ => Ok(render_tokens(node, source)),
        }
    }

    /// `A::B<int>::C` → (`A::B<int>::C`, None); `A::Vec<int>` → (`A::Vec`, Some([int])).
    fn flatten_qualified(
        &mut self,
        node: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<(String, Option<Vec<String>>)> {
        let mut prefix = String::new();
        let mut current = node;
        loop {
            if text(current, source).trim_start().starts_with("::") && prefix.is_empty() {
                prefix.push_str("::");
            }
            if let Some(scope_node) = current.child_by_field_name("scope") {
                let rendered = match scope_node.kind() {
                    "template_type" => self.render_base(scope_node, source, scope)?,
                    _ => text(scope_node, source).trim().to_string(),
                };
                prefix.push_str(&rendered);
                prefix.push_str("::");
            }
            let Some(name) = current.child_by_field_name("name") else {
                return Ok((format!("{}{}", prefix, text(current, source).trim()), None));
            };
            match name.kind() {
                "qualified_identifier" => current = name,
                "template_type" => {
                    let base = name
                        .child_by_field_name("name")
                        .map(|n| text(n, source).trim().to_string())
                        .unwrap_or_default();
                    let arguments = match name.child_by_field_name("arguments") {
                        Some(list) => self.render_template_arguments(list, source, scope)?,
                        None => Vec::new(),
                    };
                    return Ok((format!("{prefix}{base}"), Some(arguments)));
                }
                "ERROR" => return Err(Unsupported(format!("name `{}`", text(name, source)))),
                _ => return Ok((format!("{}{}", prefix, text(name, source).trim()), None)),
            }
        }
    }

    pub fn render_template_arguments(
        &mut self,
        list: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<Vec<String>> {
        let mut arguments = Vec::new();
        for argument in named_children(list) {
            let rendered = match argument.kind() {
                "type_descriptor" => self.render_type_descriptor(argument, source, scope)?,
                "ERROR" => return Err(Unsupported(format!("template argument `{}`", text(argument, source)))),
                _ => render_tokens(argument, source),
            };
            arguments.push(rendered);
        }
        Ok(arguments)
    }

    pub fn render_type_descriptor(
        &mut self,
        node: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<String> {
        let spec = TypeSpec::of(node).ok_or_else(|| Unsupported(format!("type `{}`", text(node, source))))?;
        self.render_type(spec, source, scope)
    }

    /// Replace a hidden alias by its target; any other name is kept as written.
    fn resolve_alias(&mut self, name: &str, arguments: Option<Vec<String>>, scope: &[String]) -> NormalizeResult<String> {
        let as_written = match &arguments {
            Some(arguments) => format!("{}<{}>", name, arguments.join(", ")),
            None => name.to_string(),
        };
        if self.hidden.is_empty() || self.resolving.len() >= MAX_ALIAS_DEPTH {
            return Ok(as_written);
        }

        let Some(qualified) = self.lookup(name, scope) else {
            return Ok(as_written);
        };
        if self.resolving.contains(&qualified) {
            return Ok(as_written);
        }
        let Some(alias) = self.hidden.get(&qualified).cloned() else {
            return Ok(as_written);
        };

        if alias.template_parameters.is_empty() {
            if let Some(done) = self.resolved.get(&qualified) {
                return Ok(done.clone());
            }
        }

        self.resolving.insert(qualified.clone());
        let target = self.render_type(alias.target, alias.source, &alias.scope);
        self.resolving.remove(&qualified);
        let target = target?;

        if alias.template_parameters.is_empty() {
            self.resolved.insert(qualified, target.clone());
            return Ok(target);
        }
        let arguments = arguments.unwrap_or_default();
        Ok(substitute(&target, &alias.template_parameters, &arguments))
    }

    /// Qualified name of the hidden alias `name` refers to from `scope`, innermost
    /// scope first.
    fn lookup(&self, name: &str, scope: &[String]) -> Option<String> {
        if let Some(absolute) = name.strip_prefix("::") {
            return self.hidden.contains_key(absolute).then(|| absolute.to_string());
        }
        (0..=scope.len()).rev().find_map(|depth| {
            let candidate = if depth == 0 {
                name.to_string()
            } else {
                format!("{}::{}", scope[..depth].join("::"), name)
            };
            self.hidden.contains_key(&candidate).then_some(candidate)
        })
    }

    /// Textual suffix contributed by a declarator, with the declared name removed.
    fn render_declarator(
        &mut self,
        node: Node<'t>,
        source: &'t [u8],
        scope: &[String],
        stop_at_function: bool,
    ) -> NormalizeResult<String> {
        let kind = node.kind();
        if crate::syntax::is_name_kind(kind) {
            return Ok(String::new());
        }

        let inner = |this: &mut Self| -> NormalizeResult<String> {
            match crate::syntax::inner_declarator(node) {
                Some(nested) => this.render_declarator(nested, source, scope, stop_at_function),
                None => Ok(String::new()),
            }
        };

        match kind {
            "pointer_declarator" | "abstract_pointer_declarator" => {
                let mut out = String::from("*");
                for qualifier in cv_qualifiers(node, source) {
                    out.push(' ');
                    out.push_str(qualifier);
                }
                let rest = inner(self)?;
                if !rest.is_empty() && out.len() > 1 && !rest.starts_with('*') {
                    out.push(' ');
                }
                out.push_str(&rest);
                Ok(out)
            }
            "reference_declarator" | "abstract_reference_declarator" => {
                let operator = children(node)
                    .into_iter()
                    .map(|c| text(c, source))
                    .find(|t| *t == "&" || *t == "&&")
                    .unwrap_or("&");
                Ok(format!("{}{}", operator, inner(self)?))
            }
            "array_declarator" | "abstract_array_declarator" => {
                let size = node
                    .child_by_field_name("size")
                    .map(|s| render_tokens(s, source))
                    .unwrap_or_default();
                Ok(format!("{}[{}]", inner(self)?, size))
            }
            "function_declarator" | "abstract_function_declarator" => {
                let target = crate::syntax::inner_declarator(node)
                    .filter(|d| d.kind() != "parameter_list");
                if stop_at_function && target.is_some_and(|d| crate::syntax::is_name_kind(d.kind())) {
                    return Ok(String::new());
                }
                let parameters = match node.child_by_field_name("parameters") {
                    Some(list) => self.render_parameters(list, source, scope)?,
                    None => Vec::new(),
                };
                let mut out = match target {
                    Some(target) => self.render_declarator(target, source, scope, stop_at_function)?,
                    None => String::new(),
                };
                out.push('(');
                out.push_str(&signature::parameter_types(&parameters));
                out.push(')');
                for qualifier in cv_qualifiers(node, source) {
                    out.push(' ');
                    out.push_str(qualifier);
                }
                if let Some(noexcept) = crate::syntax::child_of_kind(node, "noexcept") {
                    out.push(' ');
                    out.push_str(&render_tokens(noexcept, source));
                }
                Ok(out)
            }
            "parenthesized_declarator" | "abstract_parenthesized_declarator" => Ok(format!("({})", inner(self)?)),
            "init_declarator" | "attributed_declarator" => inner(self),
            "variadic_declarator" => Ok("...".to_string()),
            _ => Err(Unsupported(format!("declarator `{}`", text(node, source).trim()))),
        }
    }

    /// Parameters of a `parameter_list`, names stripped, defaults as written.
    pub fn render_parameters(
        &mut self,
        list: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<Vec<ParameterInfo>> {
        let mut parameters = Vec::new();
        for child in children(list) {
            match child.kind() {
                "parameter_declaration" | "optional_parameter_declaration" | "variadic_parameter_declaration" => {
                    let spec = TypeSpec::of(child)
                        .ok_or_else(|| Unsupported(format!("parameter `{}`", text(child, source))))?;
                    let type_name = self.render_type(spec, source, scope)?;
                    let mut parameter = ParameterInfo::new(type_name);
                    if let Some(value) = child.child_by_field_name("default_value") {
                        parameter = parameter.with_default(render_tokens(value, source));
                    }
                    parameters.push(parameter);
                }
                "..." => parameters.push(ParameterInfo::new("...")),
                "ERROR" => return Err(Unsupported(format!("parameter list `{}`", text(list, source)))),
                _ => {}
            }
        }

        if parameters.len() == 1 && parameters[0].type_name == "void" && parameters[0].default_value.is_none() {
            parameters.clear();
        }
        Ok(parameters)
    }

    /// Parameters of a `template_parameter_list`.
    pub fn render_template_parameters(
        &mut self,
        list: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<Vec<TemplateParam>> {
        named_children(list)
            .into_iter()
            .map(|parameter| self.render_template_parameter(parameter, source, scope))
            .collect()
    }

    fn render_template_parameter(
        &mut self,
        node: Node<'t>,
        source: &'t [u8],
        scope: &[String],
    ) -> NormalizeResult<TemplateParam> {
        let identifier = |n: Node<'t>| {
            named_children(n)
                .into_iter()
                .find(|c| c.kind() == "type_identifier" || c.kind() == "identifier")
                .map(|c| text(c, source).trim().to_string())
        };

        let param = match node.kind() {
            "type_parameter_declaration" => {
                let name = identifier(node);
                TemplateParam {
                    rendered: keyword_and_name("typename", "", name.as_deref()),
                    name,
                    kind: TemplateParameterKind::Type,
                    is_variadic: false,
                    default_value: None,
                }
            }
            "variadic_type_parameter_declaration" => {
                let name = identifier(node);
                TemplateParam {
                    rendered: keyword_and_name("typename", "...", name.as_deref()),
                    name,
                    kind: TemplateParameterKind::Type,
                    is_variadic: true,
                    default_value: None,
                }
            }
            "optional_type_parameter_declaration" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| text(n, source).trim().to_string());
                let default = match node.child_by_field_name("default_type") {
                    Some(default) => Some(self.render_base_as_type(default, source, scope)?),
                    None => None,
                };
                let mut rendered = keyword_and_name("typename", "", name.as_deref());
                if let Some(default) = &default {
                    rendered.push_str(" = ");
                    rendered.push_str(default);
                }
                TemplateParam {
                    name,
                    kind: TemplateParameterKind::Type,
                    is_variadic: false,
                    default_value: default,
                    rendered,
                }
            }
            "parameter_declaration" | "optional_parameter_declaration" | "variadic_parameter_declaration" => {
                let spec = TypeSpec::of(node)
                    .ok_or_else(|| Unsupported(format!("template parameter `{}`", text(node, source))))?;
                let type_name = self.render_type(spec, source, scope)?;
                let name = spec
                    .declarator
                    .and_then(crate::syntax::declarator_name)
                    .map(|n| text(n, source).trim().to_string());
                let is_variadic = node.kind() == "variadic_parameter_declaration";
                let default = node
                    .child_by_field_name("default_value")
                    .map(|v| render_tokens(v, source));

                let mut rendered = type_name;
                if let Some(name) = &name {
                    rendered.push(' ');
                    rendered.push_str(name);
                }
                if let Some(default) = &default {
                    rendered.push_str(" = ");
                    rendered.push_str(default);
                }
                TemplateParam {
                    name,
                    kind: TemplateParameterKind::NonType,
                    is_variadic,
                    default_value: default,
                    rendered,
                }
            }
            "template_template_parameter_declaration" => {
                let inner = match node.child_by_field_name("parameters") {
                    Some(list) => self.render_template_parameters(list, source, scope)?,
                    None => match crate::syntax::child_of_kind(node, "template_parameter_list") {
                        Some(list) => self.render_template_parameters(list, source, scope)?,
                        None => Vec::new(),
                    },
                };
                let declared = named_children(node)
                    .into_iter()
                    .rev()
                    .find(|c| c.kind() != "template_parameter_list")
                    .map(|c| self.render_template_parameter(c, source, scope))
                    .transpose()?;

                let (name, is_variadic, default_value) = match &declared {
                    Some(p) => (p.name.clone(), p.is_variadic, p.default_value.clone()),
                    None => (None, false, None),
                };
                let mut rendered = format!("template <{}> ", signature::join_template_parameters(&inner));
                rendered.push_str(&keyword_and_name("class", if is_variadic { "..." } else { "" }, name.as_deref()));
                if let Some(default) = &default_value {
                    rendered.push_str(" = ");
                    rendered.push_str(default);
                }
                TemplateParam {
                    name,
                    kind: TemplateParameterKind::Template,
                    is_variadic,
                    default_value,
                    rendered,
                }
            }
            _ => return Err(Unsupported(format!("template parameter `{}`", text(node, source).trim()))),
        };
        Ok(param)
    }

    fn render_base_as_type(&mut self, node: Node<'t>, source: &'t [u8], scope: &[String]) -> NormalizeResult<String> {
        match node.kind() {
            "type_descriptor" => self.render_type_descriptor(node, source, scope),
            _ => self.render_base(node, source, scope),
        }
    }
}

fn keyword_and_name(keyword: &str, ellipsis: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{keyword}{ellipsis} {name}"),
        None => format!("{keyword}{ellipsis}"),
    }
}

/// `const` then `volatile`, from the direct `type_qualifier` children of `node`.
fn cv_qualifiers(node: Node, source: &[u8]) -> Vec<&'static str> {
    let qualifiers = crate::syntax::specifier_texts(node, source, "type_qualifier");
    ["const", "volatile"]
        .into_iter()
        .filter(|q| qualifiers.contains(q))
        .collect()
}

/// Attach a declarator suffix to a base type. Pointers and references bind to the base;
/// a parenthesized suffix (function pointer) is separated by a space.
fn join_declarator(base: String, suffix: &str) -> String {
    if suffix.is_empty() {
        base
    } else if suffix.starts_with('(') {
        format!("{base} {suffix}")
    } else {
        format!("{base}{suffix}")
    }
}

/// Canonical spelling of an integer type written with size/sign modifiers.
fn canonical_sized_type(node: Node, source: &[u8]) -> String {
    let words: Vec<&str> = text(node, source).split_whitespace().collect();
    let count = |word: &str| words.iter().filter(|w| **w == word).count();

    let unsigned = count("unsigned") > 0;
    let signed = count("signed") > 0;
    let longs = count("long");
    let short = count("short") > 0;
    let base = words
        .iter()
        .copied()
        .find(|w| !matches!(*w, "unsigned" | "signed" | "long" | "short" | "int" | "const" | "volatile"))
        .map(str::to_string);

    let mut parts: Vec<&str> = Vec::new();
    match base.as_deref() {
        Some("char") => {
            if unsigned {
                parts.push("unsigned");
            } else if signed {
                parts.push("signed");
            }
            parts.push("char");
        }
        Some("double") => {
            parts.extend(std::iter::repeat("long").take(longs));
            parts.push("double");
        }
        Some(_) => {
            // Unknown combination; keep it as written
            return words.join(" ");
        }
        None => {
            if unsigned {
                parts.push("unsigned");
            }
            if short {
                parts.push("short");
            } else if longs > 0 {
                parts.extend(std::iter::repeat("long").take(longs));
            } else {
                parts.push("int");
            }
        }
    }
    parts.join(" ")
}

/// Substitute alias template parameters by the supplied arguments, token-wise and in a
/// single pass.
fn substitute(target: &str, parameters: &[String], arguments: &[String]) -> String {
    IDENTIFIER_RE
        .replace_all(target, |captures: &regex::Captures| {
            let word = &captures[0];
            match parameters.iter().position(|p| p == word) {
                Some(i) => arguments.get(i).cloned().unwrap_or_else(|| word.to_string()),
                None => word.to_string(),
            }
        })
        .into_owned()
}
