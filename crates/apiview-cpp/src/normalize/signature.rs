//! Signature and overload-key formats.

use apiview::{ClassInfo, EnumInfo, FieldInfo, FunctionInfo, ParameterInfo};

use super::TemplateParam;

/// Function specifiers written before the return type.
const LEADING_ATTRIBUTES: &[&str] = &["explicit", "constexpr", "consteval"];

/// Parameter types without defaults: `int, const char*`.
pub fn parameter_types(parameters: &[ParameterInfo]) -> String {
    parameters
        .iter()
        .map(|p| p.type_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parameters with defaults: `int, double = 1.0`.
pub fn parameter_list(parameters: &[ParameterInfo]) -> String {
    parameters
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn join_template_parameters(parameters: &[TemplateParam]) -> String {
    parameters
        .iter()
        .map(|p| p.rendered.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `template <typename T> ` or nothing.
pub fn template_prefix(parameters: &[String]) -> String {
    if parameters.is_empty() {
        String::new()
    } else {
        format!("template <{}> ", parameters.join(", "))
    }
}

pub fn namespace(name: &str, is_inline: bool) -> String {
    if is_inline {
        format!("inline namespace {name}")
    } else {
        format!("namespace {name}")
    }
}

/// `name` includes specialization arguments (`Vec<bool>`).
pub fn class(name: &str, info: &ClassInfo) -> String {
    let mut out = template_prefix(&info.template_parameters);
    if info.is_specialization && info.template_parameters.is_empty() {
        out.push_str("template <> ");
    }
    out.push_str(info.key.as_str());
    out.push(' ');
    out.push_str(name);
    if info.is_final {
        out.push_str(" final");
    }
    if !info.bases.is_empty() {
        let bases: Vec<String> = info.bases.iter().map(ToString::to_string).collect();
        out.push_str(" : ");
        out.push_str(&bases.join(", "));
    }
    out
}

pub fn enumeration(name: &str, info: &EnumInfo) -> String {
    let mut out = String::from("enum ");
    if info.is_scoped {
        out.push_str("class ");
    }
    out.push_str(name);
    if let Some(underlying) = &info.underlying_type {
        out.push_str(" : ");
        out.push_str(underlying);
    }
    out
}

/// Full function signature. `trailing_return` renders `auto name(...) -> R`.
pub fn function(name: &str, info: &FunctionInfo, trailing_return: bool) -> String {
    let mut out = template_prefix(&info.template_parameters);
    if info.is_static {
        out.push_str("static ");
    }
    if info.is_virtual {
        out.push_str("virtual ");
    }
    for attribute in &info.attributes {
        if LEADING_ATTRIBUTES.contains(&attribute.as_str()) {
            out.push_str(attribute);
            out.push(' ');
        }
    }

    match (&info.return_type, trailing_return) {
        (Some(_), true) => out.push_str("auto "),
        (Some(return_type), false) => {
            out.push_str(return_type);
            out.push(' ');
        }
        (None, _) => {}
    }

    out.push_str(name);
    out.push('(');
    out.push_str(&parameter_list(&info.parameters));
    out.push(')');
    out.push_str(&qualifiers(info));

    let trailing: Vec<&str> = info
        .attributes
        .iter()
        .map(String::as_str)
        .filter(|a| !LEADING_ATTRIBUTES.contains(a) && !matches!(*a, "default" | "delete" | "volatile"))
        .collect();
    for attribute in trailing.iter().filter(|a| a.starts_with("noexcept")) {
        out.push(' ');
        out.push_str(attribute);
    }
    if let (Some(return_type), true) = (&info.return_type, trailing_return) {
        out.push_str(" -> ");
        out.push_str(return_type);
    }
    for attribute in trailing.iter().filter(|a| !a.starts_with("noexcept")) {
        out.push(' ');
        out.push_str(attribute);
    }

    if info.is_pure {
        out.push_str(" = 0");
    } else if info.has_attribute("default") {
        out.push_str(" = default");
    } else if info.has_attribute("delete") {
        out.push_str(" = delete");
    }
    out
}

/// ` const`, ` volatile`, ` &`, ` &&`.
fn qualifiers(info: &FunctionInfo) -> String {
    let mut out = String::new();
    if info.is_const {
        out.push_str(" const");
    }
    if info.has_attribute("volatile") {
        out.push_str(" volatile");
    }
    if let Some(reference) = &info.ref_qualifier {
        out.push(' ');
        out.push_str(reference);
    }
    out
}

/// Overload key of a function: qualified name, parameter types and qualifiers.
/// Function templates carry their template parameter list so that a template and a
/// non-template with the same parameters stay distinct.
pub fn function_key(qualified_name: &str, info: &FunctionInfo) -> String {
    format!(
        "{}{}({}){}",
        template_prefix(&info.template_parameters),
        qualified_name,
        parameter_types(&info.parameters),
        qualifiers(info)
    )
}

pub fn field(name: &str, info: &FieldInfo) -> String {
    let mut out = String::new();
    if info.is_static {
        out.push_str("static ");
    }
    if info.is_constexpr {
        out.push_str("constexpr ");
    }
    if info.is_mutable {
        out.push_str("mutable ");
    }
    out.push_str(&info.type_name);
    out.push(' ');
    out.push_str(name);
    if let Some(initializer) = &info.initializer {
        out.push_str(" = ");
        out.push_str(initializer);
    }
    out
}

pub fn type_alias(name: &str, target: &str, template_parameters: &[String]) -> String {
    format!("{}using {} = {}", template_prefix(template_parameters), name, target)
}
