//! Helpers over tree-sitter-cpp syntax nodes

use tree_sitter::Node;

/// Node kinds that name the entity a declarator declares.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "field_identifier",
    "type_identifier",
    "namespace_identifier",
    "qualified_identifier",
    "destructor_name",
    "operator_name",
    "operator_cast",
    "template_function",
    "template_method",
];

pub fn text<'s>(node: Node, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

pub fn is_name_kind(kind: &str) -> bool {
    NAME_KINDS.contains(&kind)
}

/// Direct child whose kind or text equals `token` (keywords appear as either,
/// depending on the grammar version).
pub fn has_token(node: Node, source: &[u8], token: &str) -> bool {
    children(node)
        .into_iter()
        .any(|c| c.kind() == token || (c.child_count() == 0 && text(c, source) == token))
}

pub fn child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    children(node).into_iter().find(|c| c.kind() == kind)
}

/// Texts of direct children of `kind` (`storage_class_specifier`, `type_qualifier`, ...).
pub fn specifier_texts<'s>(node: Node, source: &'s [u8], kind: &str) -> Vec<&'s str> {
    children(node)
        .into_iter()
        .filter(|c| c.kind() == kind)
        .map(|c| text(c, source).trim())
        .collect()
}

/// The declarator nested inside a declarator (`*p` → `p`).
pub fn inner_declarator(node: Node) -> Option<Node> {
    if let Some(inner) = node.child_by_field_name("declarator") {
        return Some(inner);
    }
    named_children(node).into_iter().rev().find(|c| {
        !matches!(
            c.kind(),
            "type_qualifier"
                | "parameter_list"
                | "attribute_specifier"
                | "attribute_declaration"
                | "ms_pointer_modifier"
                | "ms_based_modifier"
                | "virtual_specifier"
                | "noexcept"
                | "throw_specifier"
                | "trailing_return_type"
                | "ref_qualifier"
                | "requires_clause"
        )
    })
}

/// The node naming the entity, found by following nested declarators.
pub fn declarator_name(node: Node) -> Option<Node> {
    let mut current = node;
    for _ in 0..32 {
        if is_name_kind(current.kind()) {
            return Some(current);
        }
        current = inner_declarator(current)?;
    }
    None
}

/// The function declarator of a function declaration, if the declarator declares a
/// function (and not, say, a function pointer variable).
pub fn function_declarator(node: Node) -> Option<Node> {
    let mut current = node;
    for _ in 0..32 {
        match current.kind() {
            "function_declarator" => {
                let inner = current.child_by_field_name("declarator")?;
                return is_name_kind(inner.kind()).then_some(current);
            }
            "operator_cast" => return Some(current),
            "pointer_declarator" | "reference_declarator" | "attributed_declarator" | "init_declarator" => {
                current = inner_declarator(current)?;
            }
            _ => return None,
        }
    }
    None
}

/// `= 0`, `= default` or `= delete` following a function declarator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClause {
    Pure,
    Default,
    Delete,
}

pub fn method_clause(node: Node, source: &[u8]) -> Option<MethodClause> {
    let kids = children(node);
    for (i, child) in kids.iter().enumerate() {
        match child.kind() {
            "pure_virtual_clause" => return Some(MethodClause::Pure),
            "default_method_clause" => return Some(MethodClause::Default),
            "delete_method_clause" => return Some(MethodClause::Delete),
            "=" => {
                let next = kids.get(i + 1).map(|n| text(*n, source).trim());
                match next {
                    Some("0") => return Some(MethodClause::Pure),
                    Some("default") => return Some(MethodClause::Default),
                    Some("delete") => return Some(MethodClause::Delete),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    if let Some(value) = node.child_by_field_name("default_value") {
        if text(value, source).trim() == "0" {
            return Some(MethodClause::Pure);
        }
    }
    None
}

fn is_doc_comment(comment: &str) -> bool {
    (comment.starts_with("///") && !comment.starts_with("////"))
        || comment.starts_with("//!")
        || (comment.starts_with("/**") && comment != "/**/")
        || comment.starts_with("/*!")
}

fn is_trailing_doc(comment: &str) -> bool {
    ["///<", "//!<", "/**<", "/*!<"]
        .iter()
        .any(|p| comment.starts_with(p))
}

/// Documentation of the declaration at `anchor`: the contiguous block of doc comments
/// directly above it, plus a trailing `///<` comment on its last line.
pub fn doc_comment(anchor: Node, source: &[u8]) -> Option<String> {
    let mut block = Vec::new();
    let mut below_row = anchor.start_position().row;
    let mut current = anchor.prev_sibling();

    while let Some(comment) = current {
        if comment.kind() != "comment" || comment.end_position().row + 1 < below_row {
            break;
        }
        let body = text(comment, source).trim();
        if !is_doc_comment(body) || is_trailing_doc(body) {
            break;
        }
        // Trailing comment of the previous declaration
        if let Some(before) = comment.prev_sibling() {
            if before.kind() != "comment" && before.end_position().row == comment.start_position().row {
                break;
            }
        }
        block.push(body.to_string());
        below_row = comment.start_position().row;
        current = comment.prev_sibling();
    }
    block.reverse();

    let last_row = anchor.end_position().row;
    let mut next = anchor.next_sibling();
    if next.is_some_and(|n| matches!(n.kind(), "," | ";")) {
        next = next.and_then(|n| n.next_sibling());
    }
    if let Some(comment) = next {
        let body = text(comment, source).trim();
        if comment.kind() == "comment"
            && comment.start_position().row == last_row
            && is_trailing_doc(body)
        {
            block.push(body.to_string());
        }
    }

    (!block.is_empty()).then(|| block.join("\n"))
}

/// 1-indexed line of a node.
pub fn line(node: Node) -> usize {
    node.start_position().row + 1
}
