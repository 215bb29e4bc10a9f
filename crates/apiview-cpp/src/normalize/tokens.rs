//! Whitespace-insensitive rendering of expressions and token runs.

use tree_sitter::Node;

use crate::syntax::{children, text};

/// Kinds rendered verbatim as a single token.
const ATOMIC_KINDS: &[&str] = &[
    "string_literal",
    "raw_string_literal",
    "char_literal",
    "number_literal",
    "user_defined_literal",
    "system_lib_string",
];

/// Render the tokens below `node` with canonical spacing: a space between two word
/// tokens, after `,`, and around binary, assignment and conditional operators.
pub fn render_tokens(node: Node, source: &[u8]) -> String {
    let mut out = String::new();
    push_node(node, source, &mut out);
    out
}

fn push_node(node: Node, source: &[u8], out: &mut String) {
    let kind = node.kind();
    if kind == "comment" {
        return;
    }
    if ATOMIC_KINDS.contains(&kind) || node.child_count() == 0 {
        push_token(out, text(node, source).trim());
        return;
    }

    match kind {
        "binary_expression" | "assignment_expression" => {
            let operator = node.child_by_field_name("operator");
            for child in children(node) {
                if Some(child) == operator {
                    push_operator(out, text(child, source));
                } else {
                    push_node(child, source, out);
                }
            }
        }
        "conditional_expression" => {
            for child in children(node) {
                match child.kind() {
                    "?" | ":" => push_operator(out, text(child, source)),
                    _ => push_node(child, source, out),
                }
            }
        }
        "concatenated_string" => {
            for (i, child) in children(node).into_iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                push_node(child, source, out);
            }
        }
        _ => {
            for child in children(node) {
                push_node(child, source, out);
            }
        }
    }
}

fn push_operator(out: &mut String, operator: &str) {
    while out.ends_with(' ') {
        out.pop();
    }
    out.push(' ');
    out.push_str(operator.trim());
    out.push(' ');
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub(crate) fn push_token(out: &mut String, token: &str) {
    if token.is_empty() {
        return;
    }
    let needs_space = match (out.chars().last(), token.chars().next()) {
        (Some(last), Some(first)) => (is_word(last) && is_word(first)) || last == ',',
        _ => false,
    };
    if needs_space {
        out.push(' ');
    }
    out.push_str(token);
}

/// Collapse runs of whitespace outside string and character literals.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in text.chars() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
    out
}
