//! Text-level preprocessing ahead of the parser
//!
//! The grammar parses each file on its own and has no preprocessor. To see the
//! declarations a compiler would see, disabled conditional regions are blanked,
//! directives are blanked, `#include`s are reported to the caller (which enters the
//! header and may define more macros), and export-style macros are blanked where they
//! are used. Every transformation replaces text with spaces or empty lines, so line and
//! column numbers of the remaining code are unchanged.

use log::debug;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Expansion depth at which macro evaluation in `#if` gives up
const MAX_EXPANSION_DEPTH: usize = 16;

// __declspec(dllexport), __attribute__((visibility("default"))), [[nodiscard]], ...
static RE_ATTRIBUTE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:__declspec\s*\(.*\)|__attribute__\s*\(\(.*\)\)|\[\[.*\]\]|alignas\s*\(.*\))\s*)+$")
        .unwrap()
});

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub value: String,
    pub is_function_like: bool,
}

/// Macros defined at a point of a translation unit.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    macros: BTreeMap<String, Macro>,

    /// Names blanked wherever they are used, defined or not
    neutralized: BTreeSet<String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with command-line macros.
    pub fn with_predefined(predefined: &BTreeMap<String, String>) -> Self {
        let mut table = Self::new();
        for (name, value) in predefined {
            table.define(name, value);
        }
        table
    }

    pub fn neutralize(&mut self, name: impl Into<String>) {
        self.neutralized.insert(name.into());
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.macros.insert(
            name.to_string(),
            Macro {
                value: value.trim().to_string(),
                is_function_like: false,
            },
        );
    }

    pub fn define_function(&mut self, name: &str, value: &str) {
        self.macros.insert(
            name.to_string(),
            Macro {
                value: value.trim().to_string(),
                is_function_like: true,
            },
        );
    }

    pub fn undefine(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    /// Whether uses of `name` are blanked before parsing.
    ///
    /// Applies to configured names and to object-like macros expanding to nothing or to
    /// an attribute such as `__declspec(dllexport)`.
    pub fn is_neutral(&self, name: &str) -> bool {
        if self.neutralized.contains(name) {
            return true;
        }
        match self.macros.get(name) {
            Some(m) if !m.is_function_like => {
                m.value.is_empty() || RE_ATTRIBUTE_VALUE.is_match(&m.value)
            }
            _ => false,
        }
    }
}

/// An active `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub path: String,

    /// `<...>` rather than `"..."`
    pub angled: bool,

    /// 1-indexed line of the directive
    pub line: usize,
}

/// Output of [`preprocess`].
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    /// Source with the same line structure as the input
    pub text: String,

    /// Active includes, in order
    pub includes: Vec<IncludeDirective>,

    /// Lines blanked because they were inside a disabled region
    pub disabled_lines: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Directive<'a> {
    If(&'a str),
    Ifdef(&'a str),
    Ifndef(&'a str),
    Elif(&'a str),
    Elifdef(&'a str),
    Elifndef(&'a str),
    Else,
    Endif,
    Include(&'a str),
    Define(&'a str),
    Undef(&'a str),
    Other,
}

fn get_directive(logical: &str) -> Directive<'_> {
    let rest = logical.trim_start().trim_start_matches('#').trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (name, args) = rest.split_at(end);
    let args = args.trim();

    match name {
        "if" => Directive::If(args),
        "ifdef" => Directive::Ifdef(args),
        "ifndef" => Directive::Ifndef(args),
        "elif" => Directive::Elif(args),
        "elifdef" => Directive::Elifdef(args),
        "elifndef" => Directive::Elifndef(args),
        "else" => Directive::Else,
        "endif" => Directive::Endif,
        "include" | "include_next" | "import" => Directive::Include(args),
        "define" => Directive::Define(args),
        "undef" => Directive::Undef(args),
        _ => Directive::Other,
    }
}

/// One level of `#if` nesting
#[derive(Debug, Clone)]
struct Frame {
    /// Enclosing region is active
    parent_active: bool,

    /// Some branch of this conditional has already been taken
    taken: bool,

    active: bool,
}

/// Preprocess `source`, updating `macros` as definitions are encountered.
///
/// `on_include` is called for each active `#include` at the point it appears, so
/// macros defined by the included header are visible to the rest of the file.
pub fn preprocess(
    source: &str,
    macros: &mut MacroTable,
    on_include: &mut dyn FnMut(&IncludeDirective, &mut MacroTable),
) -> Preprocessed {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut result = Preprocessed::default();
    let mut in_block_comment = false;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
        let active = stack.last().map_or(true, |f| f.active);

        if !in_block_comment && line.trim_start().starts_with('#') {
            let start = i;
            let mut logical = String::new();
            loop {
                let physical = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
                match physical.strip_suffix('\\') {
                    Some(continued) if i + 1 < lines.len() => {
                        logical.push_str(continued);
                        logical.push(' ');
                        i += 1;
                    }
                    _ => {
                        logical.push_str(physical);
                        break;
                    }
                }
            }
            let logical = strip_comments(&logical);

            match get_directive(&logical) {
                Directive::If(expr) => {
                    let value = active && evaluate_condition(expr, macros);
                    stack.push(Frame {
                        parent_active: active,
                        taken: value,
                        active: value,
                    });
                }
                Directive::Ifdef(name) => {
                    let value = active && macros.is_defined(first_identifier(name));
                    stack.push(Frame {
                        parent_active: active,
                        taken: value,
                        active: value,
                    });
                }
                Directive::Ifndef(name) => {
                    let value = active && !macros.is_defined(first_identifier(name));
                    stack.push(Frame {
                        parent_active: active,
                        taken: value,
                        active: value,
                    });
                }
                directive @ (Directive::Elif(_) | Directive::Elifdef(_) | Directive::Elifndef(_)) => {
                    if let Some(frame) = stack.last_mut() {
                        if frame.parent_active && !frame.taken {
                            let value = match directive {
                                Directive::Elif(expr) => evaluate_condition(expr, macros),
                                Directive::Elifdef(name) => macros.is_defined(first_identifier(name)),
                                Directive::Elifndef(name) => !macros.is_defined(first_identifier(name)),
                                _ => false,
                            };
                            frame.active = value;
                            frame.taken = value;
                        } else {
                            frame.active = false;
                        }
                    }
                }
                Directive::Else => {
                    if let Some(frame) = stack.last_mut() {
                        frame.active = frame.parent_active && !frame.taken;
                        frame.taken = true;
                    }
                }
                Directive::Endif => {
                    stack.pop();
                }
                Directive::Define(body) if active => define(body, macros),
                Directive::Undef(name) if active => macros.undefine(first_identifier(name)),
                Directive::Include(target) if active => {
                    if let Some(include) = parse_include(target, start + 1) {
                        on_include(&include, macros);
                        result.includes.push(include);
                    }
                }
                _ => {}
            }

            for _ in start..=i {
                out.push(String::new());
            }
            i += 1;
            continue;
        }

        if active {
            in_block_comment = update_block_comment(line, in_block_comment);
            out.push(neutralize_line(line, macros));
        } else {
            result.disabled_lines += 1;
            out.push(String::new());
        }
        i += 1;
    }

    result.text = out.join("\n");
    result
}

/// Track whether a line ends inside a `/* */` comment.
fn update_block_comment(line: &str, mut inside: bool) -> bool {
    let bytes = line.as_bytes();
    let mut j = 0;
    while j + 1 < bytes.len() {
        match (inside, bytes[j], bytes[j + 1]) {
            (true, b'*', b'/') => {
                inside = false;
                j += 2;
            }
            (false, b'/', b'*') => {
                inside = true;
                j += 2;
            }
            (false, b'/', b'/') => break,
            _ => j += 1,
        }
    }
    inside
}

fn first_identifier(text: &str) -> &str {
    RE_IDENTIFIER.find(text).map_or("", |m| m.as_str())
}

/// Remove `//` and `/* */` comments from a directive line.
fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match (c, chars.peek()) {
                ('/', Some('/')) => break,
                ('/', Some('*')) => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                    out.push(' ');
                }
                ('"' | '\'', _) => {
                    quote = Some(c);
                    out.push(c);
                }
                _ => out.push(c),
            },
        }
    }
    out.trim_end().to_string()
}

fn define(body: &str, macros: &mut MacroTable) {
    let Some(name) = RE_IDENTIFIER.find(body).filter(|m| m.start() == 0) else {
        debug!("Ignoring malformed #define {body}");
        return;
    };
    let rest = &body[name.end()..];
    if rest.starts_with('(') {
        let value = rest.find(')').map_or("", |close| &rest[close + 1..]);
        macros.define_function(name.as_str(), value);
    } else {
        macros.define(name.as_str(), rest);
    }
}

fn parse_include(target: &str, line: usize) -> Option<IncludeDirective> {
    let target = target.trim();
    let (angled, close) = match target.chars().next()? {
        '"' => (false, '"'),
        '<' => (true, '>'),
        // Computed include
        _ => return None,
    };
    let inner = &target[1..];
    let end = inner.find(close)?;
    Some(IncludeDirective {
        path: inner[..end].to_string(),
        angled,
        line,
    })
}

/// Blank uses of neutral macros on one line of code, keeping columns.
fn neutralize_line(line: &str, macros: &MacroTable) -> String {
    let mut blanks: Vec<(usize, usize)> = Vec::new();
    for m in RE_IDENTIFIER.find_iter(line) {
        if m.start() > 0 && line.as_bytes()[m.start() - 1].is_ascii_digit() {
            continue;
        }
        if !macros.is_neutral(m.as_str()) {
            continue;
        }
        let mut end = m.end();
        let function_like = macros.get(m.as_str()).map_or(true, |def| def.is_function_like);
        let after = &line[end..];
        let trimmed = after.trim_start();
        if function_like && trimmed.starts_with('(') {
            let open = end + (after.len() - trimmed.len());
            end = balanced_close(line, open).unwrap_or(line.len());
        }
        blanks.push((m.start(), end));
    }

    if blanks.is_empty() {
        return line.to_string();
    }

    let mut bytes = line.as_bytes().to_vec();
    for (start, end) in blanks {
        for b in &mut bytes[start..end] {
            *b = b' ';
        }
    }
    // Only whole characters are replaced; ranges are ASCII delimited
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Byte offset just past the `)` matching the `(` at `open`.
fn balanced_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Evaluate a `#if` expression. An expression that cannot be evaluated is false.
pub fn evaluate_condition(expr: &str, macros: &MacroTable) -> bool {
    match evaluate(expr, macros, 0) {
        Ok(value) => value != 0,
        Err(reason) => {
            debug!("Treating unevaluable condition '{expr}' as false: {reason}");
            false
        }
    }
}

fn evaluate(expr: &str, macros: &MacroTable, depth: usize) -> Result<i64, String> {
    if depth > MAX_EXPANSION_DEPTH {
        return Ok(0);
    }
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        macros,
        depth,
    };
    let value = parser.conditional()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected token {:?}", parser.tokens[parser.pos]));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "!", "~", "+", "-", "*", "/", "%", "<", ">",
    "&", "|", "^", "?", ":", "(", ")", ",",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>, String> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;

    'outer: while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'\'') {
                i += 1;
            }
            tokens.push(Tok::Num(parse_number(&expr[start..i])?));
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Tok::Ident(expr[start..i].to_string()));
            continue;
        }
        for op in OPERATORS {
            if expr[i..].starts_with(op) {
                tokens.push(Tok::Op(op));
                i += op.len();
                continue 'outer;
            }
        }
        return Err(format!("unexpected character '{}'", &expr[i..].chars().next().unwrap_or('?')));
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<i64, String> {
    let digits: String = text.chars().filter(|&c| c != '\'').collect();
    let trimmed = digits.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        i64::from_str_radix(&trimmed[1..], 8)
    } else {
        trimmed.parse::<i64>()
    };
    parsed.map_err(|_| format!("invalid number '{text}'"))
}

struct ExprParser<'m> {
    tokens: Vec<Tok>,
    pos: usize,
    macros: &'m MacroTable,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), String> {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{op}'"))
        }
    }

    fn conditional(&mut self) -> Result<i64, String> {
        let condition = self.binary(0)?;
        if self.peek_op() == Some("?") {
            self.pos += 1;
            let then = self.conditional()?;
            self.expect(":")?;
            let otherwise = self.conditional()?;
            return Ok(if condition != 0 { then } else { otherwise });
        }
        Ok(condition)
    }

    fn binary(&mut self, min_level: usize) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_op() {
            let Some(level) = precedence(op) else { break };
            if level < min_level {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok((self.unary()? == 0) as i64)
            }
            Some("~") => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some("-") => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;

        match token {
            Tok::Num(n) => Ok(n),
            Tok::Op("(") => {
                let value = self.conditional()?;
                self.expect(")")?;
                Ok(value)
            }
            Tok::Ident(name) if name == "defined" => {
                let parenthesized = self.peek_op() == Some("(");
                if parenthesized {
                    self.pos += 1;
                }
                let Some(Tok::Ident(target)) = self.tokens.get(self.pos).cloned() else {
                    return Err("expected identifier after 'defined'".to_string());
                };
                self.pos += 1;
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(self.macros.is_defined(&target) as i64)
            }
            Tok::Ident(name) => {
                if self.peek_op() == Some("(") {
                    // Function-like macro or __has_include-style builtin
                    self.skip_arguments()?;
                    return Ok(0);
                }
                match name.as_str() {
                    "true" => Ok(1),
                    "false" => Ok(0),
                    _ => match self.macros.get(&name) {
                        Some(def) if !def.is_function_like && !def.value.is_empty() => {
                            evaluate(&def.value, self.macros, self.depth + 1)
                        }
                        _ => Ok(0),
                    },
                }
            }
            Tok::Op(op) => Err(format!("unexpected '{op}'")),
        }
    }

    fn skip_arguments(&mut self) -> Result<(), String> {
        let mut depth = 0usize;
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            match token {
                Tok::Op("(") => depth += 1,
                Tok::Op(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err("unbalanced parentheses".to_string())
    }
}

fn precedence(op: &str) -> Option<usize> {
    Some(match op {
        "||" => 0,
        "&&" => 1,
        "|" => 2,
        "^" => 3,
        "&" => 4,
        "==" | "!=" => 5,
        "<" | ">" | "<=" | ">=" => 6,
        "<<" | ">>" => 7,
        "+" | "-" => 8,
        "*" | "/" | "%" => 9,
        _ => return None,
    })
}

fn apply(op: &str, lhs: i64, rhs: i64) -> Result<i64, String> {
    Ok(match op {
        "||" => ((lhs != 0) || (rhs != 0)) as i64,
        "&&" => ((lhs != 0) && (rhs != 0)) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        ">" => (lhs > rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => return Err("division by zero".to_string()),
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        _ => return Err(format!("unknown operator '{op}'")),
    })
}
