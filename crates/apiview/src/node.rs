//! API model nodes.
//!
//! Every declaration that is part of a library's public contract is represented by one
//! [`ApiNode`]. The node kind is a closed enum ([`ApiNodeKind`]) so that consumers which
//! render the model (serializers, diff tools) handle every kind explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node inside a [`ClassesDatabase`](crate::ClassesDatabase) arena.
pub type NodeId = usize;

/// Declared access level of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Protected,
    Private,
    /// Not a class member (namespace-scope declaration).
    None,
}

impl AccessLevel {
    /// Parse an access specifier as written (`public`, `protected:`, ...).
    pub fn from_specifier(text: &str) -> Option<Self> {
        match text.trim().trim_end_matches(':').trim() {
            "public" => Some(AccessLevel::Public),
            "protected" => Some(AccessLevel::Protected),
            "private" => Some(AccessLevel::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Protected => "protected",
            AccessLevel::Private => "private",
            AccessLevel::None => "none",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File and line a declaration was found at.
///
/// `file` is relative to the library root whenever the file lives below it, with `/`
/// separators, so locations do not depend on the machine the extraction ran on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,

    /// 1-indexed line number
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// `class`, `struct` or `union`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKey {
    Class,
    Struct,
    Union,
}

impl ClassKey {
    /// Access applied to members before the first access specifier.
    pub fn default_access(&self) -> AccessLevel {
        match self {
            ClassKey::Class => AccessLevel::Private,
            ClassKey::Struct | ClassKey::Union => AccessLevel::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassKey::Class => "class",
            ClassKey::Struct => "struct",
            ClassKey::Union => "union",
        }
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a base-class clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseSpecifier {
    /// Normalized base type name
    pub name: String,

    /// Access as written, or the class key's default when omitted
    pub access: AccessLevel,

    pub is_virtual: bool,
}

impl fmt::Display for BaseSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual {
            write!(f, "{} virtual {}", self.access, self.name)
        } else {
            write!(f, "{} {}", self.access, self.name)
        }
    }
}

/// Class, struct or union payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub key: ClassKey,
    pub bases: Vec<BaseSpecifier>,
    pub is_final: bool,

    /// Rendered template parameters (`typename T`, `int N = 4`), empty for non-templates
    pub template_parameters: Vec<String>,

    /// Explicit or partial specialization (`Vec<bool>`, `Vec<T*>`)
    pub is_specialization: bool,

    /// Only a forward declaration has been seen so far
    pub is_forward_declaration: bool,
}

impl ClassInfo {
    pub fn new(key: ClassKey) -> Self {
        Self {
            key,
            bases: Vec::new(),
            is_final: false,
            template_parameters: Vec::new(),
            is_specialization: false,
            is_forward_declaration: false,
        }
    }
}

/// Enumerator with its value expression as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Enumerator {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumInfo {
    /// `enum class` / `enum struct`
    pub is_scoped: bool,
    pub underlying_type: Option<String>,
    pub enumerators: Vec<Enumerator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Namespace-scope function
    Free,
    Method,
    Constructor,
    Destructor,
    Operator,
    /// `operator T()`
    Conversion,
}

/// A parameter, by type only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Normalized type (`const std::string&`, `Ts...`, `...`)
    pub type_name: String,

    /// Default argument as written
    pub default_value: Option<String>,
}

impl ParameterInfo {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }
}

impl fmt::Display for ParameterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default_value {
            Some(default) => write!(f, "{} = {}", self.type_name, default),
            None => f.write_str(&self.type_name),
        }
    }
}

/// Function, method, constructor, destructor, operator or conversion payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub kind: FunctionKind,

    /// None for constructors, destructors and conversions
    pub return_type: Option<String>,

    pub parameters: Vec<ParameterInfo>,
    pub template_parameters: Vec<String>,

    pub is_static: bool,
    pub is_virtual: bool,

    /// `= 0`
    pub is_pure: bool,

    /// `const` member function
    pub is_const: bool,

    /// `&` or `&&`
    pub ref_qualifier: Option<String>,

    /// Remaining specifiers in signature order: `explicit`, `constexpr`, `noexcept`,
    /// `override`, `final`, `default`, `delete`, ...
    pub attributes: Vec<String>,
}

impl FunctionInfo {
    pub fn new(kind: FunctionKind) -> Self {
        Self {
            kind,
            return_type: None,
            parameters: Vec::new(),
            template_parameters: Vec::new(),
            is_static: false,
            is_virtual: false,
            is_pure: false,
            is_const: false,
            ref_qualifier: None,
            attributes: Vec::new(),
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

/// Data member or namespace-scope variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub type_name: String,
    pub is_static: bool,
    pub is_constexpr: bool,
    pub is_mutable: bool,

    /// Initializer as written
    pub initializer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateParameterKind {
    /// `typename T` / `class T`
    Type,
    /// `int N`
    NonType,
    /// `template <typename> class C`
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParameterInfo {
    pub kind: TemplateParameterKind,
    pub is_variadic: bool,

    /// Default argument as written
    pub default_value: Option<String>,

    /// Position in the template parameter list
    pub position: usize,
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiNodeKind {
    Namespace { is_inline: bool },
    Class(ClassInfo),
    Enum(EnumInfo),
    Function(FunctionInfo),
    Field(FieldInfo),
    TypeAlias { target: String },
    TemplateParameter(TemplateParameterInfo),
}

impl ApiNodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ApiNodeKind::Namespace { .. } => "namespace",
            ApiNodeKind::Class(info) => info.key.as_str(),
            ApiNodeKind::Enum(_) => "enum",
            ApiNodeKind::Function(_) => "function",
            ApiNodeKind::Field(_) => "field",
            ApiNodeKind::TypeAlias { .. } => "type_alias",
            ApiNodeKind::TemplateParameter(_) => "template_parameter",
        }
    }

    /// Namespaces and classes own an ordered child sequence.
    pub fn is_container(&self) -> bool {
        matches!(self, ApiNodeKind::Namespace { .. } | ApiNodeKind::Class(_))
    }
}

/// The canonical unit of the API model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiNode {
    /// Arena index, assigned on insertion
    pub id: NodeId,

    /// Unqualified name (`F`, `Vec<bool>`, `operator==`)
    pub name: String,

    /// Fully-qualified name (`N::C::F`)
    pub qualified_name: String,

    /// Database identity. Equal to the qualified name except for functions, where the
    /// normalized parameter list and cv/ref qualifiers are appended so that overloads
    /// are distinct entries.
    pub key: String,

    pub access: AccessLevel,
    pub location: SourceLocation,

    /// Normalized signature, safe for direct inclusion in a textual diff
    pub signature: String,

    pub doc_comment: Option<String>,

    #[serde(flatten)]
    pub kind: ApiNodeKind,

    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,

    /// Other places the same logical declaration was seen (definitions, redeclarations)
    pub additional_locations: Vec<SourceLocation>,

    /// The declaration could not be fully normalized; `signature` holds a placeholder
    pub extraction_failed: bool,
}

impl ApiNode {
    pub fn new(
        kind: ApiNodeKind,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        signature: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        let qualified_name = qualified_name.into();
        Self {
            id: 0,
            name: name.into(),
            key: qualified_name.clone(),
            qualified_name,
            access: AccessLevel::None,
            location,
            signature: signature.into(),
            doc_comment: None,
            kind,
            parent: None,
            children: Vec::new(),
            additional_locations: Vec::new(),
            extraction_failed: false,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc_comment = doc;
        self
    }

    /// Mark the node as only partially extracted.
    pub fn failed(mut self) -> Self {
        self.extraction_failed = true;
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_forward_declaration(&self) -> bool {
        matches!(&self.kind, ApiNodeKind::Class(info) if info.is_forward_declaration)
    }

    /// Qualified name of the enclosing scope, empty at global scope.
    pub fn scope(&self) -> &str {
        match self.qualified_name.len().checked_sub(self.name.len()) {
            Some(end) if self.qualified_name.ends_with(&self.name) => {
                self.qualified_name[..end].trim_end_matches("::")
            }
            _ => "",
        }
    }
}

impl fmt::Display for ApiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.signature, self.qualified_name)
    }
}
