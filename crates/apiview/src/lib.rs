//! API surface model
//!
//! The in-memory model produced by an API extraction run: one [`ApiNode`] per logical
//! declaration of a library's public contract, held in a [`ClassesDatabase`] that keeps
//! first-encountered order so that two runs over unchanged input compare equal.
//!
//! The database is written only through a [`DatabaseBuilder`]; language front ends
//! (see the `apiview-cpp` crate) drive the builder while walking their syntax trees.
//!
//! # Example
//!
//! ```rust
//! use apiview::{ApiNode, ApiNodeKind, DatabaseBuilder, SourceLocation};
//!
//! let mut builder = DatabaseBuilder::new();
//! let ns = ApiNode::new(
//!     ApiNodeKind::Namespace { is_inline: false },
//!     "N",
//!     "N",
//!     "namespace N",
//!     SourceLocation::new("include/n.hpp", 1),
//! );
//! builder.insert_or_merge(None, ns).unwrap();
//!
//! let db = builder.finish();
//! assert_eq!(db.get("N").unwrap().signature, "namespace N");
//! ```

pub mod builder;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod node;

pub use builder::{AbsorbReport, DatabaseBuilder, MergeOutcome};
pub use database::{ClassesDatabase, TopLevel, Walk};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use error::{DatabaseError, Result};
pub use metrics::ProcessorMetrics;
pub use node::{
    AccessLevel, ApiNode, ApiNodeKind, BaseSpecifier, ClassInfo, ClassKey, EnumInfo, Enumerator,
    FieldInfo, FunctionInfo, FunctionKind, NodeId, ParameterInfo, SourceLocation,
    TemplateParameterInfo, TemplateParameterKind,
};
