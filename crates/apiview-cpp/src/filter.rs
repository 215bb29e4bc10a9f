//! Declaration filter
//!
//! Decides whether a declaration belongs to the public API surface. The decision is a
//! pure function of the declaration's context and the run's [`FilterConfig`].

use apiview::AccessLevel;
use regex::Regex;
use std::fmt;

use crate::frontend::FileRole;

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Keep private and protected members
    pub include_private: bool,

    /// Keep protected members
    pub include_protected: bool,

    /// Keep declarations in implementation-detail namespaces
    pub include_detail: bool,

    /// Matched against every enclosing namespace segment
    pub detail_patterns: Vec<Regex>,

    /// Qualified namespace prefixes; empty keeps every namespace
    pub filter_namespaces: Vec<String>,
}

impl FilterConfig {
    pub fn is_detail_namespace(&self, segment: &str) -> bool {
        self.detail_patterns.iter().any(|p| p.is_match(segment))
    }
}

/// How a declaration came to be in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclOrigin {
    /// Written by the user
    Written,

    /// `= default` written explicitly
    Defaulted,

    /// `= delete` written explicitly
    Deleted,

    /// Fabricated by parser error recovery
    Synthesized,
}

/// Everything the filter needs to know about one declaration.
#[derive(Debug, Clone, Copy)]
pub struct DeclContext<'a> {
    pub file_role: FileRole,

    /// Declared (or default) access; `None` at namespace scope
    pub access: AccessLevel,

    pub origin: DeclOrigin,

    /// Enclosing namespaces, outermost first; `""` stands for an anonymous namespace.
    /// For a namespace declaration the list ends with the namespace itself.
    pub namespaces: &'a [String],

    /// The declaration is itself a namespace
    pub is_namespace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludeReason {
    ExternalHeader,
    Access(AccessLevel),
    Synthesized,
    DetailNamespace(String),
    AnonymousNamespace,
    OutsideFilterNamespace,
}

impl ExcludeReason {
    /// The declaration is hidden from consumers of the library. Aliases excluded for
    /// these reasons are resolved to their target when they appear in visible
    /// signatures.
    pub fn hides_from_consumers(&self) -> bool {
        matches!(
            self,
            ExcludeReason::Access(_)
                | ExcludeReason::DetailNamespace(_)
                | ExcludeReason::AnonymousNamespace
        )
    }
}

impl fmt::Display for ExcludeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcludeReason::ExternalHeader => write!(f, "declared outside the library"),
            ExcludeReason::Access(access) => write!(f, "{access} member"),
            ExcludeReason::Synthesized => write!(f, "not written in source"),
            ExcludeReason::DetailNamespace(ns) => write!(f, "inside detail namespace {ns}"),
            ExcludeReason::AnonymousNamespace => write!(f, "inside anonymous namespace"),
            ExcludeReason::OutsideFilterNamespace => write!(f, "outside the filtered namespaces"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Include,
    Exclude(ExcludeReason),
}

impl Decision {
    pub fn is_included(&self) -> bool {
        matches!(self, Decision::Include)
    }
}

/// Apply the filter rules in priority order.
///
/// The detail-namespace rule is not affected by `include_protected`: a protected member
/// of a class inside a detail namespace stays excluded.
pub fn check(context: &DeclContext<'_>, config: &FilterConfig) -> Decision {
    if context.file_role == FileRole::External {
        return Decision::Exclude(ExcludeReason::ExternalHeader);
    }

    match context.access {
        AccessLevel::Private if !config.include_private => {
            return Decision::Exclude(ExcludeReason::Access(AccessLevel::Private));
        }
        AccessLevel::Protected if !(config.include_protected || config.include_private) => {
            return Decision::Exclude(ExcludeReason::Access(AccessLevel::Protected));
        }
        _ => {}
    }

    if context.origin == DeclOrigin::Synthesized {
        return Decision::Exclude(ExcludeReason::Synthesized);
    }

    for segment in context.namespaces {
        if segment.is_empty() {
            return Decision::Exclude(ExcludeReason::AnonymousNamespace);
        }
        if !config.include_detail && config.is_detail_namespace(segment) {
            return Decision::Exclude(ExcludeReason::DetailNamespace(segment.clone()));
        }
    }

    if !config.filter_namespaces.is_empty()
        && !config
            .filter_namespaces
            .iter()
            .any(|prefix| namespace_matches(context.namespaces, prefix, context.is_namespace))
    {
        return Decision::Exclude(ExcludeReason::OutsideFilterNamespace);
    }

    Decision::Include
}

/// Segment-wise prefix match of the enclosing namespaces against `A::B`. A namespace
/// declaration that is itself on the way to the prefix (`A` for `A::B`) also matches so
/// that the path to the filtered namespace is materialized.
fn namespace_matches(namespaces: &[String], prefix: &str, is_namespace: bool) -> bool {
    let wanted: Vec<&str> = prefix.split("::").filter(|s| !s.is_empty()).collect();
    let common = namespaces
        .iter()
        .zip(&wanted)
        .take_while(|(have, want)| have.as_str() == **want)
        .count();

    if namespaces.len() >= wanted.len() {
        common == wanted.len()
    } else {
        is_namespace && common == namespaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ProcessorOptions;

    fn config() -> FilterConfig {
        ProcessorOptions::default().filter_config().unwrap()
    }

    fn ns(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    fn context<'a>(namespaces: &'a [String], access: AccessLevel) -> DeclContext<'a> {
        DeclContext {
            file_role: FileRole::Primary,
            access,
            origin: DeclOrigin::Written,
            namespaces,
            is_namespace: false,
        }
    }

    #[test]
    fn test_public_declaration_included() {
        let namespaces = ns(&["N"]);
        assert_eq!(
            check(&context(&namespaces, AccessLevel::Public), &config()),
            Decision::Include
        );
        assert!(check(&context(&namespaces, AccessLevel::None), &config()).is_included());
    }

    #[test]
    fn test_external_header_excluded_first() {
        let namespaces = ns(&["detail"]);
        let mut ctx = context(&namespaces, AccessLevel::Private);
        ctx.file_role = FileRole::External;
        assert_eq!(
            check(&ctx, &config()),
            Decision::Exclude(ExcludeReason::ExternalHeader)
        );
        ctx.file_role = FileRole::LibraryHeader;
        assert_eq!(
            check(&ctx, &config()),
            Decision::Exclude(ExcludeReason::Access(AccessLevel::Private))
        );
    }

    #[test]
    fn test_access_rules() {
        let namespaces = ns(&["N"]);
        let protected = context(&namespaces, AccessLevel::Protected);
        assert!(!check(&protected, &config()).is_included());

        let mut cfg = config();
        cfg.include_protected = true;
        assert!(check(&protected, &cfg).is_included());
        assert!(!check(&context(&namespaces, AccessLevel::Private), &cfg).is_included());

        let mut cfg = config();
        cfg.include_private = true;
        assert!(check(&protected, &cfg).is_included());
        assert!(check(&context(&namespaces, AccessLevel::Private), &cfg).is_included());
    }

    #[test]
    fn test_synthesized_excluded_but_defaulted_kept() {
        let namespaces = ns(&["N"]);
        let mut ctx = context(&namespaces, AccessLevel::Public);
        ctx.origin = DeclOrigin::Synthesized;
        assert_eq!(
            check(&ctx, &config()),
            Decision::Exclude(ExcludeReason::Synthesized)
        );
        ctx.origin = DeclOrigin::Defaulted;
        assert!(check(&ctx, &config()).is_included());
    }

    #[test]
    fn test_detail_namespaces_recursive() {
        for path in [&["N", "detail"][..], &["N", "_internal", "X"][..], &["detail"][..]] {
            let namespaces = ns(path);
            assert!(
                matches!(
                    check(&context(&namespaces, AccessLevel::Public), &config()),
                    Decision::Exclude(ExcludeReason::DetailNamespace(_))
                ),
                "{path:?}"
            );
        }
        let namespaces = ns(&["N", "details_page"]);
        assert!(check(&context(&namespaces, AccessLevel::Public), &config()).is_included());

        let mut cfg = config();
        cfg.include_detail = true;
        let namespaces = ns(&["N", "detail"]);
        assert!(check(&context(&namespaces, AccessLevel::Public), &cfg).is_included());
    }

    #[test]
    fn test_detail_wins_over_protected_override() {
        let mut cfg = config();
        cfg.include_protected = true;
        let namespaces = ns(&["N", "detail"]);
        assert!(!check(&context(&namespaces, AccessLevel::Protected), &cfg).is_included());
    }

    #[test]
    fn test_anonymous_namespace_excluded() {
        let namespaces = ns(&["N", ""]);
        assert_eq!(
            check(&context(&namespaces, AccessLevel::None), &config()),
            Decision::Exclude(ExcludeReason::AnonymousNamespace)
        );
    }

    #[test]
    fn test_filter_namespace() {
        let mut cfg = config();
        cfg.filter_namespaces = vec!["Azure::Core".to_string()];

        let inside = ns(&["Azure", "Core", "Http"]);
        assert!(check(&context(&inside, AccessLevel::None), &cfg).is_included());

        let sibling = ns(&["Azure", "Storage"]);
        assert_eq!(
            check(&context(&sibling, AccessLevel::None), &cfg),
            Decision::Exclude(ExcludeReason::OutsideFilterNamespace)
        );

        // A namespace on the path to the filtered one is kept
        let outer = ns(&["Azure"]);
        let mut ctx = context(&outer, AccessLevel::None);
        ctx.is_namespace = true;
        assert!(check(&ctx, &cfg).is_included());
        ctx.is_namespace = false;
        assert!(!check(&ctx, &cfg).is_included());

        let other = ns(&["Other"]);
        let mut ctx = context(&other, AccessLevel::None);
        ctx.is_namespace = true;
        assert!(!check(&ctx, &cfg).is_included());
    }

    #[test]
    fn test_exclude_reason_hides() {
        assert!(ExcludeReason::DetailNamespace("detail".into()).hides_from_consumers());
        assert!(ExcludeReason::Access(AccessLevel::Private).hides_from_consumers());
        assert!(!ExcludeReason::ExternalHeader.hides_from_consumers());
        assert!(!ExcludeReason::OutsideFilterNamespace.hides_from_consumers());
    }
}
