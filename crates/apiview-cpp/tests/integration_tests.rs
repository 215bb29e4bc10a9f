//! Integration tests for the C++ API extractor

use apiview::{ApiNodeKind, DiagnosticKind, FunctionKind, Severity};
use apiview_cpp::{
    ApiViewProcessor, CancellationToken, Frontend, FrontendError, ProcessingResult, ProcessorError,
    ProcessorOptions, TreeSitterFrontend,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tree_sitter::Tree;

const WIDGETS_HPP: &str = include_str!("fixtures/widgets.hpp");
const EXPORT_HPP: &str = include_str!("fixtures/export.hpp");
const SHARED_HPP: &str = include_str!("fixtures/shared.hpp");

fn library(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn widgets_library() -> TempDir {
    library(&[
        ("include/widgets/widgets.hpp", WIDGETS_HPP),
        ("include/widgets/export.hpp", EXPORT_HPP),
    ])
}

fn run(root: &Path, files: &[&str]) -> ProcessingResult {
    run_with(ProcessorOptions::new(root), files)
}

fn run_with(options: ProcessorOptions, files: &[&str]) -> ProcessingResult {
    let options = options.with_files(files.iter().copied()).with_compiler_switch("-Iinclude");
    ApiViewProcessor::new(options).process().unwrap()
}

fn json(result: &ProcessingResult) -> String {
    serde_json::to_string_pretty(&result.database).unwrap()
}

#[test]
fn test_widgets_surface() {
    let dir = widgets_library();
    let result = run(dir.path(), &["include/widgets/widgets.hpp"]);
    let db = &result.database;

    let widgets = db.get("Widgets").unwrap();
    assert_eq!(widgets.signature, "namespace Widgets");
    assert_eq!(widgets.doc_comment.as_deref(), Some("/// Widgets for the demo library."));
    assert_eq!(widgets.location.file, "include/widgets/widgets.hpp");

    let color = db.get("Widgets::Color").unwrap();
    assert_eq!(color.signature, "enum class Color : unsigned char");

    let widget = db.get("Widgets::Widget").unwrap();
    assert_eq!(widget.signature, "class Widget");
    assert_eq!(widget.doc_comment.as_deref(), Some("/// Base of every widget."));

    let members: Vec<_> = db.children(widget).map(|n| n.signature.as_str()).collect();
    assert_eq!(
        members,
        vec![
            "explicit Widget(const std::string&)",
            "virtual ~Widget()",
            "virtual void Draw() const = 0",
            "const std::string& Name() const noexcept",
            "void* NativeHandle() const",
        ]
    );
    assert_eq!(
        db.get("Widgets::Widget::Draw").unwrap().doc_comment.as_deref(),
        Some("/// Draws the widget.")
    );

    let button = db.get("Widgets::Button").unwrap();
    assert_eq!(button.signature, "class Button final : public Widget");
    assert_eq!(
        db.get("Widgets::Button::Callback").unwrap().signature,
        "using Callback = void (*)(int)"
    );
    assert_eq!(
        db.get("Widgets::Button::OnClick").unwrap().signature,
        "void OnClick(Callback)"
    );
    assert_eq!(
        db.get("Widgets::Button::kDefaultWidth").unwrap().signature,
        "static constexpr int kDefaultWidth = 80"
    );

    let property = db.get("Widgets::Property").unwrap();
    assert_eq!(property.signature, "template <typename T> struct Property");
    assert_eq!(db.get("Widgets::Property::Get").unwrap().signature, "const T& Get() const");

    // Hidden: detail namespace, protected and private members, disabled region
    assert!(db.get("Widgets::detail").is_none());
    assert!(db.get("Widgets::detail::Registry").is_none());
    assert!(db.get("Widgets::Widget::Invalidate").is_none());
    assert!(db.get("Widgets::Widget::name_").is_none());
    assert!(db.get("Widgets::Widget::Repaint").is_none());

    assert!(!result.has_errors());
}

#[test]
fn test_function_kinds() {
    let dir = widgets_library();
    let result = run(dir.path(), &["include/widgets/widgets.hpp"]);
    let kind_of = |qualified_name: &str| match &result.database.get(qualified_name).unwrap().kind {
        ApiNodeKind::Function(info) => info.kind,
        other => panic!("{qualified_name} is {other:?}"),
    };
    assert_eq!(kind_of("Widgets::Widget::Widget"), FunctionKind::Constructor);
    assert_eq!(kind_of("Widgets::Widget::~Widget"), FunctionKind::Destructor);
    assert_eq!(kind_of("Widgets::Widget::Draw"), FunctionKind::Method);

    let draw = result.database.get("Widgets::Button::Draw").unwrap();
    let ApiNodeKind::Function(info) = &draw.kind else {
        panic!("not a function");
    };
    assert!(info.is_const);
    assert!(info.has_attribute("override"));
}

#[test]
fn test_defines_enable_conditional_declarations() {
    let dir = widgets_library();
    let options = ProcessorOptions::new(dir.path()).with_compiler_switch("-DWIDGETS_LEGACY");
    let result = run_with(options, &["include/widgets/widgets.hpp"]);
    assert_eq!(
        result.database.get("Widgets::Widget::Repaint").unwrap().signature,
        "void Repaint()"
    );
}

#[test]
fn test_basic_scenario() {
    let dir = library(&[("include/shared.hpp", SHARED_HPP)]);
    let result = run(dir.path(), &["include/shared.hpp"]);
    let db = &result.database;

    let names: Vec<_> = db
        .walk()
        .map(|(depth, n)| (depth, n.kind_name(), n.qualified_name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![(0, "namespace", "N"), (1, "class", "N::C"), (2, "function", "N::C::F")]
    );
    assert_eq!(db.get("N::C::F").unwrap().signature, "void F(int)");
    assert!(db.get("N::C::G").is_none());
    assert!(result.is_clean());
}

#[test]
fn test_shared_header_yields_one_node() {
    let dir = library(&[
        ("include/shared.hpp", SHARED_HPP),
        ("src/a.cpp", "#include \"shared.hpp\"\n"),
        ("src/b.cpp", "#include <shared.hpp>\n"),
    ]);
    let result = run(dir.path(), &["src/a.cpp", "src/b.cpp"]);
    let db = &result.database;

    assert_eq!(result.metrics.files_succeeded, 2);
    assert_eq!(result.metrics.headers_parsed, 2);
    assert_eq!(db.get_all("N::C").len(), 1);
    assert_eq!(db.get_all("N::C::F").len(), 1);
    assert_eq!(db.len(), 3);
    assert!(db.get("N::C").unwrap().additional_locations.is_empty());
    assert_eq!(result.metrics.merge_conflicts, 0);
}

#[test]
fn test_compilation_database_drives_run() {
    let dir = library(&[
        ("include/shared.hpp", SHARED_HPP),
        ("src/a.cpp", "#include \"shared.hpp\"\nnamespace N { void FromA(); }\n"),
        (
            "src/b.cpp",
            "#include \"shared.hpp\"\n#ifdef FEATURE_B\nnamespace N { void FromB(); }\n#endif\n",
        ),
        ("src/skipped.cpp", "void Skipped();\n"),
    ]);
    let commands = format!(
        r#"[
            {{"directory": "{root}", "file": "src/a.cpp", "arguments": ["clang++", "-Iinclude", "-c", "src/a.cpp"]}},
            {{"directory": "{root}", "file": "src/b.cpp", "command": "clang++ -Iinclude -DFEATURE_B -c src/b.cpp -o b.o"}},
            {{"directory": "{root}", "file": "src/skipped.cpp", "command": "clang++ -c src/skipped.cpp"}}
        ]"#,
        root = dir.path().display().to_string().replace('\\', "/")
    );
    fs::write(dir.path().join("compile_commands.json"), commands).unwrap();

    let mut options = ProcessorOptions::new(dir.path());
    options.source_files_to_skip = vec![PathBuf::from("src/skipped.cpp")];
    let result = ApiViewProcessor::new(options).process().unwrap();
    let db = &result.database;

    assert_eq!(result.metrics.files_attempted, 2);
    assert_eq!(db.get_all("N::C").len(), 1);
    assert_eq!(db.get("N::FromA").unwrap().location.file, "src/a.cpp");
    assert!(db.get("N::FromB").is_some());
    assert!(db.get("Skipped").is_none());

    // Namespace N was reopened by every unit and is still one node
    assert_eq!(db.get_all("N").len(), 1);
    let order: Vec<_> = db.children(db.get("N").unwrap()).map(|n| n.name.as_str()).collect();
    assert_eq!(order, vec!["C", "FromA", "FromB"]);
}

#[test]
fn test_missing_file_is_non_fatal() {
    let dir = library(&[("include/shared.hpp", SHARED_HPP)]);
    let result = run(dir.path(), &["include/missing.hpp", "include/shared.hpp"]);

    assert!(result.has_errors());
    assert_eq!(result.metrics.files_failed, 1);
    assert_eq!(result.metrics.files_succeeded, 1);
    assert!(result.database.get("N::C::F").is_some());

    let failure = &result.diagnostics[0];
    assert_eq!(failure.kind, DiagnosticKind::Frontend);
    assert_eq!(failure.severity, Severity::Error);
    assert_eq!(failure.file.as_deref(), Some("include/missing.hpp"));
}

/// Front end that refuses to parse one file.
struct FailingFrontend {
    fail_on: &'static str,
}

impl Frontend for FailingFrontend {
    fn name(&self) -> &str {
        "failing"
    }

    fn parse(&self, source: &str, path: &Path, timeout: Option<Duration>) -> Result<Tree, FrontendError> {
        if path.ends_with(self.fail_on) {
            return Err(FrontendError::ParseFailed(path.to_path_buf(), "refused".to_string()));
        }
        TreeSitterFrontend::new().parse(source, path, timeout)
    }
}

#[test]
fn test_frontend_failure_is_recorded_and_run_continues() {
    let dir = library(&[
        ("include/bad.hpp", "namespace Bad { void f(); }\n"),
        ("include/shared.hpp", SHARED_HPP),
    ]);
    let options = ProcessorOptions::new(dir.path()).with_files(["include/bad.hpp", "include/shared.hpp"]);
    let processor = ApiViewProcessor::with_frontend(options, Arc::new(FailingFrontend { fail_on: "bad.hpp" }));
    let result = processor.process().unwrap();

    assert_eq!(result.metrics.files_failed, 1);
    assert!(result.database.get("Bad").is_none());
    assert!(result.database.get("N::C").is_some());
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0].message.contains("refused"));
}

/// Front end that cannot start.
struct BrokenFrontend;

impl Frontend for BrokenFrontend {
    fn name(&self) -> &str {
        "broken"
    }

    fn check(&self) -> Result<(), FrontendError> {
        Err(FrontendError::Language("no grammar".to_string()))
    }

    fn parse(&self, _source: &str, path: &Path, _timeout: Option<Duration>) -> Result<Tree, FrontendError> {
        Err(FrontendError::ParseFailed(path.to_path_buf(), "unreachable".to_string()))
    }
}

#[test]
fn test_frontend_startup_failure_is_fatal() {
    let dir = library(&[("include/shared.hpp", SHARED_HPP)]);
    let options = ProcessorOptions::new(dir.path()).with_files(["include/shared.hpp"]);
    let processor = ApiViewProcessor::with_frontend(options, Arc::new(BrokenFrontend));
    assert!(matches!(processor.process(), Err(ProcessorError::FrontendStartup(_))));
}

/// Front end that cancels the run after the first file.
struct CancellingFrontend {
    token: CancellationToken,
}

impl Frontend for CancellingFrontend {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn parse(&self, source: &str, path: &Path, timeout: Option<Duration>) -> Result<Tree, FrontendError> {
        self.token.cancel();
        TreeSitterFrontend::new().parse(source, path, timeout)
    }
}

#[test]
fn test_cancellation_between_units() {
    let dir = library(&[("include/a.hpp", "void a();\n"), ("include/b.hpp", "void b();\n")]);
    let token = CancellationToken::new();
    let options = ProcessorOptions::new(dir.path()).with_files(["include/a.hpp", "include/b.hpp"]);
    let processor = ApiViewProcessor::with_frontend(
        options,
        Arc::new(CancellingFrontend { token: token.clone() }),
    )
    .with_cancellation(token);
    assert!(matches!(processor.process(), Err(ProcessorError::Cancelled)));
}

#[test]
fn test_private_member_does_not_change_output() {
    let before = library(&[(
        "include/w.hpp",
        "namespace W { class Widget { public: void Show(); }; }\n",
    )]);
    let after = library(&[(
        "include/w.hpp",
        "namespace W { class Widget { public: void Show(); private: int added_; void Helper(); }; }\n",
    )]);
    assert_eq!(
        json(&run(before.path(), &["include/w.hpp"])),
        json(&run(after.path(), &["include/w.hpp"]))
    );
}

#[test]
fn test_reordering_top_level_declarations() {
    let first = library(&[("include/r.hpp", "void A();\nvoid B();\nvoid C();\n")]);
    let second = library(&[("include/r.hpp", "void C();\nvoid B();\nvoid A();\n")]);

    let names = |dir: &TempDir| -> Vec<String> {
        run(dir.path(), &["include/r.hpp"])
            .database
            .top_level()
            .map(|n| n.name.clone())
            .collect()
    };
    assert_eq!(names(&first), vec!["A", "B", "C"]);
    assert_eq!(names(&second), vec!["C", "B", "A"]);
}

#[test]
fn test_detail_namespace_contributes_zero_nodes() {
    let source = "namespace Lib { namespace detail { class Impl { public: class Nested {}; void Run(); }; } }\n";
    let dir = library(&[("include/lib.hpp", source)]);

    let hidden = run(dir.path(), &["include/lib.hpp"]);
    assert!(hidden.database.is_empty());

    let shown = run_with(ProcessorOptions::new(dir.path()).with_detail(true), &["include/lib.hpp"]);
    assert!(shown.database.get("Lib::detail::Impl::Nested").is_some());
    assert!(shown.database.get("Lib::detail::Impl::Run").is_some());
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let dir = library(&[
        ("include/shared.hpp", SHARED_HPP),
        ("include/widgets/widgets.hpp", WIDGETS_HPP),
        ("include/widgets/export.hpp", EXPORT_HPP),
    ]);
    let files = ["include/shared.hpp", "include/widgets/widgets.hpp"];

    let first = json(&run(dir.path(), &files));
    let second = json(&run(dir.path(), &files));
    assert_eq!(first, second);

    let parallel = run_with(
        ProcessorOptions::new(dir.path())
            .with_parallel(true)
            .with_parallel_workers(2),
        &files,
    );
    assert_eq!(first, json(&parallel));
}

#[test]
fn test_cv_spellings_merge_into_one_node() {
    let dir = library(&[
        ("include/one.hpp", "#include <string>\nnamespace S { void Set(const std::string& value); }\n"),
        ("include/two.hpp", "#include <string>\nnamespace S {\n\nvoid Set(std::string const &);\n}\n"),
    ]);
    let result = run(dir.path(), &["include/one.hpp", "include/two.hpp"]);

    let set = result.database.get_all("S::Set");
    assert_eq!(set.len(), 1);
    assert_eq!(set[0].signature, "void Set(const std::string&)");
    assert_eq!(set[0].key, "S::Set(const std::string&)");
    assert_eq!(set[0].additional_locations.len(), 1);
    assert_eq!(result.metrics.merge_conflicts, 0);
}

#[test]
fn test_conflicting_declarations_are_both_kept() {
    let dir = library(&[
        ("include/one.hpp", "namespace K { class Thing {}; }\n"),
        ("include/two.hpp", "namespace K { struct Thing {}; }\n"),
    ]);
    let result = run(dir.path(), &["include/one.hpp", "include/two.hpp"]);

    assert_eq!(result.database.get_all("K::Thing").len(), 2);
    assert_eq!(result.metrics.merge_conflicts, 1);
    let conflict = result
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::MergeConflict)
        .unwrap();
    assert_eq!(conflict.qualified_name.as_deref(), Some("K::Thing"));
    assert_eq!(conflict.file.as_deref(), Some("include/two.hpp"));
    assert!(!result.has_errors());
}

#[test]
fn test_filter_namespace_and_settings_json() {
    let dir = library(&[(
        "include/multi.hpp",
        "namespace Azure { namespace Core { void Keep(); } namespace Other { void Drop(); } }\n",
    )]);
    let settings = format!(
        r#"{{
            "sourceRoot": "{root}",
            "sourceFilesToProcess": ["include/multi.hpp"],
            "filterNamespace": "Azure::Core",
            "reviewName": "Azure Core"
        }}"#,
        root = dir.path().display().to_string().replace('\\', "/")
    );
    let options = ProcessorOptions::from_settings_json(&settings).unwrap();
    let result = ApiViewProcessor::new(options).process().unwrap();

    assert!(result.database.get("Azure::Core::Keep").is_some());
    assert!(result.database.get("Azure::Other").is_none());
    assert!(result.database.get("Azure::Other::Drop").is_none());
}

#[test]
fn test_out_of_line_definitions_in_sources() {
    let dir = library(&[
        ("include/shared.hpp", SHARED_HPP),
        (
            "src/c.cpp",
            "#include \"shared.hpp\"\nnamespace N {\n/// Implementation note.\nvoid C::F(int x) {}\n}\n",
        ),
    ]);
    let result = run(dir.path(), &["src/c.cpp"]);
    let f = result.database.get("N::C::F").unwrap();

    assert_eq!(result.database.len(), 3);
    assert_eq!(f.location.file, "include/shared.hpp");
    assert_eq!(f.additional_locations.len(), 1);
    assert_eq!(f.additional_locations[0].file, "src/c.cpp");
}

#[test]
fn test_syntax_errors_tolerated_with_warning() {
    let dir = library(&[(
        "include/broken.hpp",
        "namespace Ok { void Fine(); }\nclass Broken { void (; };\n",
    )]);
    let result = run(dir.path(), &["include/broken.hpp"]);
    assert!(result.database.get("Ok::Fine").is_some());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::Frontend && d.severity == Severity::Warning));
    assert!(!result.has_errors());

    let strict = ApiViewProcessor::new(
        ProcessorOptions::new(dir.path())
            .with_files(["include/broken.hpp"])
            .with_tolerant_parsing(false),
    )
    .process()
    .unwrap();
    assert!(strict.has_errors());
    assert!(strict.database.is_empty());
}

fn qualified_names(result: &ProcessingResult) -> Vec<String> {
    result
        .database
        .iter()
        .map(|n| n.qualified_name.clone())
        .collect()
}

#[test]
fn test_pimpl_defined_in_source_stays_private() {
    let dir = library(&[
        (
            "include/w.hpp",
            "namespace W {\nclass Widget {\npublic:\n  void Show();\nprivate:\n  class Impl;\n  Impl* impl_;\n};\n}\n",
        ),
        (
            "src/w.cpp",
            "#include \"w.hpp\"\nnamespace W {\nclass Widget::Impl { public: void Secret(); };\nvoid Widget::Show() {}\n}\n",
        ),
    ]);
    let result = run(dir.path(), &["src/w.cpp"]);

    assert_eq!(qualified_names(&result), vec!["W", "W::Widget", "W::Widget::Show"]);
    assert!(result.database.find_by_name("Impl").is_empty());
    assert!(result.is_clean());
}

#[test]
fn test_qualified_definition_in_detail_namespace() {
    let dir = library(&[(
        "include/n.hpp",
        "namespace N {\nnamespace detail { class Impl; }\nclass detail::Impl { public: void f(); };\nclass Public {};\n}\n",
    )]);
    let result = run(dir.path(), &["include/n.hpp"]);

    assert_eq!(qualified_names(&result), vec!["N", "N::Public"]);
}

#[test]
fn test_public_nested_class_completed_out_of_line() {
    let dir = library(&[(
        "include/o.hpp",
        "class Outer {\npublic:\n  class Inner;\n};\nclass Outer::Inner {\npublic:\n  int Value() const;\n};\n",
    )]);
    let result = run(dir.path(), &["include/o.hpp"]);

    let inner = result.database.get("Outer::Inner").unwrap();
    assert!(!inner.is_forward_declaration());
    assert_eq!(result.database.parent(inner).unwrap().qualified_name, "Outer");
    assert_eq!(
        result.database.get("Outer::Inner::Value").unwrap().signature,
        "int Value() const"
    );
}

#[test]
fn test_declaration_with_defaults_and_inline_definition() {
    let dir = library(&[(
        "include/f.hpp",
        "namespace N {\n/// Does f\nvoid f(int x = 0);\ninline void f(int x) {}\n}\n",
    )]);
    let result = run(dir.path(), &["include/f.hpp"]);

    let entries = result.database.get_all("N::f");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].signature, "void f(int = 0)");
    assert_eq!(entries[0].doc_comment.as_deref(), Some("/// Does f"));
    assert_eq!(entries[0].location.line, 3);
    assert_eq!(result.metrics.merge_conflicts, 0);
    assert!(result.is_clean());
}
