//! Integration tests for the classes database

use apiview::{
    AccessLevel, ApiNode, ApiNodeKind, ClassInfo, ClassKey, ClassesDatabase, DatabaseBuilder,
    FunctionInfo, FunctionKind, ParameterInfo, SourceLocation,
};

fn loc(line: usize) -> SourceLocation {
    SourceLocation::new("include/shapes.hpp", line)
}

fn namespace(name: &str, line: usize) -> ApiNode {
    ApiNode::new(
        ApiNodeKind::Namespace { is_inline: false },
        name,
        name,
        format!("namespace {name}"),
        loc(line),
    )
}

fn class(name: &str, qualified: &str, line: usize) -> ApiNode {
    ApiNode::new(
        ApiNodeKind::Class(ClassInfo::new(ClassKey::Class)),
        name,
        qualified,
        format!("class {name}"),
        loc(line),
    )
    .with_access(AccessLevel::None)
}

fn method(name: &str, scope: &str, param: &str, line: usize) -> ApiNode {
    let mut info = FunctionInfo::new(FunctionKind::Method);
    info.return_type = Some("void".to_string());
    info.parameters.push(ParameterInfo::new(param));
    let qualified = format!("{scope}::{name}");
    ApiNode::new(
        ApiNodeKind::Function(info),
        name,
        qualified.clone(),
        format!("void {name}({param})"),
        loc(line),
    )
    .with_key(format!("{qualified}({param})"))
    .with_access(AccessLevel::Public)
}

/// N { Shape { draw(int), draw(double) }, Shape<int> }, M { Circle }
fn sample() -> ClassesDatabase {
    let mut builder = DatabaseBuilder::new();
    let n = builder.insert_or_merge(None, namespace("N", 1)).unwrap().id();
    let shape = builder
        .insert_or_merge(Some(n), class("Shape", "N::Shape", 2))
        .unwrap()
        .id();
    builder
        .insert_or_merge(Some(shape), method("draw", "N::Shape", "int", 3))
        .unwrap();
    builder
        .insert_or_merge(Some(shape), method("draw", "N::Shape", "double", 4))
        .unwrap();
    builder
        .insert_or_merge(Some(n), class("Shape<int>", "N::Shape<int>", 7))
        .unwrap();
    let m = builder.insert_or_merge(None, namespace("M", 10)).unwrap().id();
    builder
        .insert_or_merge(Some(m), class("Circle", "M::Circle", 11))
        .unwrap();
    builder.finish()
}

#[test]
fn test_lookup_by_qualified_name() {
    let db = sample();
    assert_eq!(db.len(), 7);

    let shape = db.get("N::Shape").expect("N::Shape recorded");
    assert_eq!(shape.name, "Shape");
    assert_eq!(db.parent(shape).unwrap().qualified_name, "N");
    assert!(db.get("N::Missing").is_none());
}

#[test]
fn test_overloads_share_qualified_name() {
    let db = sample();
    let overloads = db.get_all("N::Shape::draw");
    let signatures: Vec<_> = overloads.iter().map(|n| n.signature.as_str()).collect();
    assert_eq!(signatures, vec!["void draw(int)", "void draw(double)"]);

    assert_eq!(
        db.get_by_key("N::Shape::draw(double)").unwrap().location.line,
        4
    );
}

#[test]
fn test_find_by_unqualified_name() {
    let db = sample();
    let found = db.find_by_name("Circle");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].qualified_name, "M::Circle");
    assert!(db.find_by_name("Square").is_empty());
}

#[test]
fn test_top_level_is_restartable() {
    let db = sample();
    let iter = db.top_level();
    let first: Vec<_> = iter.clone().map(|n| n.name.as_str()).collect();
    let second: Vec<_> = iter.map(|n| n.name.as_str()).collect();
    assert_eq!(first, vec!["N", "M"]);
    assert_eq!(first, second);
    assert_eq!(db.top_level().len(), 2);
}

#[test]
fn test_walk_is_preorder() {
    let db = sample();
    let order: Vec<_> = db
        .walk()
        .map(|(depth, node)| format!("{}{}", "  ".repeat(depth), node.name))
        .collect();
    assert_eq!(
        order,
        vec![
            "N",
            "  Shape",
            "    draw",
            "    draw",
            "  Shape<int>",
            "M",
            "  Circle"
        ]
    );
}

#[test]
fn test_children_in_source_order() {
    let db = sample();
    let n = db.get("N").unwrap();
    let names: Vec<_> = db.children(n).map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Shape", "Shape<int>"]);
}

#[test]
fn test_specializations_by_prefix() {
    let db = sample();
    let specs = db.specializations_of("N::Shape");
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].qualified_name, "N::Shape<int>");
    assert!(db.specializations_of("M::Circle").is_empty());
}

#[test]
fn test_serialization_is_deterministic() {
    let a = serde_json::to_string(&sample()).unwrap();
    let b = serde_json::to_string(&sample()).unwrap();
    assert_eq!(a, b);
    assert!(a.contains("\"qualified_name\":\"N::Shape::draw\""));
}

#[test]
fn test_empty_database() {
    let db = ClassesDatabase::new();
    assert!(db.is_empty());
    assert_eq!(db.top_level().count(), 0);
    assert_eq!(db.walk().count(), 0);
}
