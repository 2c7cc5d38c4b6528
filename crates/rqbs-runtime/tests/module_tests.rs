//! Module loading, merging and overrides on projects laid out on disk

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rqbs_runtime::{
    ConflictPolicy, LangError, ProjectResolver, PropertyOverrides, ResolveOptions, ResolvedProject,
    VmValue,
};
use rqbs_stdlib::stdlib_registry;
use tempfile::TempDir;

const DIAMOND: &[(&str, &str)] = &[
    (
        "modules/m/m.qbs",
        r#"Module {
            property stringList x: ["default"]
            property int level: 0
            property string target: product.name + ".bin"
        }"#,
    ),
    ("modules/a/a.qbs", "Module { Depends { name: \"m\" } m.x: [\"a\"]; m.level: 1 }"),
    ("modules/b/b.qbs", "Module { Depends { name: \"m\" } m.x: [\"b\"]; m.level: 2 }"),
];

/// Write the files of a project into a fresh directory
fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, text) in files {
        let path = dir.path().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
    dir
}

fn diamond(product: &str) -> TempDir {
    let mut files = DIAMOND.to_vec();
    files.push(("app.qbs", product));
    project(&files)
}

fn resolve(dir: &Path, options: ResolveOptions) -> Result<ResolvedProject, LangError> {
    ProjectResolver::new(Arc::new(stdlib_registry()), options).resolve(&dir.join("app.qbs"))
}

fn sequential() -> ResolveOptions {
    ResolveOptions {
        parallel: false,
        ..ResolveOptions::default()
    }
}

#[test]
fn diamond_dependency_merges_into_one_instance() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "a" }
            Depends { name: "b" }
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let app = resolved.product("app").unwrap();
    let names: Vec<&str> = app.modules.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a", "m", "b"]);

    let m = app.module("m").unwrap();
    assert!(m.present);
    let x = m.properties["x"].clone();
    for expected in ["a", "b", "default"] {
        assert!(
            matches!(&x, VmValue::List(items) if items.contains(&VmValue::string(expected))),
            "{} missing from {}",
            expected,
            x
        );
    }
    assert_eq!(m.properties["target"], VmValue::string("app.bin"));
}

#[test]
fn conflicting_scalars_fail_in_strict_mode() {
    let dir = diamond("Product { Depends { name: \"a\" } Depends { name: \"b\" } }");
    let lenient = resolve(dir.path(), sequential()).unwrap();
    assert_eq!(
        lenient.products[0].module("m").unwrap().properties["level"],
        VmValue::Int(1)
    );

    let strict = ResolveOptions {
        conflict_policy: ConflictPolicy::Error,
        ..sequential()
    };
    let err = resolve(dir.path(), strict).unwrap_err();
    assert!(
        matches!(err.root_cause(), LangError::ConflictingScalar { property, .. } if property == "level"),
        "{}",
        err
    );
}

#[test]
fn original_reads_the_module_default() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "m" }
            m.level: original + 5
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let m = resolved.product("app").unwrap().module("m").unwrap();
    assert_eq!(m.properties["level"], VmValue::Int(5));
}

#[test]
fn exclusive_properties_block_replaces_merged_lists() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "a" }
            Depends { name: "m" }
            Properties {
                condition: true
                overrideListProperties: true
                m.x: ["only"]
            }
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let m = resolved.product("app").unwrap().module("m").unwrap();
    assert_eq!(m.properties["x"], VmValue::string_list(["only"]));
}

#[test]
fn overrides_win_over_every_binding() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "a" }
            m.level: 7
        }"#,
    );
    let overrides = PropertyOverrides::from_assignments([
        "modules.m.level=3",
        "products.app.m.x=[\"cli\"]",
        "products.app.consoleApplication=true",
    ])
    .unwrap();
    let options = ResolveOptions {
        overrides,
        ..sequential()
    };
    let resolved = resolve(dir.path(), options).unwrap();
    let app = resolved.product("app").unwrap();
    assert_eq!(app.properties["consoleApplication"], VmValue::Boolean(true));
    let m = app.module("m").unwrap();
    assert_eq!(m.properties["level"], VmValue::Int(3));
    assert_eq!(m.properties["x"], VmValue::string_list(["cli"]));
}

#[test]
fn overrides_of_unknown_modules_are_rejected() {
    let dir = diamond("Product { name: \"app\"; Depends { name: \"m\" } }");
    let options = ResolveOptions {
        overrides: PropertyOverrides::from_assignments(["modules.nothere.flag=1"]).unwrap(),
        ..sequential()
    };
    let err = resolve(dir.path(), options).unwrap_err();
    assert!(matches!(err.root_cause(), LangError::UnknownOverrideScope(_)), "{}", err);

    let options = ResolveOptions {
        overrides: PropertyOverrides::from_assignments(["modules.m.colour=red"]).unwrap(),
        ..sequential()
    };
    let err = resolve(dir.path(), options).unwrap_err();
    assert!(matches!(err.root_cause(), LangError::UnknownOverrideProperty(_)), "{}", err);
}

#[test]
fn groups_report_their_own_module_properties() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "m" }
            Group {
                name: product.name + "-special"
                files: ["special.c"]
                m.level: 4
            }
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let app = resolved.product("app").unwrap();
    assert_eq!(app.module("m").unwrap().properties["level"], VmValue::Int(0));

    let group = &app.groups[0];
    assert_eq!(group.name.as_deref(), Some("app-special"));
    assert!(group.enabled);
    assert_eq!(group.modules["m"]["level"], VmValue::Int(4));
}

#[test]
fn group_module_lists_see_merged_contributions() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "a" }
            Depends { name: "m" }
            m.x: ["p"]
            Group { name: "with-base"; files: ["b.c"]; m.x: base.concat(["g"]) }
            Group { name: "with-outer"; files: ["o.c"]; m.x: outer.concat(["g"]) }
            Group {
                name: "conditional"
                files: ["c.c"]
                Properties { condition: true; m.x: outer.concat(["g"]) }
            }
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let app = resolved.product("app").unwrap();
    assert_eq!(
        app.module("m").unwrap().properties["x"],
        VmValue::string_list(["p", "a", "default"])
    );

    let names: Vec<&str> = app.groups.iter().filter_map(|g| g.name.as_deref()).collect();
    assert_eq!(names, vec!["with-base", "with-outer", "conditional"]);
    for group in &app.groups {
        assert_eq!(
            group.modules["m"]["x"],
            VmValue::string_list(["p", "a", "default", "g"]),
            "{:?}",
            group.name
        );
    }
}

#[test]
fn nested_groups_read_the_enclosing_group_module() {
    let dir = diamond(
        r#"Product {
            name: "app"
            Depends { name: "m" }
            Group {
                name: "outer"
                m.level: 2
                Group { name: "inner"; m.level: outer * 10 + base }
            }
        }"#,
    );
    let resolved = resolve(dir.path(), sequential()).unwrap();
    let app = resolved.product("app").unwrap();
    assert_eq!(app.module("m").unwrap().properties["level"], VmValue::Int(0));

    let outer = &app.groups[0];
    assert_eq!(outer.modules["m"]["level"], VmValue::Int(2));
    let inner = &outer.groups[0];
    assert_eq!(inner.name.as_deref(), Some("inner"));
    assert_eq!(inner.modules["m"]["level"], VmValue::Int(22));
}

#[test]
fn parallel_and_sequential_resolution_agree() {
    let dir = project(&[
        DIAMOND[0],
        DIAMOND[1],
        DIAMOND[2],
        (
            "app.qbs",
            r#"Project {
                name: "many"
                Product { name: "one"; Depends { name: "a" } }
                Product { name: "two"; Depends { name: "b" }; m.x: ["two"] }
                Product { name: "three"; Depends { name: "a" } Depends { name: "b" } }
                Product { name: "off"; condition: false; Depends { name: "m" } }
            }"#,
        ),
    ]);
    let parallel = resolve(dir.path(), ResolveOptions::default()).unwrap();
    let in_order = resolve(dir.path(), sequential()).unwrap();
    assert_eq!(parallel, in_order);

    let names: Vec<&str> = parallel.products.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two", "three", "off"]);
    assert!(!parallel.product("off").unwrap().enabled);
    assert_eq!(
        parallel.product("two").unwrap().module("m").unwrap().properties["x"],
        VmValue::string_list(["two", "b", "default"])
    );
}

#[test]
fn missing_required_module_is_an_error() {
    let dir = diamond("Product { Depends { name: \"absent\" } }");
    let err = resolve(dir.path(), sequential()).unwrap_err();
    assert!(err.to_string().contains("absent"), "{}", err);
}
