//! Snapshot tests for expression evaluation and resolved output

use std::path::Path;
use std::sync::Arc;

use rqbs_runtime::{Evaluator, ItemPool, ProjectResolver, ResolveOptions};
use rqbs_stdlib::stdlib_registry;

fn eval_json(source: &str) -> String {
    let pool = ItemPool::new();
    let evaluator = Evaluator::new(&pool, Arc::new(stdlib_registry()));
    let result = evaluator.evaluate_expression(source).expect("Failed to evaluate");
    serde_json::to_string(&result).expect("Failed to serialize")
}

fn eval_result(source: &str) -> String {
    let pool = ItemPool::new();
    let evaluator = Evaluator::new(&pool, Arc::new(stdlib_registry()));
    match evaluator.evaluate_expression(source) {
        Ok(result) => serde_json::to_string(&result).expect("Failed to serialize"),
        Err(e) => format!("Eval error: {}", e),
    }
}

/// Selected properties of every product, as compact JSON
fn resolve_json(text: &str, keys: &[&str]) -> String {
    let options = ResolveOptions {
        parallel: false,
        ..ResolveOptions::default()
    };
    let resolver = ProjectResolver::new(Arc::new(stdlib_registry()), options);
    let project = resolver
        .resolve_source(Path::new("/p/app.qbs"), text)
        .expect("Failed to resolve");
    let products: Vec<serde_json::Value> = project
        .products
        .iter()
        .map(|product| {
            let mut selected = serde_json::Map::new();
            for key in keys {
                let value = serde_json::to_value(&product.properties[*key]).expect("Failed to serialize");
                selected.insert((*key).to_string(), value);
            }
            serde_json::Value::Object(selected)
        })
        .collect();
    serde_json::to_string(&products).expect("Failed to serialize")
}

// =============================================================================
// Expressions
// =============================================================================

#[test]
fn test_values() {
    insta::assert_snapshot!(eval_json(r#"[1, "two", [3], null, undefined, true]"#), @r#"[1,"two",[3],null,null,true]"#);
}

#[test]
fn test_string_concatenation() {
    insta::assert_snapshot!(eval_json(r#"["v" + 1 + 2, 1 + 2 + "v"]"#), @r#"["v12","3v"]"#);
}

#[test]
fn test_list_pipeline() {
    insta::assert_snapshot!(
        eval_json(r#"["b.c", "a.c"].uniqueConcat(["a.c", "x.h"]).filter(f => f.endsWith(".c")).map(f => "src/" + f)"#),
        @r#"["src/b.c","src/a.c"]"#
    );
}

#[test]
fn test_eval_errors() {
    insta::assert_snapshot!(eval_result("undefinedThing + 1"), @"Eval error: Undefined variable: undefinedThing");
}

// =============================================================================
// Resolved products
// =============================================================================

#[test]
fn test_resolved_products() {
    let text = r#"Project {
        Product {
            name: "app"
            type: ["application"]
            files: ["main.c"]
        }
        Product {
            name: "lib"
            targetName: name + "-1.0"
        }
    }"#;
    insta::assert_snapshot!(
        resolve_json(text, &["name", "type", "targetName", "files"]),
        @r#"[{"name":"app","type":["application"],"targetName":"app","files":["/p/main.c"]},{"name":"lib","type":[],"targetName":"lib-1.0","files":[]}]"#
    );
}
