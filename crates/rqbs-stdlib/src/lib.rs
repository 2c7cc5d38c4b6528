//! rqbs standard library
//!
//! Builtin methods, global functions and namespaces (`Math`, `FileInfo`,
//! `JSON`, `Object`) of the expression language, registered into an
//! [`ExternalRegistry`].

mod base;
mod collections;
mod file_info;
mod math;
mod string;

use rqbs_runtime::ExternalRegistry;

/// Register all standard library external functions
pub fn register_stdlib(registry: &mut ExternalRegistry) {
    base::register(registry);
    string::register(registry);
    collections::register(registry);
    math::register(registry);
    file_info::register(registry);
}

/// Create an external registry with all stdlib functions registered
pub fn stdlib_registry() -> ExternalRegistry {
    let mut registry = ExternalRegistry::new();
    register_stdlib(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use rqbs_runtime::{Evaluator, ItemPool, VmValue};

    use super::*;

    fn eval(source: &str) -> VmValue {
        let pool = ItemPool::new();
        let evaluator = Evaluator::new(&pool, Arc::new(stdlib_registry()));
        evaluator
            .evaluate_expression(source)
            .unwrap_or_else(|e| panic!("{}: {}", source, e))
    }

    fn eval_str(source: &str) -> String {
        eval(source).to_string()
    }

    #[test]
    fn string_methods() {
        assert_eq!(eval("'libfoo.so'.startsWith('lib')"), VmValue::Boolean(true));
        assert_eq!(eval("'a,b,,c'.split(',')"), VmValue::string_list(["a", "b", "", "c"]));
        assert_eq!(eval_str("'  x '.trim().toUpperCase()"), "X");
        assert_eq!(eval("'héllo'.indexOf('l')"), VmValue::Int(2));
        assert_eq!(eval_str("'abcdef'.slice(1, -1)"), "bcde");
        assert_eq!(eval_str("'x'.slice(-9223372036854775807 - 1)"), "x");
        assert_eq!(eval_str("'abcdef'.substring(4, 1)"), "bcd");
        assert_eq!(eval_str("'a-b-c'.replace('-', '+')"), "a+b-c");
        assert_eq!(eval_str("'a-b-c'.replaceAll('-', '+')"), "a+b+c");
        assert_eq!(eval_str("'v'.concat(1, '.', 2)"), "v1.2");
    }

    #[test]
    fn list_methods() {
        assert_eq!(
            eval("['a'].concat(['b', 'c'], 'd')"),
            VmValue::string_list(["a", "b", "c", "d"])
        );
        assert_eq!(
            eval("['a', 'b'].uniqueConcat(['b', 'c'])"),
            VmValue::string_list(["a", "b", "c"])
        );
        assert_eq!(eval("['x', 'y'].contains('y')"), VmValue::Boolean(true));
        assert_eq!(eval("['x', 'y'].indexOf('z')"), VmValue::Int(-1));
        assert_eq!(eval_str("['a', undefined, 'c'].join('/')"), "a//c");
        assert_eq!(
            eval("[1, 2, 3, 4].filter(x => x % 2 == 0).map(x => x * 10)"),
            VmValue::list(vec![VmValue::Int(20), VmValue::Int(40)])
        );
        assert_eq!(eval("[1, 2, 3].reduce((a, b) => a + b, 10)"), VmValue::Int(16));
        assert_eq!(eval("[1, 2, 3].some(x => x > 2)"), VmValue::Boolean(true));
        assert_eq!(eval("[1, 2, 3].every(x => x > 2)"), VmValue::Boolean(false));
        assert_eq!(eval("['a', 'b', 'c'].slice(-2)"), VmValue::string_list(["b", "c"]));
        assert_eq!(
            eval("['a'].slice(-9223372036854775807 - 1)"),
            VmValue::string_list(["a"])
        );
    }

    #[test]
    fn math_and_numbers() {
        assert_eq!(eval("Math.max(1, 7, 3)"), VmValue::Int(7));
        assert_eq!(eval("Math.min(2.5, 1)"), VmValue::Int(1));
        assert_eq!(eval("Math.floor(2.7)"), VmValue::Int(2));
        assert_eq!(eval("Math.round(-2.5)"), VmValue::Int(-2));
        assert_eq!(eval("Math.pow(2, 10)"), VmValue::Int(1024));
        assert_eq!(eval_str("(3.14159).toFixed(2)"), "3.14");
        assert_eq!(eval_str("(255).toString(16)"), "ff");
    }

    #[test]
    fn globals() {
        assert_eq!(eval("parseInt('42px')"), VmValue::Int(42));
        assert_eq!(eval("parseInt('0x1F')"), VmValue::Int(31));
        assert_eq!(eval("parseInt('-7', 10)"), VmValue::Int(-7));
        assert_eq!(eval("isNaN(parseInt('abc'))"), VmValue::Boolean(true));
        assert_eq!(eval("parseFloat('2.5e1x')"), VmValue::Int(25));
        assert_eq!(eval_str("String(12) + Number('3')"), "123");
        assert_eq!(eval("Boolean('')"), VmValue::Boolean(false));
    }

    #[test]
    fn json_and_object() {
        assert_eq!(eval_str("JSON.stringify({a: 1, b: ['x']})"), r#"{"a":1,"b":["x"]}"#);
        assert_eq!(eval("JSON.parse('[1, \"two\"]')[1]"), VmValue::string("two"));
        assert_eq!(eval("Object.keys({b: 1, a: 2})"), VmValue::string_list(["b", "a"]));
    }

    #[test]
    fn file_info() {
        assert_eq!(eval_str("FileInfo.fileName('/src/lib.so.1')"), "lib.so.1");
        assert_eq!(eval_str("FileInfo.baseName('/src/lib.so.1')"), "lib");
        assert_eq!(eval_str("FileInfo.completeBaseName('/src/lib.so.1')"), "lib.so");
        assert_eq!(eval_str("FileInfo.suffix('/src/lib.so.1')"), "1");
        assert_eq!(eval_str("FileInfo.completeSuffix('/src/lib.so.1')"), "so.1");
        assert_eq!(eval_str("FileInfo.path('/src/main.c')"), "/src");
        assert_eq!(eval_str("FileInfo.path('main.c')"), ".");
        assert_eq!(eval_str("FileInfo.joinPaths('/a/', '/b', '', 'c')"), "/a/b/c");
        assert_eq!(eval_str("FileInfo.cleanPath('/a/./b/../c')"), "/a/c");
        assert_eq!(eval("FileInfo.isAbsolutePath('C:/x')"), VmValue::Boolean(true));
        assert_eq!(eval_str("FileInfo.relativePath('/a/b/c', '/a/d')"), "../../d");
    }
}
