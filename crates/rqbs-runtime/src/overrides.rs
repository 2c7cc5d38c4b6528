//! Command line property overrides
//!
//! An override is a `key=value` assignment. The key selects the item and
//! property to replace:
//!
//! - `project.<prop>`
//! - `products.<product>.<prop>`
//! - `products.<product>.<module>.<prop>`
//! - `modules.<module>.<prop>` (every product that loaded the module)
//!
//! Values are converted against the property's declared type and installed
//! as literals, replacing whatever the item files bound.

use serde_json::Value as Json;

use crate::declaration::PropertyType;
use crate::error::{LangError, LangResult};
use crate::pool::{ItemId, ItemPool};
use crate::value::Value;
use crate::variant::VmValue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyOverrides {
    entries: Vec<(String, String)>,
}

/// Where an override key points to
#[derive(Debug, PartialEq, Eq)]
enum Target<'k> {
    Project(&'k str),
    Product(&'k str, &'k str),
    ProductModule(&'k str, String, &'k str),
    Module(String, &'k str),
}

impl PropertyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` assignments
    pub fn from_assignments<S: AsRef<str>>(assignments: impl IntoIterator<Item = S>) -> LangResult<Self> {
        let mut overrides = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (key, value) = assignment.split_once('=').ok_or_else(|| LangError::InvalidOverrideValue {
                key: assignment.to_string(),
                message: "expected key=value".to_string(),
            })?;
            overrides.insert(key.trim(), value);
        }
        Ok(overrides)
    }

    /// Add an override; a later value for the same key replaces the earlier one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Install every override into the resolved item tree.
    ///
    /// `products` pairs each enabled product's name with its item. General
    /// module overrides are applied before product specific ones, so the
    /// latter win.
    pub fn apply(
        &self,
        pool: &ItemPool,
        project: Option<ItemId>,
        products: &[(String, ItemId)],
    ) -> LangResult<()> {
        let targets = self
            .entries
            .iter()
            .map(|(key, value)| Ok((key.as_str(), value.as_str(), parse_key(key)?)))
            .collect::<LangResult<Vec<_>>>()?;

        for (key, value, target) in &targets {
            match target {
                Target::Project(property) => {
                    let project = project.ok_or_else(|| LangError::UnknownOverrideScope(key.to_string()))?;
                    install(pool, project, property, key, value)?;
                }
                Target::Module(module, property) => {
                    let instances: Vec<ItemId> = products
                        .iter()
                        .filter_map(|(_, product)| module_instance(pool, *product, module))
                        .collect();
                    if instances.is_empty() {
                        return Err(LangError::UnknownOverrideScope(key.to_string()));
                    }
                    for instance in instances {
                        install(pool, instance, property, key, value)?;
                    }
                }
                _ => {}
            }
        }

        for (key, value, target) in &targets {
            let (product_name, module, property) = match target {
                Target::Product(product, property) => (*product, None, *property),
                Target::ProductModule(product, module, property) => (*product, Some(module), *property),
                _ => continue,
            };
            let product = products
                .iter()
                .find(|(name, _)| name == product_name)
                .map(|(_, item)| *item)
                .ok_or_else(|| LangError::UnknownOverrideScope(key.to_string()))?;
            let item = match module {
                None => product,
                Some(module) => module_instance(pool, product, module)
                    .ok_or_else(|| LangError::UnknownOverrideScope(key.to_string()))?,
            };
            install(pool, item, property, key, value)?;
        }
        Ok(())
    }
}

fn parse_key(key: &str) -> LangResult<Target<'_>> {
    let unknown = || LangError::UnknownOverrideScope(key.to_string());
    let (scope, rest) = key.split_once('.').ok_or_else(unknown)?;
    match scope {
        "project" if !rest.is_empty() && !rest.contains('.') => Ok(Target::Project(rest)),
        "products" => {
            let (product, rest) = rest.split_once('.').ok_or_else(unknown)?;
            match rest.rsplit_once('.') {
                None if !rest.is_empty() => Ok(Target::Product(product, rest)),
                Some((module, property)) => Ok(Target::ProductModule(product, module.to_string(), property)),
                None => Err(unknown()),
            }
        }
        "modules" => {
            let (module, property) = rest.rsplit_once('.').ok_or_else(unknown)?;
            Ok(Target::Module(module.to_string(), property))
        }
        _ => Err(unknown()),
    }
}

fn module_instance(pool: &ItemPool, product: ItemId, module: &str) -> Option<ItemId> {
    pool.modules(product)
        .into_iter()
        .find(|edge| edge.full_name() == module)
        .map(|edge| edge.item)
}

fn install(pool: &ItemPool, item: ItemId, property: &str, key: &str, raw: &str) -> LangResult<()> {
    let declaration = pool
        .property_declaration(item, property)
        .ok_or_else(|| LangError::UnknownOverrideProperty(key.to_string()))?;
    let value = convert(key, raw, declaration.property_type)?;
    tracing::debug!(key, value = %value, "applying property override");
    pool.set_property(item, property, Value::literal(value))
}

/// Convert the text of an override to a value of the declared type
fn convert(key: &str, raw: &str, property_type: PropertyType) -> LangResult<VmValue> {
    let json = serde_json::from_str::<Json>(raw).ok();
    let invalid = |expected: &str| LangError::InvalidOverrideValue {
        key: key.to_string(),
        message: format!("expected {}, got '{}'", expected, raw),
    };

    Ok(match property_type {
        PropertyType::Bool => match json {
            Some(Json::Bool(b)) => VmValue::Boolean(b),
            _ => return Err(invalid("a boolean")),
        },
        PropertyType::Int => match json.as_ref().and_then(Json::as_i64) {
            Some(n) => VmValue::Int(n),
            None => return Err(invalid("an integer")),
        },
        PropertyType::String | PropertyType::Path => match json {
            Some(Json::String(s)) => VmValue::string(s),
            _ => VmValue::string(raw),
        },
        PropertyType::StringList | PropertyType::PathList => match json {
            Some(Json::Array(items)) => {
                let strings = items
                    .iter()
                    .map(|item| item.as_str().map(VmValue::string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| invalid("a list of strings"))?;
                VmValue::list(strings)
            }
            Some(Json::String(s)) => VmValue::string_list([s]),
            _ => VmValue::string_list(raw.split(',').map(str::trim).filter(|s| !s.is_empty())),
        },
        PropertyType::Variant => match json {
            Some(value) => VmValue::from(&value),
            None => VmValue::string(raw),
        },
        PropertyType::VarList => match json {
            Some(value @ Json::Array(_)) => VmValue::from(&value),
            Some(value) => VmValue::list(vec![VmValue::from(&value)]),
            None => VmValue::list(vec![VmValue::string(raw)]),
        },
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::evaluator::{Evaluator, ExternalRegistry};
    use crate::reader::ItemReader;

    #[test]
    fn keys_select_scopes() {
        assert_eq!(parse_key("project.name").unwrap(), Target::Project("name"));
        assert_eq!(parse_key("products.app.type").unwrap(), Target::Product("app", "type"));
        assert_eq!(
            parse_key("products.app.Qt.core.version").unwrap(),
            Target::ProductModule("app", "Qt.core".to_string(), "version")
        );
        assert_eq!(
            parse_key("modules.cpp.defines").unwrap(),
            Target::Module("cpp".to_string(), "defines")
        );
        for bad in ["name", "global.x", "products.app", "project.a.b", "modules.cpp"] {
            assert!(
                matches!(parse_key(bad), Err(LangError::UnknownOverrideScope(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn values_follow_declared_types() {
        assert_eq!(convert("k", "true", PropertyType::Bool).unwrap(), VmValue::Boolean(true));
        assert_eq!(convert("k", "42", PropertyType::Int).unwrap(), VmValue::Int(42));
        assert_eq!(convert("k", "hello", PropertyType::String).unwrap(), VmValue::string("hello"));
        assert_eq!(convert("k", "\"quoted\"", PropertyType::Path).unwrap(), VmValue::string("quoted"));
        assert_eq!(
            convert("k", "a, b", PropertyType::StringList).unwrap(),
            VmValue::string_list(["a", "b"])
        );
        assert_eq!(
            convert("k", "[\"x\"]", PropertyType::PathList).unwrap(),
            VmValue::string_list(["x"])
        );
        assert_eq!(convert("k", "1.5", PropertyType::Variant).unwrap(), VmValue::Float(1.5));
        assert_eq!(
            convert("k", "7", PropertyType::VarList).unwrap(),
            VmValue::list(vec![VmValue::Int(7)])
        );

        let err = convert("k", "yes", PropertyType::Bool).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for property override 'k': expected a boolean, got 'yes'"
        );
        assert!(convert("k", "[1]", PropertyType::StringList).is_err());
    }

    #[test]
    fn overrides_replace_bindings() {
        let mut reader = ItemReader::new(Vec::new(), Arc::new(ExternalRegistry::new()));
        reader.set_source(
            "/p/app.qbs",
            "Product { name: \"app\"; consoleApplication: false; property stringList flags: [\"-g\"] }",
        );
        let mut pool = ItemPool::new();
        let product = reader.read_file(&mut pool, Path::new("/p/app.qbs")).unwrap();

        let overrides =
            PropertyOverrides::from_assignments(["products.app.consoleApplication=true", "products.app.flags=-O2,-Wall"])
                .unwrap();
        overrides.apply(&pool, None, &[("app".to_string(), product)]).unwrap();

        let eval = Evaluator::new(&pool, Arc::new(ExternalRegistry::new()));
        assert!(eval.bool_value(product, "consoleApplication").unwrap());
        assert_eq!(eval.string_list_value(product, "flags").unwrap(), vec!["-O2", "-Wall"]);

        let err = PropertyOverrides::from_assignments(["products.app.colour=red"])
            .unwrap()
            .apply(&pool, None, &[("app".to_string(), product)])
            .unwrap_err();
        assert!(matches!(err, LangError::UnknownOverrideProperty(_)));

        let err = PropertyOverrides::from_assignments(["products.lib.name=x"])
            .unwrap()
            .apply(&pool, None, &[("app".to_string(), product)])
            .unwrap_err();
        assert!(matches!(err, LangError::UnknownOverrideScope(_)));
    }

    #[test]
    fn assignment_without_value_is_rejected() {
        assert!(PropertyOverrides::from_assignments(["project.name"]).is_err());
        let overrides = PropertyOverrides::from_assignments(["a.b=1", "a.b=2"]).unwrap();
        assert_eq!(overrides.iter().collect::<Vec<_>>(), vec![("a.b", "2")]);
    }
}
