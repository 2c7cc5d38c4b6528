//! Module merger
//!
//! A product reaches a module once directly and once more through every
//! module that depends on it. [`ModuleMerger::merge`] collapses these
//! instances into the product's own (canonical) instance: the bindings of
//! every instance are moved onto it in priority order, list properties are
//! chained so that all contributions are concatenated, and all references
//! to the other instances are redirected to the canonical one.

use std::fmt;

use indexmap::IndexMap;
use rqbs_parser::{Expr, ExprKind};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{LangError, LangResult};
use crate::item::{ItemType, ModuleEdge};
use crate::pool::{ItemId, ItemPool};
use crate::value::{SourceBody, SourceFlags, Value, ValueKind, ValuePtr};
use crate::version::VersionRange;

/// What to do when two modules set a scalar property to different constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub conflict_policy: ConflictPolicy,
    /// Shadow products never report scalar conflicts
    pub shadow_product: bool,
}

/// Two modules set the same scalar property of a third one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarConflict {
    pub module: String,
    pub property: String,
    pub first: String,
    pub second: String,
}

impl fmt::Display for ScalarConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conflicting scalar values for property '{}' of module '{}': '{}' and '{}'",
            self.property, self.module, self.first, self.second
        )
    }
}

#[derive(Debug, Default)]
pub struct MergeReport {
    /// One edge per module name, pointing at the canonical instance
    pub modules: Vec<ModuleEdge>,
    pub conflicts: Vec<ScalarConflict>,
}

/// Accumulated value of one property of the module being merged
struct Accumulated {
    value: ValuePtr,
    from_product: bool,
}

pub struct ModuleMerger<'a> {
    pool: &'a mut ItemPool,
    options: &'a MergeOptions,
    report: MergeReport,
}

impl<'a> ModuleMerger<'a> {
    /// Merge the module edges of one product.
    ///
    /// `edges` lists every loaded instance; the first edge of each module
    /// name must be the product's own instance.
    #[tracing::instrument(level = "debug", skip_all, fields(product = %product, edges = edges.len()))]
    pub fn merge(
        pool: &'a mut ItemPool,
        product: ItemId,
        edges: &[ModuleEdge],
        options: &'a MergeOptions,
    ) -> LangResult<MergeReport> {
        let mut merger = ModuleMerger {
            pool,
            options,
            report: MergeReport::default(),
        };

        let mut names: Vec<&[String]> = Vec::new();
        for edge in edges {
            if !names.contains(&edge.name.as_slice()) {
                names.push(&edge.name);
            }
        }

        let mut replacements = FxHashMap::default();
        for name in names {
            let group: Vec<&ModuleEdge> = edges.iter().filter(|e| e.name == name).collect();
            let canonical = group[0].item;
            let mut required = false;
            let mut version_range = VersionRange::default();
            let mut others = Vec::new();
            for edge in &group {
                required |= edge.required;
                version_range.narrow(&edge.version_range);
                if edge.item != canonical && !others.contains(&edge.item) {
                    others.push(edge.item);
                }
            }

            merger.merge_module(name, canonical, &others)?;
            for other in others {
                replacements.insert(other, canonical);
            }
            tracing::debug!(
                module = %name.join("."),
                canonical = %canonical,
                instances = group.len(),
                "merged module instances"
            );
            merger.report.modules.push(ModuleEdge {
                name: name.to_vec(),
                item: canonical,
                required,
                version_range,
                product: Some(product),
            });
        }

        let mut holders = vec![product];
        holders.extend(edges.iter().map(|e| e.item));
        merger.redirect(&holders, &replacements);

        let mut report = merger.report;
        merger.pool.get_mut(product).modules = report.modules.clone();
        report.conflicts.dedup();
        Ok(report)
    }

    /// Move the bindings of all instances of one module onto the canonical
    /// instance, lowest priority first
    fn merge_module(&mut self, name: &[String], canonical: ItemId, others: &[ItemId]) -> LangResult<()> {
        let module = name.join(".");
        let mut accumulated: IndexMap<String, Accumulated> = IndexMap::new();
        let mut seen = FxHashSet::default();

        let sources = others.iter().rev().copied().chain(std::iter::once(canonical));
        for source in sources.collect::<Vec<_>>() {
            let from_product = source == canonical;
            let backing: Vec<ItemId> = self
                .pool
                .prototype_chain(source)
                .take_while(|&item| self.pool.item_type(item) != ItemType::Module)
                .collect();

            let mut contributed = FxHashSet::default();
            for item in backing {
                if !seen.insert(item) {
                    continue;
                }
                let properties: Vec<(String, ValuePtr)> = self
                    .pool
                    .get(item)
                    .properties
                    .iter()
                    .filter(|(_, v)| !v.is_item())
                    .map(|(n, v)| (n.clone(), v.clone()))
                    .collect();
                for (property, value) in properties {
                    if !contributed.insert(property.clone()) {
                        continue;
                    }
                    let is_list = self
                        .pool
                        .property_declaration(canonical, &property)
                        .is_some_and(|d| d.is_list());
                    let value = value.with_next(None).with_defining_item(source);
                    let merged = match accumulated.get(&property) {
                        None => value,
                        Some(previous) if is_list => value.with_next(Some(previous.value.clone())),
                        Some(previous) => {
                            self.check_conflict(&module, &property, previous, &value, from_product)?;
                            with_base_value(value, &previous.value)
                        }
                    };
                    accumulated.insert(
                        property,
                        Accumulated {
                            value: merged,
                            from_product,
                        },
                    );
                }
            }
        }

        let prototype = self.pool.root_prototype(canonical);
        for (property, entry) in accumulated {
            let is_list = self
                .pool
                .property_declaration(canonical, &property)
                .is_some_and(|d| d.is_list());
            let mut value = entry.value;
            if is_list && !value.chain().any(|link| reads_overridden_value(link)) {
                let default = self
                    .pool
                    .own_property(prototype, &property)
                    .filter(|v| !v.is_item());
                if let Some(default) = default {
                    value = value.append_to_chain(default.with_next(None));
                }
            }
            self.pool
                .get_mut(canonical)
                .properties
                .insert(property, value);
        }
        Ok(())
    }

    fn check_conflict(
        &mut self,
        module: &str,
        property: &str,
        previous: &Accumulated,
        value: &ValuePtr,
        from_product: bool,
    ) -> LangResult<()> {
        if self.options.shadow_product || from_product || previous.from_product {
            return Ok(());
        }
        if !is_constant(&previous.value) || !is_constant(value) {
            return Ok(());
        }
        let (first, second) = (previous.value.source_code(), value.source_code());
        if first == second {
            return Ok(());
        }

        let conflict = ScalarConflict {
            module: module.to_string(),
            property: property.to_string(),
            first,
            second,
        };
        match self.options.conflict_policy {
            ConflictPolicy::Warn => {
                tracing::warn!("{}", conflict);
                self.report.conflicts.push(conflict);
                Ok(())
            }
            ConflictPolicy::Error => Err(LangError::ConflictingScalar {
                module: conflict.module,
                property: conflict.property,
                first: conflict.first,
                second: conflict.second,
            }),
        }
    }

    /// Point item-valued properties that hold a merged-away instance at the
    /// canonical instance, descending through module prefixes
    fn redirect(&mut self, holders: &[ItemId], replacements: &FxHashMap<ItemId, ItemId>) {
        let mut visited = FxHashSet::default();
        let mut pending = holders.to_vec();
        while let Some(item) = pending.pop() {
            if !visited.insert(item) {
                continue;
            }
            let properties: Vec<(String, ItemId)> = self
                .pool
                .get(item)
                .properties
                .iter()
                .filter_map(|(name, v)| v.as_item().map(|target| (name.clone(), target)))
                .collect();
            for (name, target) in properties {
                if let Some(&canonical) = replacements.get(&target) {
                    self.pool
                        .get_mut(item)
                        .properties
                        .insert(name, Value::item(canonical));
                } else if self.pool.item_type(target) == ItemType::ModulePrefix {
                    pending.push(target);
                }
            }
        }
    }
}

/// A scalar override keeps the value it replaced as its `base`
fn with_base_value(value: ValuePtr, previous: &ValuePtr) -> ValuePtr {
    let mut value = value;
    if let ValueKind::Source(source) = &mut std::sync::Arc::make_mut(&mut value).kind {
        if source.base_value.is_none() {
            source.base_value = Some(previous.clone());
        }
    }
    value
}

/// Links whose result already includes the module's default
fn reads_overridden_value(link: &Value) -> bool {
    if link.created_by_properties_block {
        return true;
    }
    let Some(source) = link.as_source() else {
        return false;
    };
    source.uses(SourceFlags::USES_BASE)
        || source
            .alternatives
            .iter()
            .filter_map(|a| a.value.as_source())
            .any(|s| s.uses(SourceFlags::USES_BASE))
}

/// Values whose result does not depend on any other property
fn is_constant(value: &Value) -> bool {
    match &value.kind {
        ValueKind::Literal(_) => true,
        ValueKind::Item(_) => false,
        ValueKind::Source(source) => {
            source.alternatives.is_empty()
                && matches!(source.body.as_ref(), SourceBody::Expr(expr) if is_constant_expr(expr))
        }
    }
}

fn is_constant_expr(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Undefined
        | ExprKind::Null
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::String(_) => true,
        ExprKind::Array(items) => items.iter().all(is_constant_expr),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use super::*;
    use crate::evaluator::{Evaluator, ExternalRegistry};
    use crate::modules::ModuleLoader;
    use crate::reader::ItemReader;
    use crate::variant::VmValue;

    struct Loaded {
        pool: ItemPool,
        product: ItemId,
        edges: Vec<ModuleEdge>,
    }

    fn load(files: &[(&str, &str)]) -> Loaded {
        let mut reader = ItemReader::new(vec![PathBuf::from("/sp")], Arc::new(ExternalRegistry::new()));
        for (path, text) in files {
            reader.set_source(path, *text);
        }
        let mut pool = ItemPool::new();
        let product = reader.read_file(&mut pool, Path::new("/p/app.qbs")).unwrap();
        let scope = ModuleLoader::create_scope(&mut pool, Some(product), None, None);
        pool.get_mut(product).scope = Some(scope);
        let edges = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap();
        Loaded { pool, product, edges }
    }

    const DIAMOND: &[(&str, &str)] = &[
        ("/sp/modules/m/m.qbs", "Module { property stringList x: [\"default\"]; property int level: 0 }"),
        ("/sp/modules/a/a.qbs", "Module { Depends { name: \"m\" } m.x: [\"a\"]; m.level: 1 }"),
        ("/sp/modules/b/b.qbs", "Module { Depends { name: \"m\" } m.x: [\"b\"]; m.level: 2 }"),
    ];

    fn diamond(product: &'static str) -> Loaded {
        let mut files = DIAMOND.to_vec();
        files.push(("/p/app.qbs", product));
        load(&files)
    }

    fn instance(pool: &ItemPool, item: ItemId, name: &str) -> ItemId {
        pool.own_property(item, name).and_then(|v| v.as_item()).unwrap()
    }

    #[test]
    fn diamond_dependency_has_one_instance_with_both_values() {
        let Loaded { mut pool, product, edges } =
            diamond("Product { Depends { name: \"a\" } Depends { name: \"b\" } }");
        let report = ModuleMerger::merge(&mut pool, product, &edges, &MergeOptions::default()).unwrap();

        let names: Vec<String> = report.modules.iter().map(ModuleEdge::full_name).collect();
        assert_eq!(names, vec!["a", "m", "b"]);
        let m = instance(&pool, product, "m");
        let a = instance(&pool, product, "a");
        let b = instance(&pool, product, "b");
        assert_eq!(instance(&pool, a, "m"), m);
        assert_eq!(instance(&pool, b, "m"), m);
        assert_eq!(pool.modules(product).len(), 3);

        let eval = Evaluator::new(&pool, Arc::new(ExternalRegistry::new()));
        assert_eq!(
            eval.value(m, "x").unwrap(),
            VmValue::string_list(["a", "b", "default"])
        );
        // a is the nearer dependency and wins the scalar
        assert_eq!(eval.value(m, "level").unwrap(), VmValue::Int(1));
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].property, "level");
    }

    #[test]
    fn conflicts_can_be_errors() {
        let Loaded { mut pool, product, edges } =
            diamond("Product { Depends { name: \"a\" } Depends { name: \"b\" } }");
        let options = MergeOptions {
            conflict_policy: ConflictPolicy::Error,
            shadow_product: false,
        };
        let err = ModuleMerger::merge(&mut pool, product, &edges, &options).unwrap_err();
        assert!(matches!(err, LangError::ConflictingScalar { ref property, .. } if property == "level"));
    }

    #[test]
    fn product_values_win_without_conflict() {
        let Loaded { mut pool, product, edges } = diamond(
            "Product { Depends { name: \"a\" } Depends { name: \"b\" } Depends { name: \"m\" } m.level: 7; m.x: [\"p\"] }",
        );
        let options = MergeOptions {
            conflict_policy: ConflictPolicy::Error,
            shadow_product: false,
        };
        // a and b still disagree with each other
        assert!(ModuleMerger::merge(&mut pool, product, &edges, &options).is_err());

        let Loaded { mut pool, product, edges } = diamond(
            "Product { Depends { name: \"a\" } Depends { name: \"m\" } m.level: 7; m.x: [\"p\"] }",
        );
        let report = ModuleMerger::merge(&mut pool, product, &edges, &options).unwrap();
        assert!(report.conflicts.is_empty());
        let m = instance(&pool, product, "m");
        let eval = Evaluator::new(&pool, Arc::new(ExternalRegistry::new()));
        assert_eq!(eval.value(m, "level").unwrap(), VmValue::Int(7));
        assert_eq!(
            eval.value(m, "x").unwrap(),
            VmValue::string_list(["p", "a", "default"])
        );
    }

    #[test]
    fn shadow_products_suppress_conflicts() {
        let Loaded { mut pool, product, edges } =
            diamond("Product { Depends { name: \"a\" } Depends { name: \"b\" } }");
        let options = MergeOptions {
            conflict_policy: ConflictPolicy::Error,
            shadow_product: true,
        };
        let report = ModuleMerger::merge(&mut pool, product, &edges, &options).unwrap();
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn merged_requirements_and_ranges() {
        let Loaded { mut pool, product, edges } = diamond(
            r#"Product {
                Depends { name: "m"; required: false; versionAtLeast: "1.0" }
                Depends { name: "a" }
            }"#,
        );
        let report = ModuleMerger::merge(&mut pool, product, &edges, &MergeOptions::default()).unwrap();
        let m = report.modules.iter().find(|e| e.full_name() == "m").unwrap();
        assert!(m.required);
        assert_eq!(m.version_range.to_string(), "[1.0, )");
    }
}
