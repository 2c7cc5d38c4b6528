//! Module instantiation
//!
//! Evaluates the `Depends` items of a product and, recursively, of every
//! module it loads, and turns each dependency into a module instance: an
//! item-valued property of the loading item whose prototype chain ends at
//! the shared module prototype. Every loaded instance is reported as a
//! [`ModuleEdge`]; instances of one module reached on different paths are
//! unified afterwards by the [`ModuleMerger`](crate::module_merger::ModuleMerger).

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{LangError, LangResult};
use crate::evaluator::Evaluator;
use crate::item::{ItemType, ModuleEdge};
use crate::location::CodeLocation;
use crate::pool::{ItemId, ItemPool};
use crate::reader::ItemReader;
use crate::value::Value;
use crate::variant::VmValue;
use crate::version::{Version, VersionRange};

/// One evaluated `Depends` item
#[derive(Debug, Clone)]
struct Dependency {
    name: Vec<String>,
    required: bool,
    version_range: VersionRange,
    location: CodeLocation,
}

/// The product whose modules are being loaded
#[derive(Debug, Clone, Copy)]
struct ProductContext {
    product: ItemId,
    project: Option<ItemId>,
}

pub struct ModuleLoader<'a> {
    reader: &'a mut ItemReader,
    pool: &'a mut ItemPool,
    project_dir: Option<PathBuf>,
    /// Names of products; `Depends` on one of them is not a module dependency
    product_names: FxHashSet<String>,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(reader: &'a mut ItemReader, pool: &'a mut ItemPool, project_dir: Option<PathBuf>) -> Self {
        Self {
            reader,
            pool,
            project_dir,
            product_names: FxHashSet::default(),
        }
    }

    pub fn with_product_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.product_names.extend(names);
        self
    }

    /// A `Scope` item exposing `product` and `project`, enclosed by `outer`
    pub fn create_scope(
        pool: &mut ItemPool,
        product: Option<ItemId>,
        project: Option<ItemId>,
        outer: Option<ItemId>,
    ) -> ItemId {
        let as_value = |item: Option<ItemId>| {
            Value::literal(item.map(VmValue::Item).unwrap_or(VmValue::Undefined))
        };
        let scope = pool.create(ItemType::Scope);
        let data = pool.get_mut(scope);
        data.scope = outer;
        if product.is_some() {
            data.properties.insert("product".to_string(), as_value(product));
        }
        data.properties.insert("project".to_string(), as_value(project));
        scope
    }

    /// Load every module the product depends on, directly or transitively.
    ///
    /// The returned edges are grouped by module name in order of first
    /// appearance; the first edge of each name is the product's own instance.
    pub fn load_product_modules(
        &mut self,
        product: ItemId,
        project: Option<ItemId>,
    ) -> LangResult<Vec<ModuleEdge>> {
        let ctx = ProductContext { product, project };
        let mut loaded = Vec::new();
        let mut stack = Vec::new();
        self.load_dependencies(ctx, product, &mut stack, &mut loaded)?;

        let mut names: Vec<Vec<String>> = Vec::new();
        for (_, edge) in &loaded {
            if !names.contains(&edge.name) {
                names.push(edge.name.clone());
            }
        }

        let mut edges = Vec::with_capacity(loaded.len());
        for name in names {
            let group: Vec<&(ItemId, ModuleEdge)> =
                loaded.iter().filter(|(_, edge)| edge.name == name).collect();
            match group.iter().position(|(loading, _)| *loading == product) {
                Some(direct) => edges.push(group[direct].1.clone()),
                None => {
                    let prototype = self.pool.root_prototype(group[0].1.item);
                    let (instance, _) = self.instantiate(ctx, product, &name, prototype)?;
                    tracing::debug!(module = %name.join("."), "adding product instance of transitively loaded module");
                    edges.push(ModuleEdge {
                        name: name.clone(),
                        item: instance,
                        required: false,
                        version_range: VersionRange::default(),
                        product: Some(product),
                    });
                }
            }
            edges.extend(
                group
                    .iter()
                    .filter(|(loading, _)| *loading != product)
                    .map(|(_, edge)| edge.clone()),
            );
        }
        Ok(edges)
    }

    fn load_dependencies(
        &mut self,
        ctx: ProductContext,
        loading_item: ItemId,
        stack: &mut Vec<String>,
        loaded: &mut Vec<(ItemId, ModuleEdge)>,
    ) -> LangResult<()> {
        for dependency in self.evaluate_depends(loading_item)? {
            let key = dependency.name.join(".");
            if self.product_names.contains(&key) {
                tracing::debug!(product = %key, "skipping product dependency");
                continue;
            }
            if stack.contains(&key) {
                let mut cycle = stack.clone();
                cycle.push(key);
                return Err(LangError::ModuleCycle(cycle.join(" -> ")).at(&dependency.location));
            }

            let project_dir = self.project_dir.clone();
            let prototype =
                self.reader
                    .module_prototype(self.pool, &dependency.name, project_dir.as_deref())?;
            let Some(prototype) = prototype else {
                if dependency.required {
                    return Err(LangError::ModuleNotFound { name: key }.at(&dependency.location));
                }
                tracing::debug!(module = %key, "optional module not found");
                continue;
            };

            let (instance, created) =
                self.instantiate(ctx, loading_item, &dependency.name, prototype)?;
            tracing::debug!(module = %key, instance = %instance, "loaded module instance");
            loaded.push((
                loading_item,
                ModuleEdge {
                    name: dependency.name.clone(),
                    item: instance,
                    required: dependency.required,
                    version_range: dependency.version_range.clone(),
                    product: Some(ctx.product),
                },
            ));
            if created {
                stack.push(key);
                self.load_dependencies(ctx, instance, stack, loaded)?;
                stack.pop();
            }
        }
        Ok(())
    }

    /// Evaluate the `Depends` children of a product, or of the prototype of
    /// a module instance. Module `Depends` items are shared, so each loading
    /// instance evaluates its own copies.
    fn evaluate_depends(&mut self, loading_item: ItemId) -> LangResult<Vec<Dependency>> {
        let is_module = self.pool.item_type(loading_item).is_module_instance();
        let source = if is_module {
            self.pool.root_prototype(loading_item)
        } else {
            loading_item
        };

        let mut depends_items = Vec::new();
        for child in self.pool.children(source) {
            if self.pool.item_type(child) != ItemType::Depends {
                continue;
            }
            let item = if is_module {
                self.pool.clone_item(child)
            } else {
                child
            };
            self.pool.get_mut(item).scope = Some(loading_item);
            depends_items.push(item);
        }
        if depends_items.is_empty() {
            return Ok(Vec::new());
        }

        let eval = Evaluator::new(self.pool, Arc::clone(self.reader.externals()));
        let mut dependencies = Vec::new();
        for item in depends_items {
            let location = self.pool.location(item);
            if !eval.bool_value(item, "condition")? {
                continue;
            }
            let Some(name) = eval.string_value(item, "name")? else {
                return Err(LangError::InvalidOperation(
                    "Depends item without a module name".to_string(),
                )
                .at(&location));
            };
            let version_range = VersionRange::new(
                parse_version(&eval, item, "versionAtLeast", &location)?,
                parse_version(&eval, item, "versionBelow", &location)?,
            );
            let required = eval.bool_value(item, "required")?;
            let base: Vec<String> = name.split('.').map(str::to_string).collect();
            let submodules = eval.string_list_value(item, "submodules")?;

            let names = if submodules.is_empty() {
                vec![base]
            } else {
                submodules
                    .iter()
                    .map(|sub| {
                        let mut full = base.clone();
                        full.extend(sub.split('.').map(str::to_string));
                        full
                    })
                    .collect()
            };
            for name in names {
                dependencies.push(Dependency {
                    name,
                    required,
                    version_range: version_range.clone(),
                    location: location.clone(),
                });
            }
        }
        Ok(dependencies)
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// The instance of a module for a loading item; `false` if the loading
    /// item already had one.
    ///
    /// A placeholder the loading item bound itself becomes the instance.
    /// Otherwise a new instance is created whose prototype is the placeholder
    /// the loading module's prototype bound (if any) or the module prototype.
    fn instantiate(
        &mut self,
        ctx: ProductContext,
        loading_item: ItemId,
        name: &[String],
        prototype: ItemId,
    ) -> LangResult<(ItemId, bool)> {
        let Some((last, prefix)) = name.split_last() else {
            return Err(LangError::InvalidOperation("empty module name".to_string()));
        };
        let full_name = name.join(".");

        let mut owner = loading_item;
        for segment in prefix {
            owner = match own_item(self.pool, owner, segment) {
                Some(item) => {
                    if self.pool.item_type(item) == ItemType::ModuleInstancePlaceholder {
                        self.pool.set_item_type(item, ItemType::ModulePrefix);
                    }
                    item
                }
                None => self
                    .pool
                    .create_item_value(owner, segment, ItemType::ModulePrefix),
            };
        }

        if let Some(existing) = own_item(self.pool, owner, last) {
            if self.pool.item_type(existing) == ItemType::ModuleInstance {
                return Ok((existing, false));
            }
            let scope = Self::create_scope(self.pool, Some(ctx.product), ctx.project, Some(loading_item));
            self.pool.set_item_type(existing, ItemType::ModuleInstance);
            let data = self.pool.get_mut(existing);
            data.prototype = Some(prototype);
            data.type_name = full_name;
            data.scope = Some(scope);
            return Ok((existing, true));
        }

        let inherited = self
            .pool
            .prototype_chain(loading_item)
            .skip(1)
            .find_map(|item| own_item_at(self.pool, item, name));
        if let Some(placeholder) = inherited {
            if self.pool.prototype(placeholder).is_none() {
                self.pool.get_mut(placeholder).prototype = Some(prototype);
            }
        }

        let scope = Self::create_scope(self.pool, Some(ctx.product), ctx.project, Some(loading_item));
        let location = self.pool.location(prototype);
        let file = self.pool.file(prototype);
        let instance = self
            .pool
            .create_item_value(owner, last, ItemType::ModuleInstance);
        let data = self.pool.get_mut(instance);
        data.prototype = Some(inherited.unwrap_or(prototype));
        data.type_name = full_name;
        data.scope = Some(scope);
        data.location = location;
        data.file = file;
        Ok((instance, true))
    }

    /// Turn the module bindings of the product's groups into instances whose
    /// prototype and outer item is the enclosing instance (the product's
    /// canonical instance, or the parent group's).
    pub fn instantiate_group_modules(
        &mut self,
        product: ItemId,
        project: Option<ItemId>,
        modules: &[ModuleEdge],
    ) {
        let ctx = ProductContext { product, project };
        let enclosing: Vec<(Vec<String>, ItemId)> =
            modules.iter().map(|e| (e.name.clone(), e.item)).collect();
        for child in self.pool.children(product) {
            if self.pool.item_type(child) == ItemType::Group {
                self.instantiate_in_group(ctx, child, &enclosing);
            }
        }
    }

    fn instantiate_in_group(&mut self, ctx: ProductContext, group: ItemId, enclosing: &[(Vec<String>, ItemId)]) {
        self.pool.get_mut(group).scope = Some(ctx.product);

        let mut own = Vec::with_capacity(enclosing.len());
        for (name, outer) in enclosing {
            let Some(placeholder) = own_item_at(self.pool, group, name) else {
                own.push((name.clone(), *outer));
                continue;
            };
            let mut owner = group;
            for segment in &name[..name.len() - 1] {
                if let Some(prefix) = own_item(self.pool, owner, segment) {
                    if self.pool.item_type(prefix) == ItemType::ModuleInstancePlaceholder {
                        self.pool.set_item_type(prefix, ItemType::ModulePrefix);
                    }
                    owner = prefix;
                }
            }
            let scope = Self::create_scope(self.pool, Some(ctx.product), ctx.project, Some(group));
            self.pool.set_item_type(placeholder, ItemType::ModuleInstance);
            let data = self.pool.get_mut(placeholder);
            data.prototype = Some(*outer);
            data.outer_item = Some(*outer);
            data.scope = Some(scope);
            data.type_name = name.join(".");
            tracing::debug!(module = %name.join("."), group = %group, "instantiated group module");
            own.push((name.clone(), placeholder));
        }

        for child in self.pool.children(group) {
            if self.pool.item_type(child) == ItemType::Group {
                self.instantiate_in_group(ctx, child, &own);
            }
        }
    }
}

fn own_item(pool: &ItemPool, item: ItemId, name: &str) -> Option<ItemId> {
    pool.own_property(item, name).and_then(|v| v.as_item())
}

/// The item reached from `item` through own item-valued properties
fn own_item_at(pool: &ItemPool, item: ItemId, path: &[String]) -> Option<ItemId> {
    path.iter()
        .try_fold(item, |current, segment| own_item(pool, current, segment))
}

fn parse_version(
    eval: &Evaluator<'_>,
    item: ItemId,
    name: &str,
    location: &CodeLocation,
) -> LangResult<Option<Version>> {
    match eval.string_value(item, name)? {
        None => Ok(None),
        Some(text) => Version::parse(&text).map(Some).ok_or_else(|| {
            LangError::InvalidOperation(format!("invalid version '{}' in {}", text, name)).at(location)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ExternalRegistry;
    use std::path::Path;

    fn setup(files: &[(&str, &str)]) -> (ItemReader, ItemPool, ItemId) {
        let mut reader = ItemReader::new(vec![PathBuf::from("/sp")], Arc::new(ExternalRegistry::new()));
        for (path, text) in files {
            reader.set_source(path, *text);
        }
        let mut pool = ItemPool::new();
        let product = reader.read_file(&mut pool, Path::new("/p/app.qbs")).unwrap();
        let scope = ModuleLoader::create_scope(&mut pool, Some(product), None, None);
        pool.get_mut(product).scope = Some(scope);
        (reader, pool, product)
    }

    fn names(edges: &[ModuleEdge]) -> Vec<String> {
        edges.iter().map(ModuleEdge::full_name).collect()
    }

    #[test]
    fn product_placeholder_becomes_instance() {
        let (mut reader, mut pool, product) = setup(&[
            ("/sp/modules/cpp/cpp.qbs", "Module { property stringList defines }"),
            ("/p/app.qbs", "Product { Depends { name: \"cpp\" } cpp.defines: [\"A\"] }"),
        ]);
        let placeholder = own_item(&pool, product, "cpp").unwrap();
        let edges = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap();
        assert_eq!(names(&edges), vec!["cpp"]);
        assert_eq!(edges[0].item, placeholder);
        assert_eq!(pool.item_type(placeholder), ItemType::ModuleInstance);
        assert_eq!(pool.item_type(pool.root_prototype(placeholder)), ItemType::Module);
    }

    #[test]
    fn transitive_modules_get_a_product_instance_first() {
        let (mut reader, mut pool, product) = setup(&[
            ("/sp/modules/m/m.qbs", "Module { property stringList x }"),
            ("/sp/modules/a/a.qbs", "Module { Depends { name: \"m\" } m.x: [\"a\"] }"),
            ("/sp/modules/b/b.qbs", "Module { Depends { name: \"m\" } m.x: [\"b\"] }"),
            ("/p/app.qbs", "Product { Depends { name: \"a\" } Depends { name: \"b\" } }"),
        ]);
        let edges = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap();
        assert_eq!(names(&edges), vec!["a", "m", "m", "m", "b"]);
        assert_eq!(Some(edges[1].item), own_item(&pool, product, "m"));
        assert!(!edges[1].required);
        assert_ne!(edges[2].item, edges[3].item);
    }

    #[test]
    fn missing_modules() {
        let (mut reader, mut pool, product) = setup(&[(
            "/p/app.qbs",
            "Product { Depends { name: \"opt\"; required: false } Depends { name: \"gone\" } }",
        )]);
        let err = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap_err();
        assert!(matches!(err.root_cause(), LangError::ModuleNotFound { name } if name == "gone"));
    }

    #[test]
    fn module_cycles_are_errors() {
        let (mut reader, mut pool, product) = setup(&[
            ("/sp/modules/a/a.qbs", "Module { Depends { name: \"b\" } }"),
            ("/sp/modules/b/b.qbs", "Module { Depends { name: \"a\" } }"),
            ("/p/app.qbs", "Product { Depends { name: \"a\" } }"),
        ]);
        let err = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap_err();
        assert!(matches!(err.root_cause(), LangError::ModuleCycle(chain) if chain == "a -> b -> a"));
    }

    #[test]
    fn submodules_and_prefixes() {
        let (mut reader, mut pool, product) = setup(&[
            ("/sp/modules/Qt/core/core.qbs", "Module { }"),
            ("/sp/modules/Qt/gui/gui.qbs", "Module { Depends { name: \"Qt.core\" } }"),
            ("/p/app.qbs", "Product { Depends { name: \"Qt\"; submodules: [\"gui\"] } }"),
        ]);
        let edges = ModuleLoader::new(&mut reader, &mut pool, None)
            .load_product_modules(product, None)
            .unwrap();
        assert_eq!(names(&edges), vec!["Qt.gui", "Qt.core", "Qt.core"]);
        let qt = own_item(&pool, product, "Qt").unwrap();
        assert_eq!(pool.item_type(qt), ItemType::ModulePrefix);
        assert_eq!(own_item(&pool, qt, "gui"), Some(edges[0].item));
    }
}
