//! Project resolution
//!
//! [`ProjectResolver`] runs the whole pipeline for one project file: read
//! the item trees, collect products, instantiate and merge modules, apply
//! property overrides and evaluate every declared property into a
//! [`ResolvedProject`].
//!
//! Everything up to the overrides mutates the item pool and runs on the
//! calling thread. Products are then evaluated independently, in parallel
//! unless disabled, each with its own [`Evaluator`] over the shared pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::{LangError, LangResult};
use crate::evaluator::{Evaluator, ExternalRegistry};
use crate::item::{ItemType, ModuleEdge};
use crate::module_merger::{ConflictPolicy, MergeOptions, ModuleMerger};
use crate::modules::ModuleLoader;
use crate::overrides::PropertyOverrides;
use crate::paths;
use crate::pool::{ItemId, ItemPool};
use crate::reader::ItemReader;
use crate::value::Value;
use crate::variant::VmValue;
use crate::version::Version;

/// Evaluated properties in declaration order
pub type PropertyMap = IndexMap<String, VmValue>;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub search_paths: Vec<PathBuf>,
    pub overrides: PropertyOverrides,
    pub conflict_policy: ConflictPolicy,
    /// Evaluate products on the rayon thread pool
    pub parallel: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            overrides: PropertyOverrides::default(),
            conflict_policy: ConflictPolicy::default(),
            parallel: true,
        }
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProject {
    pub name: Option<String>,
    pub file: String,
    pub properties: PropertyMap,
    pub products: Vec<ResolvedProduct>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProduct {
    pub name: String,
    pub enabled: bool,
    pub file: String,
    pub properties: PropertyMap,
    pub modules: IndexMap<String, ResolvedModule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ResolvedGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModule {
    pub present: bool,
    pub required: bool,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGroup {
    pub name: Option<String>,
    pub enabled: bool,
    pub properties: PropertyMap,
    /// Module properties the group sets itself
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub modules: IndexMap<String, PropertyMap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ResolvedGroup>,
}

impl ResolvedProject {
    pub fn product(&self, name: &str) -> Option<&ResolvedProduct> {
        self.products.iter().find(|p| p.name == name)
    }
}

impl ResolvedProduct {
    pub fn module(&self, name: &str) -> Option<&ResolvedModule> {
        self.modules.get(name)
    }
}

// =============================================================================
// Resolver
// =============================================================================

pub struct ProjectResolver {
    externals: Arc<ExternalRegistry>,
    options: ResolveOptions,
}

/// A collected product
#[derive(Debug, Clone)]
struct ProductEntry {
    item: ItemId,
    project: Option<ItemId>,
    name: String,
    /// False if the condition was already known to be false before loading
    /// modules
    loaded: bool,
}

/// Mutable state of one resolution
struct Resolution<'r> {
    resolver: &'r ProjectResolver,
    reader: ItemReader,
    pool: ItemPool,
    project_dir: PathBuf,
    products: Vec<ProductEntry>,
    visited: FxHashSet<PathBuf>,
}

impl ProjectResolver {
    pub fn new(externals: Arc<ExternalRegistry>, options: ResolveOptions) -> Self {
        Self { externals, options }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve a project file from disk
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn resolve(&self, path: &Path) -> LangResult<ResolvedProject> {
        let reader = ItemReader::new(self.options.search_paths.clone(), Arc::clone(&self.externals));
        self.run(reader, path)
    }

    /// Resolve a project whose root file is given as text
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn resolve_source(&self, path: &Path, text: &str) -> LangResult<ResolvedProject> {
        let mut reader = ItemReader::new(self.options.search_paths.clone(), Arc::clone(&self.externals));
        reader.set_source(path, text);
        self.run(reader, path)
    }

    fn run(&self, reader: ItemReader, path: &Path) -> LangResult<ResolvedProject> {
        let path = paths::clean_path(path);
        let mut state = Resolution {
            resolver: self,
            reader,
            pool: ItemPool::new(),
            project_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            products: Vec::new(),
            visited: FxHashSet::default(),
        };

        state.visited.insert(path.clone());
        let root = state.reader.read_file(&mut state.pool, &path)?;
        let project = match state.pool.item_type(root) {
            ItemType::Project => {
                state.collect_project(root, None)?;
                Some(root)
            }
            ItemType::Product => {
                state.add_product(root, None)?;
                None
            }
            _ => {
                return Err(LangError::InvalidOperation(format!(
                    "{}: the root item must be a Project or a Product, not {}",
                    paths::to_slash_string(&path),
                    state.pool.type_name(root)
                )))
            }
        };

        state.load_modules()?;
        let loaded: Vec<(String, ItemId)> = state
            .products
            .iter()
            .filter(|p| p.loaded)
            .map(|p| (p.name.clone(), p.item))
            .collect();
        self.options.overrides.apply(&state.pool, project, &loaded)?;

        let products = state.evaluate_products()?;
        let (name, properties) = match project {
            Some(project) => {
                let eval = Evaluator::new(&state.pool, Arc::clone(&self.externals));
                (eval.string_value(project, "name")?, evaluate_declared(&eval, project)?)
            }
            None => (None, PropertyMap::new()),
        };
        tracing::debug!(products = products.len(), "resolved project");
        Ok(ResolvedProject {
            name,
            file: paths::to_slash_string(&path),
            properties,
            products,
        })
    }
}

impl Resolution<'_> {
    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.pool, Arc::clone(&self.resolver.externals))
    }

    /// Walk a project and its sub projects, collecting products
    fn collect_project(&mut self, project: ItemId, outer: Option<ItemId>) -> LangResult<()> {
        let scope = ModuleLoader::create_scope(&mut self.pool, None, Some(project), outer);
        self.pool.get_mut(project).scope = Some(scope);

        let (enabled, references, search_paths) = {
            let eval = self.evaluator();
            if eval.bool_value(project, "condition")? {
                (
                    true,
                    eval.string_list_value(project, "references")?,
                    eval.string_list_value(project, "searchPaths")?,
                )
            } else {
                (false, Vec::new(), Vec::new())
            }
        };
        if !enabled {
            tracing::debug!(project = %project, "skipping disabled project");
            return Ok(());
        }
        for path in search_paths {
            self.reader.add_search_path(path);
        }

        for child in self.pool.children(project) {
            match self.pool.item_type(child) {
                ItemType::Product => self.add_product(child, Some(project))?,
                ItemType::Project => self.collect_project(child, Some(scope))?,
                _ => {}
            }
        }

        for reference in references {
            let path = reference_file(Path::new(&reference));
            if !self.visited.insert(path.clone()) {
                tracing::warn!(path = %path.display(), "project file referenced more than once");
                continue;
            }
            let item = self.reader.read_file(&mut self.pool, &path)?;
            match self.pool.item_type(item) {
                ItemType::Project => self.collect_project(item, Some(scope))?,
                ItemType::Product => self.add_product(item, Some(project))?,
                _ => {
                    return Err(LangError::InvalidOperation(format!(
                        "{}: referenced file must contain a Project or a Product",
                        paths::to_slash_string(&path)
                    )))
                }
            }
        }
        Ok(())
    }

    /// Give the product its scope, evaluate its name and decide whether its
    /// modules need loading
    fn add_product(&mut self, product: ItemId, project: Option<ItemId>) -> LangResult<()> {
        let outer = project.and_then(|p| self.pool.scope(p));
        let scope = ModuleLoader::create_scope(&mut self.pool, Some(product), project, outer);
        self.pool.get_mut(product).scope = Some(scope);

        let (name, condition) = {
            let eval = self.evaluator();
            // the condition may depend on modules that are not loaded yet
            (eval.string_value(product, "name")?, eval.bool_value(product, "condition").ok())
        };
        let name = match name {
            Some(name) => name,
            None => {
                let stem = self
                    .pool
                    .file(product)
                    .and_then(|f| f.path.file_stem().map(|s| s.to_string_lossy().into_owned()))
                    .unwrap_or_default();
                self.pool
                    .set_property(product, "name", Value::literal(VmValue::string(stem.as_str())))?;
                stem
            }
        };

        tracing::debug!(product = %name, "collected product");
        self.products.push(ProductEntry {
            item: product,
            project,
            name,
            loaded: condition != Some(false),
        });
        Ok(())
    }

    fn load_modules(&mut self) -> LangResult<()> {
        let names: Vec<String> = self.products.iter().map(|p| p.name.clone()).collect();
        let options = MergeOptions {
            conflict_policy: self.resolver.options.conflict_policy,
            shadow_product: false,
        };
        let project_dir = Some(self.project_dir.clone());

        for entry in self.products.iter().filter(|p| p.loaded) {
            let edges = ModuleLoader::new(&mut self.reader, &mut self.pool, project_dir.clone())
                .with_product_names(names.iter().cloned())
                .load_product_modules(entry.item, entry.project)?;
            let report = ModuleMerger::merge(&mut self.pool, entry.item, &edges, &options)?;
            ModuleLoader::new(&mut self.reader, &mut self.pool, project_dir.clone())
                .instantiate_group_modules(entry.item, entry.project, &report.modules);
        }
        Ok(())
    }

    fn evaluate_products(&self) -> LangResult<Vec<ResolvedProduct>> {
        let pool = &self.pool;
        let externals = &self.resolver.externals;
        let evaluate = |entry: &ProductEntry| evaluate_product(pool, Arc::clone(externals), entry);
        if self.resolver.options.parallel {
            self.products.par_iter().map(evaluate).collect()
        } else {
            self.products.iter().map(evaluate).collect()
        }
    }
}

/// A referenced directory stands for the item file named after it
fn reference_file(path: &Path) -> PathBuf {
    let path = paths::clean_path(path);
    if path.extension().is_some_and(|ext| ext == "qbs") {
        return path;
    }
    match path.file_name() {
        Some(name) => {
            let mut file = name.to_os_string();
            file.push(".qbs");
            path.join(file)
        }
        None => path,
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn evaluate_product(
    pool: &ItemPool,
    externals: Arc<ExternalRegistry>,
    entry: &ProductEntry,
) -> LangResult<ResolvedProduct> {
    let file = pool
        .file(entry.item)
        .map(|f| f.display_path().to_string())
        .unwrap_or_default();
    let eval = Evaluator::new(pool, externals);
    let disabled = |name: &str| ResolvedProduct {
        name: name.to_string(),
        enabled: false,
        file: file.clone(),
        properties: PropertyMap::new(),
        modules: IndexMap::new(),
        groups: Vec::new(),
    };
    if !entry.loaded || !eval.bool_value(entry.item, "condition")? {
        tracing::debug!(product = %entry.name, "product is disabled");
        return Ok(disabled(&entry.name));
    }

    let mut modules = IndexMap::new();
    for edge in pool.modules(entry.item) {
        let name = edge.full_name();
        match check_module(&eval, &edge) {
            Ok(()) => {}
            Err(err) if !edge.required => {
                tracing::warn!(product = %entry.name, module = %name, "{}", err);
                pool.set_property(edge.item, "present", Value::literal(VmValue::Boolean(false)))?;
                modules.insert(
                    name,
                    ResolvedModule {
                        present: false,
                        required: false,
                        properties: PropertyMap::new(),
                    },
                );
                continue;
            }
            Err(err) => return Err(err),
        }
        let properties = evaluate_declared(&eval, edge.item)?;
        modules.insert(
            name,
            ResolvedModule {
                present: true,
                required: edge.required,
                properties,
            },
        );
    }

    let modules_of_product = pool.modules(entry.item);
    let groups = pool
        .children(entry.item)
        .into_iter()
        .filter(|&child| pool.item_type(child) == ItemType::Group)
        .map(|group| evaluate_group(&eval, group, &modules_of_product))
        .collect::<LangResult<Vec<_>>>()?;

    Ok(ResolvedProduct {
        name: entry.name.clone(),
        enabled: true,
        file,
        properties: evaluate_declared(&eval, entry.item)?,
        modules,
        groups,
    })
}

/// Fail if a loaded module is disabled or has the wrong version
fn check_module(eval: &Evaluator<'_>, edge: &ModuleEdge) -> LangResult<()> {
    let name = edge.full_name();
    if !eval.bool_value(edge.item, "condition")? || !eval.bool_value(edge.item, "present")? {
        return Err(LangError::ModuleNotPresent { name });
    }
    if edge.version_range.is_unbounded() {
        return Ok(());
    }
    let version = eval.string_value(edge.item, "version")?;
    let matches = version
        .as_deref()
        .and_then(Version::parse)
        .is_some_and(|v| edge.version_range.contains(&v));
    if matches {
        Ok(())
    } else {
        Err(LangError::VersionMismatch {
            module: name,
            version: version.unwrap_or_else(|| "unknown".to_string()),
            range: edge.version_range.to_string(),
        })
    }
}

fn evaluate_group(eval: &Evaluator<'_>, group: ItemId, modules: &[ModuleEdge]) -> LangResult<ResolvedGroup> {
    let pool = eval.pool();
    let mut own_modules = IndexMap::new();
    for edge in modules {
        let instance = edge
            .name
            .iter()
            .try_fold(group, |item, segment| pool.own_property(item, segment).and_then(|v| v.as_item()));
        let Some(instance) = instance.filter(|&i| pool.item_type(i) == ItemType::ModuleInstance) else {
            continue;
        };
        let mut properties = PropertyMap::new();
        for name in pool.own_property_names(instance) {
            if pool.own_property(instance, &name).is_some_and(|v| !v.is_item()) {
                properties.insert(name.clone(), eval.value(instance, &name)?);
            }
        }
        own_modules.insert(edge.full_name(), properties);
    }

    let groups = pool
        .children(group)
        .into_iter()
        .filter(|&child| pool.item_type(child) == ItemType::Group)
        .map(|child| evaluate_group(eval, child, modules))
        .collect::<LangResult<Vec<_>>>()?;

    Ok(ResolvedGroup {
        name: eval.string_value(group, "name")?,
        enabled: eval.bool_value(group, "condition")?,
        properties: evaluate_declared(eval, group)?,
        modules: own_modules,
        groups,
    })
}

/// Evaluate every declared property of an item
fn evaluate_declared(eval: &Evaluator<'_>, item: ItemId) -> LangResult<PropertyMap> {
    let mut properties = PropertyMap::new();
    for name in eval.pool().declarations(item).into_keys() {
        let value = eval.value(item, &name)?;
        properties.insert(name, value);
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_references_name_their_file() {
        assert_eq!(reference_file(Path::new("/p/lib")), PathBuf::from("/p/lib/lib.qbs"));
        assert_eq!(reference_file(Path::new("/p/lib/x.qbs")), PathBuf::from("/p/lib/x.qbs"));
    }

    fn resolve(root: &str, files: &[(&str, &str)], options: ResolveOptions) -> LangResult<ResolvedProject> {
        let resolver = ProjectResolver::new(Arc::new(ExternalRegistry::new()), options);
        let mut reader = ItemReader::new(resolver.options.search_paths.clone(), Arc::clone(&resolver.externals));
        for (path, text) in files {
            reader.set_source(path, *text);
        }
        resolver.run(reader, Path::new(root))
    }

    #[test]
    fn lone_product_is_named_after_its_file() {
        let project = resolve("/p/tool.qbs", &[("/p/tool.qbs", "Product { type: [\"application\"] }")], ResolveOptions::default())
            .unwrap();
        assert_eq!(project.name, None);
        let product = project.product("tool").unwrap();
        assert!(product.enabled);
        assert_eq!(product.properties["type"], VmValue::string_list(["application"]));
        assert_eq!(product.properties["targetName"], VmValue::string("tool"));
    }

    #[test]
    fn disabled_projects_and_products_are_skipped() {
        let files = [
            (
                "/p/root.qbs",
                r#"Project {
                    name: "root"
                    references: ["lib", "off.qbs"]
                    Product { name: "a" }
                    Product { name: "b"; condition: false }
                }"#,
            ),
            ("/p/lib/lib.qbs", "Product { name: \"lib\" }"),
            ("/p/off.qbs", "Project { condition: false; Product { name: \"hidden\" } }"),
        ];
        let project = resolve("/p/root.qbs", &files, ResolveOptions::default()).unwrap();
        assert_eq!(project.name.as_deref(), Some("root"));
        let names: Vec<(&str, bool)> = project.products.iter().map(|p| (p.name.as_str(), p.enabled)).collect();
        assert_eq!(names, vec![("a", true), ("b", false), ("lib", true)]);
        assert_eq!(project.product("lib").unwrap().file, "/p/lib/lib.qbs");
    }

    #[test]
    fn root_must_be_project_or_product() {
        let err = resolve("/p/g.qbs", &[("/p/g.qbs", "Group {}")], ResolveOptions::default()).unwrap_err();
        assert!(err.to_string().contains("must be a Project or a Product"), "{}", err);
    }

    #[test]
    fn optional_modules_that_fail_are_not_present() {
        let files = [
            ("/sp/modules/off/off.qbs", "Module { condition: false; property string flag: \"x\" }"),
            ("/sp/modules/on/on.qbs", "Module { version: \"2.0\"; property string flag: \"y\" }"),
            (
                "/p/app.qbs",
                r#"Product {
                    Depends { name: "off"; required: false }
                    Depends { name: "on"; versionAtLeast: "1.5" }
                }"#,
            ),
        ];
        let options = ResolveOptions {
            search_paths: vec![PathBuf::from("/sp")],
            parallel: false,
            ..ResolveOptions::default()
        };
        let project = resolve("/p/app.qbs", &files, options.clone()).unwrap();
        let app = project.product("app").unwrap();
        assert!(!app.module("off").unwrap().present);
        let on = app.module("on").unwrap();
        assert!(on.present);
        assert_eq!(on.properties["flag"], VmValue::string("y"));

        let mut strict = files;
        strict[2].1 = "Product { Depends { name: \"on\"; versionBelow: \"2.0\" } }";
        let err = resolve("/p/app.qbs", &strict, options.clone()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Module 'on' has version 2.0, which is not in the range [, 2.0)"
        );

        strict[2].1 = "Product { Depends { name: \"off\" } }";
        let err = resolve("/p/app.qbs", &strict, options).unwrap_err();
        assert!(matches!(err, LangError::ModuleNotPresent { .. }));
    }
}
