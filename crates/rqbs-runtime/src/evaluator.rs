//! Property evaluator
//!
//! [`Evaluator::value`] resolves one property of one item: it finds the
//! value through the prototype chain, evaluates every link of its override
//! chain (picking the first matching alternative of each link), converts the
//! result to the declared type and caches it per `(item, name)`.
//!
//! An evaluator borrows the item pool read-only and is meant to be used by a
//! single thread. Cache invalidations may come from any thread through the
//! shared [`CacheInvalidator`]; they are applied on the next access.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::declaration::PropertyType;
use crate::error::{LangError, LangResult};
use crate::file::FileContext;
use crate::item::ItemType;
use crate::location::CodeLocation;
use crate::paths;
use crate::pool::{ItemId, ItemObserver, ItemPool};
use crate::scope::{Scope, ScopeRef};
use crate::value::{SourceBody, SourceFlags, SourceValue, Value, ValueKind, ValuePtr};
use crate::variant::VmValue;

/// External function type. Methods receive their receiver as first argument.
pub type ExternalFn =
    Arc<dyn Fn(&[VmValue], &Evaluator<'_>, &ScopeRef) -> LangResult<VmValue> + Send + Sync>;

/// External function registry
#[derive(Default)]
pub struct ExternalRegistry {
    /// Methods: type_name -> method_name -> fn
    methods: FxHashMap<String, FxHashMap<String, ExternalFn>>,
    /// Properties: type_name -> property_name -> fn
    properties: FxHashMap<String, FxHashMap<String, ExternalFn>>,
    /// Namespace functions: namespace -> function_name -> fn
    functions: FxHashMap<String, IndexMap<String, ExternalFn>>,
    /// Global functions such as `parseInt`
    globals: FxHashMap<String, ExternalFn>,
}

impl ExternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(&mut self, type_name: &str, method: &str, f: ExternalFn) {
        self.methods
            .entry(type_name.to_string())
            .or_default()
            .insert(method.to_string(), f);
    }

    pub fn register_property(&mut self, type_name: &str, prop: &str, f: ExternalFn) {
        self.properties
            .entry(type_name.to_string())
            .or_default()
            .insert(prop.to_string(), f);
    }

    /// Register a function of a namespace (`FileInfo.fileName`, `Math.max`, ...)
    pub fn register_function(&mut self, namespace: &str, function_name: &str, f: ExternalFn) {
        self.functions
            .entry(namespace.to_string())
            .or_default()
            .insert(function_name.to_string(), f);
    }

    pub fn register_global(&mut self, name: &str, f: ExternalFn) {
        self.globals.insert(name.to_string(), f);
    }

    pub fn get_method(&self, type_name: &str, method: &str) -> Option<&ExternalFn> {
        self.methods.get(type_name)?.get(method)
    }

    pub fn get_property(&self, type_name: &str, prop: &str) -> Option<&ExternalFn> {
        self.properties.get(type_name)?.get(prop)
    }

    pub fn get_function(&self, namespace: &str, function_name: &str) -> Option<&ExternalFn> {
        self.functions.get(namespace)?.get(function_name)
    }

    pub fn get_global(&self, name: &str) -> Option<&ExternalFn> {
        self.globals.get(name)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.functions.contains_key(namespace)
    }

    /// The functions of a namespace as an object value
    pub fn namespace_object(&self, namespace: &str) -> VmValue {
        let Some(functions) = self.functions.get(namespace) else {
            return VmValue::Undefined;
        };
        VmValue::object(
            functions
                .iter()
                .map(|(name, f)| {
                    (
                        name.clone(),
                        VmValue::external(format!("{}.{}", namespace, name), Arc::clone(f)),
                    )
                })
                .collect(),
        )
    }
}

// =============================================================================
// Cache invalidation
// =============================================================================

/// Collects items whose cached properties are stale.
///
/// Marking is cheap and may happen on any thread; the owning evaluator
/// clears its cache on its next access.
#[derive(Debug, Default)]
pub struct CacheInvalidator {
    dirty: Mutex<FxHashSet<ItemId>>,
    pending: AtomicBool,
}

impl CacheInvalidator {
    pub fn invalidate(&self, item: ItemId) {
        self.dirty.lock().insert(item);
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<FxHashSet<ItemId>> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *self.dirty.lock()))
    }
}

impl ItemObserver for CacheInvalidator {
    fn on_item_property_changed(&self, item: ItemId, _name: &str) {
        self.invalidate(item);
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// The property currently being evaluated
#[derive(Debug, Clone, Copy)]
struct PropertyContext<'a> {
    /// The item the property was queried on
    item: ItemId,
    /// The item the value was found on (`item` or one of its prototypes)
    owner: ItemId,
    name: &'a str,
    property_type: PropertyType,
}

pub struct Evaluator<'p> {
    pool: &'p ItemPool,
    externals: Arc<ExternalRegistry>,
    cache: RefCell<FxHashMap<(ItemId, String), VmValue>>,
    in_progress: RefCell<FxHashSet<(ItemId, String)>>,
    invalidator: Arc<CacheInvalidator>,
    evaluation_count: Cell<usize>,
    /// Recursion depth limit of the expression interpreter
    pub(crate) max_depth: usize,
    pub(crate) depth: Cell<usize>,
}

impl<'p> Evaluator<'p> {
    pub fn new(pool: &'p ItemPool, externals: Arc<ExternalRegistry>) -> Self {
        let invalidator = Arc::new(CacheInvalidator::default());
        let observer: Arc<dyn ItemObserver> = invalidator.clone();
        pool.add_observer(Arc::downgrade(&observer));
        Self {
            pool,
            externals,
            cache: RefCell::new(FxHashMap::default()),
            in_progress: RefCell::new(FxHashSet::default()),
            invalidator,
            evaluation_count: Cell::new(0),
            max_depth: 1000,
            depth: Cell::new(0),
        }
    }

    pub fn pool(&self) -> &'p ItemPool {
        self.pool
    }

    pub fn externals(&self) -> &ExternalRegistry {
        &self.externals
    }

    /// Handle for marking items dirty from other threads
    pub fn invalidator(&self) -> Arc<CacheInvalidator> {
        Arc::clone(&self.invalidator)
    }

    /// Number of source values evaluated so far
    pub fn evaluation_count(&self) -> usize {
        self.evaluation_count.get()
    }

    /// Evaluate a property of an item.
    ///
    /// Properties that are neither set nor declared evaluate to `undefined`.
    pub fn value(&self, item: ItemId, name: &str) -> LangResult<VmValue> {
        self.apply_invalidations();

        let key = (item, name.to_string());
        let cached = self.cache.borrow().get(&key).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }
        if !self.in_progress.borrow_mut().insert(key.clone()) {
            return Err(LangError::CircularReference(name.to_string()));
        }
        let result = self.compute_property(item, name);
        self.in_progress.borrow_mut().remove(&key);

        let value = result?;
        self.cache.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    /// Dependencies between properties are not tracked, so any dirty item
    /// drops the whole cache.
    fn apply_invalidations(&self) {
        if let Some(dirty) = self.invalidator.take() {
            if !dirty.is_empty() {
                tracing::trace!(items = dirty.len(), "clearing property cache");
                self.cache.borrow_mut().clear();
            }
        }
    }

    /// Value of a name looked up in an item frame of a scope
    pub fn item_member(&self, item: ItemId, name: &str) -> LangResult<Option<VmValue>> {
        if self.pool.has_property(item, name)
            || self.pool.property_declaration(item, name).is_some()
        {
            return self.value(item, name).map(Some);
        }
        Ok(None)
    }

    pub fn bool_value(&self, item: ItemId, name: &str) -> LangResult<bool> {
        Ok(self.value(item, name)?.is_truthy())
    }

    pub fn string_value(&self, item: ItemId, name: &str) -> LangResult<Option<String>> {
        Ok(match self.value(item, name)? {
            VmValue::Undefined | VmValue::Null => None,
            other => Some(other.to_string()),
        })
    }

    pub fn string_list_value(&self, item: ItemId, name: &str) -> LangResult<Vec<String>> {
        Ok(match self.value(item, name)? {
            VmValue::List(items) => items
                .iter()
                .filter(|v| !v.is_nullish())
                .map(|v| v.to_string())
                .collect(),
            VmValue::Undefined | VmValue::Null => Vec::new(),
            other => vec![other.to_string()],
        })
    }

    /// Parse and evaluate a standalone expression with only globals in scope
    pub fn evaluate_expression(&self, source: &str) -> LangResult<VmValue> {
        let expr = rqbs_parser::parse_expression(source).map_err(|e| LangError::Parse {
            path: "<expression>".to_string(),
            message: e.to_string(),
        })?;
        self.eval_expr(&expr, &Scope::new())
    }

    // =========================================================================
    // Property evaluation
    // =========================================================================

    fn compute_property(&self, item: ItemId, name: &str) -> LangResult<VmValue> {
        let Some((owner, value)) = self.pool.property_with_owner(item, name) else {
            return Ok(VmValue::Undefined);
        };
        let property_type = self
            .pool
            .property_declaration(item, name)
            .map(|d| d.property_type)
            .unwrap_or(PropertyType::Variant);
        let ctx = PropertyContext {
            item,
            owner,
            name,
            property_type,
        };
        let location = value
            .location()
            .cloned()
            .unwrap_or_else(|| self.pool.location(item));

        let result = if property_type.is_list() {
            self.evaluate_list_chain(&ctx, &value)
        } else {
            self.evaluate_link(&ctx, &value)
                .and_then(|(raw, _)| self.convert_to_property_type(&ctx, raw, &value))
        };
        result.map_err(|e| e.at(&location))
    }

    /// Concatenate the results of all links of a list property's chain,
    /// highest priority first. An exclusive link keeps only the last two
    /// results collected so far and ends the chain.
    fn evaluate_list_chain(&self, ctx: &PropertyContext<'_>, head: &ValuePtr) -> LangResult<VmValue> {
        let mut results = Vec::new();
        for link in head.chain() {
            let (raw, exclusive) = self.evaluate_link(ctx, link)?;
            if !raw.is_undefined() {
                results.push(self.convert_to_property_type(ctx, raw, link)?);
            }
            if exclusive {
                let keep_from = results.len().saturating_sub(2);
                results.drain(..keep_from);
                break;
            }
        }

        if results.is_empty() {
            return Ok(VmValue::Undefined);
        }
        let mut concatenated = Vec::new();
        for result in results {
            match result {
                VmValue::List(items) => concatenated.extend(items.iter().cloned()),
                VmValue::Undefined => {}
                other => concatenated.push(other),
            }
        }
        Ok(VmValue::list(concatenated))
    }

    /// Evaluate one link; the flag tells whether a matching alternative
    /// asked to override list properties.
    fn evaluate_link(&self, ctx: &PropertyContext<'_>, link: &ValuePtr) -> LangResult<(VmValue, bool)> {
        match &link.kind {
            ValueKind::Literal(value) => Ok((value.clone(), false)),
            ValueKind::Item(item) => Ok((VmValue::Item(*item), false)),
            ValueKind::Source(source) => self.evaluate_alternatives(ctx, link, source),
        }
    }

    fn evaluate_alternatives(
        &self,
        ctx: &PropertyContext<'_>,
        link: &ValuePtr,
        source: &SourceValue,
    ) -> LangResult<(VmValue, bool)> {
        for alternative in &source.alternatives {
            let matched = match &alternative.condition {
                Some(condition) => self.evaluate_condition(ctx, condition)?,
                None => true,
            };
            if !matched {
                continue;
            }
            let exclusive = match &alternative.override_list_properties {
                Some(flag) => self.evaluate_condition(ctx, flag)?,
                None => false,
            };
            // `outer` inside an alternative refers to the unconditional value
            let unconditional = Self::without_alternatives(link);
            let value =
                self.evaluate_source(ctx, link, &alternative.value, Some(&unconditional))?;
            return Ok((value, exclusive));
        }
        // A value that only exists because of a Properties block keeps the
        // overridden value when none of its conditions hold
        if link.created_by_properties_block {
            return Ok((self.overridden_value(ctx, link)?, false));
        }
        let value = self.evaluate_source(ctx, link, link, None)?;
        Ok((value, false))
    }

    fn without_alternatives(link: &ValuePtr) -> ValuePtr {
        let mut copy = Arc::clone(link);
        if let ValueKind::Source(source) = &mut Arc::make_mut(&mut copy).kind {
            source.alternatives.clear();
        }
        copy.with_next(None)
    }

    fn evaluate_condition(&self, ctx: &PropertyContext<'_>, condition: &ValuePtr) -> LangResult<bool> {
        let value = match &condition.kind {
            ValueKind::Literal(value) => value.clone(),
            ValueKind::Item(_) => return Ok(true),
            ValueKind::Source(_) => self.evaluate_source(ctx, condition, condition, None)?,
        };
        Ok(value.is_truthy())
    }

    /// Evaluate the body of `body` in the scope of the property.
    ///
    /// `link` is the value the property resolved to; its `base` is the base of
    /// every alternative. `outer_substitute` replaces the outer item's value.
    fn evaluate_source(
        &self,
        ctx: &PropertyContext<'_>,
        link: &ValuePtr,
        body: &ValuePtr,
        outer_substitute: Option<&ValuePtr>,
    ) -> LangResult<VmValue> {
        let source = match &body.kind {
            ValueKind::Source(source) => source,
            ValueKind::Literal(value) => return Ok(value.clone()),
            ValueKind::Item(item) => return Ok(VmValue::Item(*item)),
        };
        self.evaluation_count.set(self.evaluation_count.get() + 1);

        let mut locals = Vec::new();
        if source.uses(SourceFlags::USES_BASE) {
            locals.push(("base".to_string(), self.base_value(ctx, link)?));
        }
        if source.uses(SourceFlags::USES_OUTER) {
            locals.push(("outer".to_string(), self.outer_value(ctx, outer_substitute)?));
        }
        if source.uses(SourceFlags::USES_ORIGINAL) {
            locals.push(("original".to_string(), self.original_value(ctx)?));
        }

        let defining_item = body.defining_item.or(link.defining_item);
        let scope = self.property_scope(ctx, defining_item, &source.file, locals);
        match source.body.as_ref() {
            SourceBody::Expr(expr) => self.eval_expr(expr, &scope),
            SourceBody::Block(block) => self.call_block(block, &scope),
        }
    }

    /// Scope chain of a property value, outermost frame first: the value's
    /// file, the scopes of the queried item, the queried item itself, the
    /// scopes of the item the value was written in, then `base`, `outer` and
    /// `original`.
    fn property_scope(
        &self,
        ctx: &PropertyContext<'_>,
        defining_item: Option<ItemId>,
        file: &Arc<FileContext>,
        locals: Vec<(String, VmValue)>,
    ) -> ScopeRef {
        let mut scope = Scope::with_file(&Scope::new(), Arc::clone(file));
        let mut pushed = FxHashSet::default();

        for item in self.scope_chain(ctx.item).into_iter().rev() {
            pushed.insert(item);
            scope = Scope::with_item(&scope, item);
        }
        if self.sees_queried_item(ctx, defining_item) && pushed.insert(ctx.item) {
            scope = Scope::with_item(&scope, ctx.item);
        }
        if let Some(defining) = defining_item {
            for item in self.scope_chain(defining).into_iter().rev() {
                if pushed.insert(item) {
                    scope = Scope::with_item(&scope, item);
                }
            }
        }
        if !locals.is_empty() {
            scope = Scope::with_locals(&scope, locals);
        }
        scope
    }

    /// Values written outside of a module for a module instance (in a product
    /// or a loading module) do not see the instance's own properties.
    fn sees_queried_item(&self, ctx: &PropertyContext<'_>, defining_item: Option<ItemId>) -> bool {
        if !self.pool.item_type(ctx.item).is_module_instance() {
            return true;
        }
        match defining_item {
            Some(defining) => self.pool.item_type(defining) == ItemType::Module,
            None => true,
        }
    }

    /// The scope items of `item`, innermost first
    fn scope_chain(&self, item: ItemId) -> Vec<ItemId> {
        let mut chain = Vec::new();
        let mut current = self.pool.scope(item);
        while let Some(scope) = current {
            if chain.contains(&scope) {
                break;
            }
            chain.push(scope);
            current = self.pool.scope(scope);
        }
        chain
    }

    // =========================================================================
    // base, outer and original
    // =========================================================================

    /// The overridden value: the link's own base value, or the property as
    /// defined further up the owner's prototype chain
    fn base_value(&self, ctx: &PropertyContext<'_>, link: &ValuePtr) -> LangResult<VmValue> {
        let value = self.overridden_value(ctx, link)?;
        Ok(self.empty_list_if_undefined(ctx, value))
    }

    fn overridden_value(&self, ctx: &PropertyContext<'_>, link: &ValuePtr) -> LangResult<VmValue> {
        // An explicit base value is a single link. A prototype's property is
        // its whole chain, merged contributions included.
        let base = match link.as_source().and_then(|s| s.base_value.clone()) {
            Some(base) => Some((ctx.owner, base.with_next(None))),
            None => self
                .pool
                .prototype(ctx.owner)
                .and_then(|proto| self.pool.property_with_owner(proto, ctx.name)),
        };
        let value = match base {
            Some((owner, base)) => {
                let base_ctx = PropertyContext { owner, ..*ctx };
                if ctx.property_type.is_list() {
                    self.evaluate_list_chain(&base_ctx, &base)?
                } else {
                    self.evaluate_link(&base_ctx, &base)?.0
                }
            }
            None => VmValue::Undefined,
        };
        Ok(value)
    }

    fn outer_value(
        &self,
        ctx: &PropertyContext<'_>,
        substitute: Option<&ValuePtr>,
    ) -> LangResult<VmValue> {
        let value = match substitute {
            Some(substitute) if substitute.created_by_properties_block => {
                self.overridden_value(ctx, substitute)?
            }
            Some(substitute) => self.evaluate_source(ctx, substitute, substitute, None)?,
            None => {
                let outer = self
                    .pool
                    .outer_item(ctx.item)
                    .or_else(|| self.pool.outer_item(ctx.owner));
                match outer {
                    Some(outer) => self.value(outer, ctx.name)?,
                    None => VmValue::Undefined,
                }
            }
        };
        Ok(self.empty_list_if_undefined(ctx, value))
    }

    fn original_value(&self, ctx: &PropertyContext<'_>) -> LangResult<VmValue> {
        let item_of_property = self
            .pool
            .item_of_property(ctx.item, ctx.name)
            .unwrap_or(ctx.item);
        if !self.pool.item_type(item_of_property).is_module_instance() {
            return Err(LangError::InvalidOriginal(
                "The special value 'original' can only be used with module properties."
                    .to_string(),
            ));
        }
        if ctx.property_type.is_list() {
            return Err(LangError::InvalidOriginal(
                "The special value 'original' cannot be used on the right-hand side of a list property."
                    .to_string(),
            ));
        }
        let root = self.pool.root_prototype(ctx.item);
        if root == ctx.item || self.pool.item_type(root) != ItemType::Module {
            return Ok(VmValue::Undefined);
        }
        self.value(root, ctx.name)
    }

    fn empty_list_if_undefined(&self, ctx: &PropertyContext<'_>, value: VmValue) -> VmValue {
        if value.is_undefined() && ctx.property_type.is_list() {
            VmValue::list(Vec::new())
        } else {
            value
        }
    }

    // =========================================================================
    // Type conversion
    // =========================================================================

    fn convert_to_property_type(
        &self,
        ctx: &PropertyContext<'_>,
        value: VmValue,
        link: &Value,
    ) -> LangResult<VmValue> {
        if value.is_nullish() {
            return Ok(value);
        }
        let mismatch = |actual: &VmValue| LangError::PropertyTypeMismatch {
            name: ctx.name.to_string(),
            expected: ctx.property_type.name().to_string(),
            actual: actual.type_name().to_string(),
        };

        match ctx.property_type {
            PropertyType::Variant => Ok(value),
            PropertyType::Bool => Ok(VmValue::Boolean(value.is_truthy())),
            PropertyType::Int => match value.as_int() {
                Some(i) => Ok(VmValue::Int(i)),
                None => Err(mismatch(&value)),
            },
            PropertyType::String => match value {
                VmValue::String(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            PropertyType::Path => match &value {
                VmValue::String(s) => {
                    let dir = self.source_directory(ctx, link)?;
                    Ok(VmValue::string(paths::resolve_path(&dir, s)))
                }
                other => Err(mismatch(other)),
            },
            PropertyType::VarList => Ok(match value {
                VmValue::List(_) => value,
                other => VmValue::list(vec![other]),
            }),
            PropertyType::StringList | PropertyType::PathList => {
                let items = match &value {
                    VmValue::List(items) => items.as_ref().clone(),
                    _ => vec![value.clone()],
                };
                let dir = if ctx.property_type == PropertyType::PathList {
                    Some(self.source_directory(ctx, link)?)
                } else {
                    None
                };
                let mut converted = Vec::with_capacity(items.len());
                for element in items {
                    match (&element, &dir) {
                        (VmValue::String(s), Some(dir)) => {
                            converted.push(VmValue::string(paths::resolve_path(dir, s)))
                        }
                        (VmValue::String(_), None) => converted.push(element),
                        (other, _) if other.is_nullish() => {}
                        (other, _) => return Err(mismatch(other)),
                    }
                }
                Ok(VmValue::list(converted))
            }
        }
    }

    /// Directory that relative paths are resolved against
    fn source_directory(&self, ctx: &PropertyContext<'_>, link: &Value) -> LangResult<PathBuf> {
        if ctx.name != "sourceDirectory" && self.pool.has_property(ctx.item, "sourceDirectory") {
            if let VmValue::String(dir) = self.value(ctx.item, "sourceDirectory")? {
                if !dir.is_empty() {
                    return Ok(PathBuf::from(dir.as_ref()));
                }
            }
        }
        let dir = link
            .as_source()
            .map(|s| s.file.dir.clone())
            .or_else(|| self.pool.file(ctx.item).map(|f| f.dir.clone()))
            .unwrap_or_default();
        Ok(dir)
    }

    /// Location used for errors of an item without a property location
    pub fn item_location(&self, item: ItemId) -> CodeLocation {
        self.pool.location(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::PropertyDeclaration;
    use crate::value::Alternative;
    use pretty_assertions::assert_eq;

    fn source(file: &Arc<FileContext>, text: &str) -> ValuePtr {
        let expr = rqbs_parser::parse_expression(text).unwrap();
        let mut flags = SourceFlags::empty();
        expr.visit_identifiers(&mut |name| match name {
            "base" => flags |= SourceFlags::USES_BASE,
            "outer" => flags |= SourceFlags::USES_OUTER,
            "original" => flags |= SourceFlags::USES_ORIGINAL,
            _ => {}
        });
        Value::source(SourceValue {
            body: Arc::new(SourceBody::Expr(expr)),
            source_code: text.into(),
            location: CodeLocation::new("test.qbs", 1, 1),
            file: Arc::clone(file),
            flags,
            base_value: None,
            alternatives: Vec::new(),
        })
    }

    fn setup() -> (ItemPool, ItemId, Arc<FileContext>) {
        let mut pool = ItemPool::new();
        let id_scope = pool.create(ItemType::Scope);
        let item = pool.create(ItemType::Product);
        let file = Arc::new(FileContext::new("/p/test.qbs", "", id_scope, Vec::new()));
        pool.get_mut(item).file = Some(Arc::clone(&file));
        (pool, item, file)
    }

    fn declare(pool: &mut ItemPool, item: ItemId, name: &str, ty: PropertyType) {
        pool.get_mut(item)
            .declarations
            .insert(name.to_string(), PropertyDeclaration::new(name, ty));
    }

    fn externals() -> Arc<ExternalRegistry> {
        Arc::new(ExternalRegistry::new())
    }

    #[test]
    fn evaluates_and_caches() {
        let (mut pool, item, file) = setup();
        pool.get_mut(item).properties.insert("a".into(), source(&file, "1 + 2"));
        pool.get_mut(item).properties.insert("b".into(), source(&file, "a * 2"));

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(6));
        let count = eval.evaluation_count();
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(6));
        assert_eq!(eval.evaluation_count(), count);
        assert_eq!(eval.value(item, "missing").unwrap(), VmValue::Undefined);
    }

    #[test]
    fn set_property_invalidates_cache() {
        let (mut pool, item, file) = setup();
        pool.get_mut(item).properties.insert("a".into(), source(&file, "1"));
        pool.get_mut(item).properties.insert("b".into(), source(&file, "a + 1"));

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(2));
        pool.set_property(item, "a", Value::literal(VmValue::Int(10)))
            .unwrap();
        assert!(eval.invalidator().is_pending());
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(11));
    }

    #[test]
    fn invalidation_from_another_thread_applies_on_next_access() {
        let (mut pool, item, file) = setup();
        pool.get_mut(item).properties.insert("a".into(), source(&file, "1"));
        pool.get_mut(item).properties.insert("b".into(), source(&file, "a + 1"));

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(2));
        let count = eval.evaluation_count();

        let invalidator = eval.invalidator();
        std::thread::spawn(move || invalidator.invalidate(item))
            .join()
            .unwrap();
        assert!(eval.invalidator().is_pending());
        assert_eq!(eval.evaluation_count(), count);

        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(2));
        assert!(!eval.invalidator().is_pending());
        assert!(eval.evaluation_count() > count);

        let count = eval.evaluation_count();
        assert_eq!(eval.value(item, "b").unwrap(), VmValue::Int(2));
        assert_eq!(eval.evaluation_count(), count);
    }

    #[test]
    fn circular_reference_is_an_error() {
        let (mut pool, item, file) = setup();
        pool.get_mut(item).properties.insert("a".into(), source(&file, "b"));
        pool.get_mut(item).properties.insert("b".into(), source(&file, "a"));

        let eval = Evaluator::new(&pool, externals());
        let err = eval.value(item, "a").unwrap_err();
        assert!(matches!(err.root_cause(), LangError::CircularReference(_)));
    }

    #[test]
    fn first_matching_alternative_wins() {
        let (mut pool, item, file) = setup();
        declare(&mut pool, item, "defines", PropertyType::StringList);
        let mut value = source(&file, "[\"V0\"]");
        if let ValueKind::Source(s) = &mut Arc::make_mut(&mut value).kind {
            s.alternatives = vec![
                Alternative {
                    condition: Some(source(&file, "true")),
                    override_list_properties: None,
                    value: source(&file, "[\"C1\"]"),
                },
                Alternative {
                    condition: Some(source(&file, "false")),
                    override_list_properties: None,
                    value: source(&file, "[\"C2\"]"),
                },
            ];
        }
        pool.get_mut(item).properties.insert("defines".into(), value);

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(
            eval.value(item, "defines").unwrap(),
            VmValue::string_list(["C1"])
        );
    }

    #[test]
    fn list_chain_concatenates_in_priority_order() {
        let (mut pool, item, file) = setup();
        declare(&mut pool, item, "x", PropertyType::StringList);
        let chain = source(&file, "[\"a\"]")
            .with_next(Some(source(&file, "\"b\"").with_next(Some(source(&file, "undefined")))));
        pool.get_mut(item).properties.insert("x".into(), chain);

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "x").unwrap(), VmValue::string_list(["a", "b"]));
    }

    #[test]
    fn scalar_chain_uses_head() {
        let (mut pool, item, file) = setup();
        declare(&mut pool, item, "s", PropertyType::String);
        let chain = source(&file, "\"high\"").with_next(Some(source(&file, "\"low\"")));
        pool.get_mut(item).properties.insert("s".into(), chain);

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "s").unwrap(), VmValue::string("high"));
    }

    #[test]
    fn type_conversion() {
        let (mut pool, item, file) = setup();
        declare(&mut pool, item, "flag", PropertyType::Bool);
        declare(&mut pool, item, "count", PropertyType::Int);
        declare(&mut pool, item, "dir", PropertyType::Path);
        declare(&mut pool, item, "files", PropertyType::PathList);
        declare(&mut pool, item, "bad", PropertyType::String);
        let props = &mut pool.get_mut(item).properties;
        props.insert("flag".into(), source(&file, "\"yes\""));
        props.insert("count".into(), source(&file, "4 / 2"));
        props.insert("dir".into(), source(&file, "\"sub/../inc\""));
        props.insert("files".into(), source(&file, "\"main.c\""));
        props.insert("bad".into(), source(&file, "42"));

        let eval = Evaluator::new(&pool, externals());
        assert_eq!(eval.value(item, "flag").unwrap(), VmValue::Boolean(true));
        assert_eq!(eval.value(item, "count").unwrap(), VmValue::Int(2));
        assert_eq!(eval.value(item, "dir").unwrap(), VmValue::string("/p/inc"));
        assert_eq!(
            eval.value(item, "files").unwrap(),
            VmValue::string_list(["/p/main.c"])
        );
        let err = eval.value(item, "bad").unwrap_err();
        assert!(matches!(
            err.root_cause(),
            LangError::PropertyTypeMismatch { .. }
        ));
        assert_eq!(err.location(), Some(&CodeLocation::new("test.qbs", 1, 1)));
    }

    fn list_concat(args: &[VmValue], _: &Evaluator<'_>, _: &ScopeRef) -> LangResult<VmValue> {
        let mut out = Vec::new();
        for arg in args {
            match arg {
                VmValue::List(items) => out.extend(items.iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        Ok(VmValue::list(out))
    }

    #[test]
    fn base_falls_back_to_prototype() {
        let (mut pool, item, file) = setup();
        let proto = pool.create(ItemType::Product);
        pool.get_mut(item).prototype = Some(proto);
        declare(&mut pool, proto, "x", PropertyType::StringList);
        pool.get_mut(proto).properties.insert("x".into(), source(&file, "[\"p\"]"));
        pool.get_mut(item)
            .properties
            .insert("x".into(), source(&file, "base.concat([\"d\"])"));

        let mut registry = ExternalRegistry::new();
        registry.register_method("List", "concat", Arc::new(list_concat));
        let eval = Evaluator::new(&pool, Arc::new(registry));
        assert_eq!(eval.value(item, "x").unwrap(), VmValue::string_list(["p", "d"]));
    }

    #[test]
    fn original_outside_module_instance_fails() {
        let (mut pool, item, file) = setup();
        pool.get_mut(item).properties.insert("x".into(), source(&file, "original"));

        let eval = Evaluator::new(&pool, externals());
        let err = eval.value(item, "x").unwrap_err();
        assert_eq!(
            err.root_cause().to_string(),
            "The special value 'original' can only be used with module properties."
        );
    }
}
