//! Item builder
//!
//! Turns the syntax tree of one item file into items: resolves imports and
//! item types, installs declarations and bindings, merges inherited items
//! into derived ones, folds `Properties` blocks into value alternatives and
//! validates the finished tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rqbs_parser::{BindingValue, Binding, ImportKind, ItemDef, ItemMember, PropertyDecl, Span};
use rustc_hash::FxHashMap;

use crate::builtins;
use crate::declaration::{DeclarationFlags, PropertyDeclaration, PropertyType};
use crate::error::{LangError, LangResult};
use crate::file::{FileContext, ImportValue};
use crate::item::ItemType;
use crate::location::{CodeLocation, LineIndex};
use crate::paths;
use crate::pool::{ItemId, ItemPool};
use crate::reader::{ItemReader, ParsedFile};
use crate::value::{Alternative, SourceBody, SourceFlags, SourceValue, Value, ValueKind, ValuePtr};
use crate::variant::VmValue;

pub(crate) struct ItemBuilder<'a> {
    reader: &'a mut ItemReader,
    pool: &'a mut ItemPool,
    file: Arc<FileContext>,
    source: Arc<str>,
    type_dirs: Vec<PathBuf>,
    /// Directory imports with an alias qualify their types (`Alias.Type`)
    aliased_dirs: Vec<(String, PathBuf)>,
    ids: FxHashMap<String, CodeLocation>,
}

/// One `Properties` block waiting to be folded into its parent
struct PropertiesBlock<'d> {
    def: &'d ItemDef,
    location: CodeLocation,
}

impl<'a> ItemBuilder<'a> {
    /// Build the item tree of a parsed file and return its root
    pub(crate) fn build(
        reader: &'a mut ItemReader,
        pool: &'a mut ItemPool,
        path: &Path,
        parsed: Arc<ParsedFile>,
    ) -> LangResult<ItemId> {
        let id_scope = pool.create(ItemType::Scope);
        let display_path: Arc<str> = paths::to_slash_string(path).into();
        let lines = LineIndex::new(&parsed.source);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut imports = Vec::new();
        let mut type_dirs = Vec::new();
        let mut aliased_dirs = Vec::new();
        for import in &parsed.ast.imports {
            let location = lines.location(&display_path, import.span);
            let alias = import.alias.as_ref().map(|a| a.node.clone());
            match &import.kind {
                ImportKind::Path(target) => {
                    let resolved = paths::clean_path(&dir.join(target));
                    if target.ends_with(".js") {
                        let Some(alias) = alias else {
                            return Err(LangError::InvalidImport {
                                message: format!("Script import '{}' needs an alias", target),
                                location,
                            });
                        };
                        let script = reader.script(&resolved)?;
                        imports.push((alias, ImportValue::Script(script)));
                    } else if let Some(alias) = alias {
                        aliased_dirs.push((alias, resolved));
                    } else {
                        type_dirs.push(resolved);
                    }
                }
                ImportKind::Namespace(name) => {
                    let segments = name.segments();
                    if segments == ["qbs"] {
                        continue;
                    }
                    let full = name.to_string();
                    let last = segments.last().cloned().unwrap_or_default();
                    let namespace = if reader.externals().has_namespace(&full) {
                        full
                    } else if reader.externals().has_namespace(&last) {
                        last.clone()
                    } else {
                        return Err(LangError::InvalidImport {
                            message: format!("Unknown import '{}'", full),
                            location,
                        });
                    };
                    imports.push((alias.unwrap_or(last), ImportValue::Namespace(namespace)));
                }
            }
        }

        let file = Arc::new(FileContext::new(path, &parsed.source, id_scope, imports));
        let type_dirs = reader.type_directories(path, &type_dirs);
        let mut builder = ItemBuilder {
            reader,
            pool,
            file,
            source: Arc::clone(&parsed.source),
            type_dirs,
            aliased_dirs,
            ids: FxHashMap::default(),
        };
        let root = builder.build_item(&parsed.ast.root, None)?;
        builder.validate(root)?;
        Ok(root)
    }

    fn location(&self, span: Span) -> CodeLocation {
        self.file.location(span)
    }

    // =========================================================================
    // Items
    // =========================================================================

    fn build_item(&mut self, def: &ItemDef, parent: Option<ItemId>) -> LangResult<ItemId> {
        let location = self.location(def.span);
        let segments = def.type_name.segments();
        let builtin = match segments.as_slice() {
            [name] => ItemType::from_builtin_name(name),
            _ => None,
        };

        let (item, base) = match builtin {
            Some(item_type) => (self.create_builtin(item_type, &location)?, None),
            None => {
                let Some(path) = self.resolve_type(&segments) else {
                    return Err(LangError::UnknownItemType {
                        name: def.type_name.to_string(),
                        location,
                    });
                };
                let base = self.reader.read_file(self.pool, &path)?;
                let item_type = self.pool.item_type(base);
                (self.pool.create(item_type), Some(base))
            }
        };
        {
            let data = self.pool.get_mut(item);
            data.type_name = def.type_name.to_string();
            data.location = location;
            data.file = Some(Arc::clone(&self.file));
            data.parent = parent;
        }

        let mut bound: FxHashMap<String, CodeLocation> = FxHashMap::default();
        let mut blocks = Vec::new();
        for member in &def.members {
            match member {
                ItemMember::PropertyDecl(decl) => self.declare_property(item, decl, &mut bound)?,
                ItemMember::Binding(binding) => self.bind(item, binding, &mut bound)?,
                ItemMember::Child(child) if is_properties_block(child) => {
                    blocks.push(PropertiesBlock {
                        def: child,
                        location: self.location(child.span),
                    });
                }
                ItemMember::Child(child) => {
                    let child = self.build_item(child, Some(item))?;
                    self.pool.get_mut(item).children.push(child);
                }
            }
        }

        if let Some(base) = base {
            self.inherit_item(item, base)?;
        }

        let item_type = self.pool.item_type(item);
        if matches!(item_type, ItemType::Product | ItemType::Project)
            && !bound.contains_key("sourceDirectory")
        {
            let dir = VmValue::string(paths::to_slash_string(&self.file.dir));
            self.pool
                .get_mut(item)
                .properties
                .insert("sourceDirectory".to_string(), Value::literal(dir));
        }

        let mut seen_fallback = false;
        for block in &blocks {
            self.fold_properties_block(item, block, &mut seen_fallback)?;
        }
        Ok(item)
    }

    /// A new item of a builtin type with its declarations and default bindings
    fn create_builtin(&mut self, item_type: ItemType, location: &CodeLocation) -> LangResult<ItemId> {
        let item = self.pool.create(item_type);
        let mut defaults = Vec::new();
        for (name, text) in builtins::default_bindings(item_type) {
            let expr = rqbs_parser::parse_expression(text).map_err(|e| LangError::Parse {
                path: format!("<default of {}.{}>", item_type, name),
                message: e.to_string(),
            })?;
            let flags = source_flags(&BindingValue::Expr(expr.clone()));
            let value = Value::source(SourceValue {
                body: Arc::new(SourceBody::Expr(expr)),
                source_code: text.into(),
                location: location.clone(),
                file: Arc::clone(&self.file),
                flags,
                base_value: None,
                alternatives: Vec::new(),
            });
            defaults.push((name.to_string(), value));
        }

        let data = self.pool.get_mut(item);
        for decl in builtins::declarations(item_type) {
            data.declarations.insert(decl.name.clone(), decl);
        }
        data.properties.extend(defaults);
        Ok(item)
    }

    fn resolve_type(&mut self, segments: &[String]) -> Option<PathBuf> {
        if let Some((first, rest)) = segments.split_first() {
            let aliased = self
                .aliased_dirs
                .iter()
                .find(|(alias, _)| alias == first)
                .map(|(_, dir)| dir.clone());
            if let Some(dir) = aliased {
                return self.reader.resolve_type(rest, &[dir]);
            }
        }
        self.reader.resolve_type(segments, &self.type_dirs)
    }

    // =========================================================================
    // Members
    // =========================================================================

    fn declare_property(
        &mut self,
        item: ItemId,
        decl: &PropertyDecl,
        bound: &mut FxHashMap<String, CodeLocation>,
    ) -> LangResult<()> {
        let location = self.location(decl.span);
        let Some(property_type) = PropertyType::from_name(&decl.type_name.node) else {
            return Err(LangError::UnknownPropertyType {
                type_name: decl.type_name.node.clone(),
                location: self.location(decl.type_name.span),
            });
        };
        let name = decl.name.node.clone();
        if let Some(previous) = self.pool.get_mut(item).declarations.get(&name) {
            if !previous.flags.contains(DeclarationFlags::BUILTIN) {
                return Err(LangError::DuplicateBinding {
                    name,
                    location,
                    previous: previous.location.clone(),
                });
            }
        }

        let mut declaration =
            PropertyDeclaration::new(name.clone(), property_type).with_location(location.clone());
        if decl.readonly {
            declaration = declaration.with_flags(DeclarationFlags::READ_ONLY);
        }
        self.pool
            .get_mut(item)
            .declarations
            .insert(name.clone(), declaration);

        if let Some(value) = &decl.value {
            bound.insert(name.clone(), location.clone());
            let value = self.source_value(value, location, Some(item));
            self.pool.get_mut(item).properties.insert(name, value);
        }
        Ok(())
    }

    fn bind(
        &mut self,
        item: ItemId,
        binding: &Binding,
        bound: &mut FxHashMap<String, CodeLocation>,
    ) -> LangResult<()> {
        let location = self.location(binding.span);
        let key = binding.name.to_string();
        if let Some(previous) = bound.get(&key) {
            return Err(LangError::DuplicateBinding {
                name: key,
                location,
                previous: previous.clone(),
            });
        }
        bound.insert(key, location.clone());

        if binding.name.is_simple() && binding.name.parts[0].node == "id" {
            return self.register_id(item, &binding.value, location);
        }

        let segments = binding.name.segments();
        let (target, name) = self.binding_target(item, &segments, &location)?;
        let value = self.source_value(&binding.value, location, Some(item));
        self.pool.get_mut(target).properties.insert(name, value);
        Ok(())
    }

    fn register_id(
        &mut self,
        item: ItemId,
        value: &BindingValue,
        location: CodeLocation,
    ) -> LangResult<()> {
        let id = match value {
            BindingValue::Expr(expr) => match &expr.kind {
                rqbs_parser::ExprKind::Identifier(id) => id.clone(),
                _ => return Err(LangError::InvalidId { location }),
            },
            BindingValue::Block(_) => return Err(LangError::InvalidId { location }),
        };
        if let Some(previous) = self.ids.get(&id) {
            return Err(LangError::DuplicateId {
                id,
                location,
                previous: previous.clone(),
            });
        }
        self.ids.insert(id.clone(), location);
        self.pool.get_mut(item).id = Some(id.clone());
        self.pool
            .get_mut(self.file.id_scope)
            .properties
            .insert(id, Value::item(item));
        Ok(())
    }

    /// The item a possibly qualified binding writes to, and the property name.
    ///
    /// Missing intermediate items are created as module instance placeholders.
    fn binding_target(
        &mut self,
        item: ItemId,
        segments: &[String],
        location: &CodeLocation,
    ) -> LangResult<(ItemId, String)> {
        let Some((name, path)) = segments.split_last() else {
            return Err(LangError::BindingToNonItem {
                name: String::new(),
                location: location.clone(),
            });
        };
        let mut current = item;
        for segment in path {
            let existing = self.pool.get_mut(current).properties.get(segment).cloned();
            current = match existing {
                Some(value) => match value.as_item() {
                    Some(child) => child,
                    None => {
                        return Err(LangError::BindingToNonItem {
                            name: segment.clone(),
                            location: location.clone(),
                        })
                    }
                },
                None => {
                    if self.pool.own_declaration(current, segment).is_some() {
                        return Err(LangError::BindingToNonItem {
                            name: segment.clone(),
                            location: location.clone(),
                        });
                    }
                    let placeholder = self.pool.create_item_value(
                        current,
                        segment,
                        ItemType::ModuleInstancePlaceholder,
                    );
                    let data = self.pool.get_mut(placeholder);
                    data.type_name = segment.clone();
                    data.location = location.clone();
                    placeholder
                }
            };
        }
        Ok((current, name.clone()))
    }

    fn source_value(
        &self,
        value: &BindingValue,
        location: CodeLocation,
        defining_item: Option<ItemId>,
    ) -> ValuePtr {
        let body = match value {
            BindingValue::Expr(expr) => SourceBody::Expr(expr.clone()),
            BindingValue::Block(block) => SourceBody::Block(block.clone()),
        };
        let mut value = Value::source(SourceValue {
            body: Arc::new(body),
            source_code: value.span().slice(&self.source).into(),
            location,
            file: Arc::clone(&self.file),
            flags: source_flags(value),
            base_value: None,
            alternatives: Vec::new(),
        });
        if let Some(defining_item) = defining_item {
            value = value.with_defining_item(defining_item);
        }
        value
    }

    // =========================================================================
    // Inheritance
    // =========================================================================

    /// Merge the item tree of a base type into the derived item
    fn inherit_item(&mut self, derived: ItemId, base: ItemId) -> LangResult<()> {
        let base_data = self.pool.get_mut(base).clone();

        for &child in &base_data.children {
            self.pool.get_mut(child).parent = Some(derived);
        }
        {
            let data = self.pool.get_mut(derived);
            let mut children = base_data.children.clone();
            children.append(&mut data.children);
            data.children = children;
        }

        for (name, decl) in &base_data.declarations {
            let derived_value = self.pool.get_mut(derived).properties.get(name).cloned();
            if decl.is_read_only() {
                if let Some(value) = derived_value {
                    let location = value
                        .location()
                        .cloned()
                        .unwrap_or_else(|| self.pool.location(derived));
                    return Err(LangError::ReadOnlyProperty {
                        name: name.clone(),
                        location,
                        declared: decl.location.clone(),
                    });
                }
            }
            self.pool
                .get_mut(derived)
                .declarations
                .entry(name.clone())
                .or_insert_with(|| decl.clone());
        }

        for (name, base_value) in &base_data.properties {
            let derived_value = self.pool.get_mut(derived).properties.get(name).cloned();
            let Some(derived_value) = derived_value else {
                self.pool
                    .get_mut(derived)
                    .properties
                    .insert(name.clone(), Arc::clone(base_value));
                continue;
            };
            match (&derived_value.kind, &base_value.kind) {
                (ValueKind::Item(derived_child), ValueKind::Item(base_child)) => {
                    let (derived_child, base_child) = (*derived_child, *base_child);
                    self.inherit_item(derived_child, base_child)?;
                }
                (ValueKind::Source(source), ValueKind::Source(_) | ValueKind::Literal(_))
                    if source.base_value.is_none() =>
                {
                    let mut linked = derived_value.clone();
                    if let ValueKind::Source(source) = &mut Arc::make_mut(&mut linked).kind {
                        source.base_value = Some(Arc::clone(base_value));
                    }
                    self.pool
                        .get_mut(derived)
                        .properties
                        .insert(name.clone(), linked);
                }
                _ => {}
            }
        }

        // Ids of the base file that named its root now name the derived item
        if let Some(base_file) = &base_data.file {
            let id_scope = self.pool.get_mut(base_file.id_scope);
            for value in id_scope.properties.values_mut() {
                if value.as_item() == Some(base) {
                    *value = Value::item(derived);
                }
            }
        }
        if self.pool.get_mut(derived).id.is_none() {
            self.pool.get_mut(derived).id = base_data.id.clone();
        }
        Ok(())
    }

    // =========================================================================
    // Properties blocks
    // =========================================================================

    fn fold_properties_block(
        &mut self,
        item: ItemId,
        block: &PropertiesBlock<'_>,
        seen_fallback: &mut bool,
    ) -> LangResult<()> {
        let mut condition = None;
        let mut override_list_properties = None;
        let mut bindings = Vec::new();
        for member in &block.def.members {
            match member {
                ItemMember::Binding(binding) if binding.name.is_simple() => {
                    let location = self.location(binding.span);
                    match binding.name.parts[0].node.as_str() {
                        "condition" => {
                            condition = Some(self.source_value(&binding.value, location, Some(item)))
                        }
                        "overrideListProperties" => {
                            override_list_properties =
                                Some(self.source_value(&binding.value, location, Some(item)))
                        }
                        _ => bindings.push(binding),
                    }
                }
                ItemMember::Binding(binding) => bindings.push(binding),
                ItemMember::PropertyDecl(decl) => {
                    return Err(LangError::InvalidPropertiesBlock {
                        message: "Properties blocks cannot declare properties".to_string(),
                        location: self.location(decl.span),
                    })
                }
                ItemMember::Child(child) => {
                    return Err(LangError::InvalidPropertiesBlock {
                        message: "Properties blocks cannot have child items".to_string(),
                        location: self.location(child.span),
                    })
                }
            }
        }

        if condition.is_some() && *seen_fallback {
            return Err(LangError::InvalidPropertiesBlock {
                message: "A conditional Properties block cannot follow a Properties block without condition"
                    .to_string(),
                location: block.location.clone(),
            });
        }
        *seen_fallback |= condition.is_none();

        let mut bound = FxHashMap::default();
        for binding in bindings {
            let location = self.location(binding.span);
            let key = binding.name.to_string();
            if let Some(previous) = bound.insert(key.clone(), location.clone()) {
                return Err(LangError::DuplicateBinding {
                    name: key,
                    location,
                    previous,
                });
            }
            let segments = binding.name.segments();
            let (target, name) = self.binding_target(item, &segments, &location)?;
            let alternative = Alternative {
                condition: condition.clone(),
                override_list_properties: override_list_properties.clone(),
                value: self.source_value(&binding.value, location.clone(), Some(item)),
            };
            self.add_alternative(target, &name, alternative, location)?;
        }
        Ok(())
    }

    /// Attach an alternative to a property, creating a value for it if the
    /// item does not set the property itself. Alternatives keep a trailing
    /// fallback last.
    fn add_alternative(
        &mut self,
        item: ItemId,
        name: &str,
        alternative: Alternative,
        location: CodeLocation,
    ) -> LangResult<()> {
        let existing = self.pool.get_mut(item).properties.get(name).cloned();
        let mut value = match existing {
            Some(value) => value,
            None => {
                let undefined = BindingValue::Expr(rqbs_parser::Expr::undefined(Span::default()));
                let mut created = self.source_value(&undefined, location.clone(), Some(item));
                let data = Arc::make_mut(&mut created);
                data.created_by_properties_block = true;
                if let ValueKind::Source(source) = &mut data.kind {
                    source.source_code = "undefined".into();
                }
                created
            }
        };

        let ValueKind::Source(source) = &mut Arc::make_mut(&mut value).kind else {
            return Err(LangError::IncompatibleValueType {
                name: name.to_string(),
                location,
            });
        };
        let has_trailing_fallback = source
            .alternatives
            .last()
            .is_some_and(|a| a.condition.is_none());
        if alternative.condition.is_some() && has_trailing_fallback {
            let at = source.alternatives.len() - 1;
            source.alternatives.insert(at, alternative);
        } else {
            source.alternatives.push(alternative);
        }
        self.pool
            .get_mut(item)
            .properties
            .insert(name.to_string(), value);
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the finished tree top-down: child types, undeclared bindings and
    /// removed or deprecated properties
    fn validate(&mut self, item: ItemId) -> LangResult<()> {
        let data = self.pool.get_mut(item).clone();
        let item_type = data.item_type();

        if builtins::requires_declared_bindings(item_type) {
            for (name, value) in &data.properties {
                if value.is_item() {
                    continue;
                }
                let location = value.location().cloned().unwrap_or_else(|| data.location.clone());
                let Some(decl) = self.pool.property_declaration(item, name) else {
                    return Err(LangError::UndeclaredProperty {
                        name: name.clone(),
                        location,
                    });
                };
                if let Some(deprecation) = &decl.deprecation {
                    if builtins::is_removed(&deprecation.removal_version) {
                        return Err(LangError::ExpiredProperty {
                            name: name.clone(),
                            removed_in: deprecation.removal_version.clone(),
                            location,
                        });
                    }
                    tracing::warn!(
                        "{}: The property '{}' is deprecated and will be removed in version {}. {}",
                        location,
                        name,
                        deprecation.removal_version,
                        deprecation.message
                    );
                }
            }
        }

        let allowed = builtins::allowed_children(item_type);
        for &child in &data.children {
            let child_type = self.pool.item_type(child);
            if !allowed.contains(&child_type) {
                return Err(LangError::InvalidChildType {
                    child: self.pool.type_name(child),
                    parent: data.type_name.clone(),
                    location: self.pool.location(child),
                });
            }
            self.validate(child)?;
        }
        Ok(())
    }
}

fn is_properties_block(def: &ItemDef) -> bool {
    def.type_name.is_simple() && def.type_name.parts[0].node == "Properties"
}

/// Which of `base`, `outer` and `original` a binding reads
fn source_flags(value: &BindingValue) -> SourceFlags {
    let mut flags = SourceFlags::empty();
    value.visit_identifiers(&mut |name| match name {
        "base" => flags |= SourceFlags::USES_BASE,
        "outer" => flags |= SourceFlags::USES_OUTER,
        "original" => flags |= SourceFlags::USES_ORIGINAL,
        _ => {}
    });
    flags
}
