//! Declarations of the builtin item types

use crate::declaration::{DeclarationFlags, PropertyDeclaration, PropertyType};
use crate::item::ItemType;
use crate::version::Version;

/// Version of the item language implemented here
pub const LANGUAGE_VERSION: &str = "2.1";

struct BuiltinProperty {
    name: &'static str,
    property_type: PropertyType,
    /// Default binding as expression text
    default: Option<&'static str>,
    /// (removal version, message)
    deprecation: Option<(&'static str, &'static str)>,
}

const fn prop(
    name: &'static str,
    property_type: PropertyType,
    default: Option<&'static str>,
) -> BuiltinProperty {
    BuiltinProperty {
        name,
        property_type,
        default,
        deprecation: None,
    }
}

use PropertyType::*;

const CONDITION: BuiltinProperty = prop("condition", Bool, Some("true"));
const NAME: BuiltinProperty = prop("name", String, None);

static PROJECT: &[BuiltinProperty] = &[
    CONDITION,
    NAME,
    prop("references", PathList, Some("[]")),
    prop("searchPaths", PathList, Some("[]")),
    prop("sourceDirectory", Path, None),
];

static PRODUCT: &[BuiltinProperty] = &[
    CONDITION,
    NAME,
    prop("type", StringList, Some("[]")),
    prop("targetName", String, Some("name")),
    prop("version", String, None),
    prop("consoleApplication", Bool, Some("false")),
    prop("builtByDefault", Bool, Some("true")),
    prop("files", PathList, Some("[]")),
    prop("excludedFiles", PathList, Some("[]")),
    prop("destinationDirectory", String, Some("\".\"")),
    prop("sourceDirectory", Path, None),
];

static MODULE: &[BuiltinProperty] = &[
    CONDITION,
    NAME,
    prop("present", Bool, Some("true")),
    prop("version", String, None),
    prop("additionalProductTypes", StringList, Some("[]")),
];

static GROUP: &[BuiltinProperty] = &[
    CONDITION,
    NAME,
    prop("files", PathList, None),
    prop("excludedFiles", PathList, None),
    prop("prefix", String, None),
    prop("fileTags", StringList, None),
    prop("overrideTags", Bool, Some("true")),
];

static DEPENDS: &[BuiltinProperty] = &[
    CONDITION,
    NAME,
    prop("submodules", StringList, None),
    prop("required", Bool, Some("true")),
    prop("versionAtLeast", String, None),
    prop("versionBelow", String, None),
    BuiltinProperty {
        name: "productTypes",
        property_type: StringList,
        default: None,
        deprecation: Some(("2.2", "Use 'Depends.name' with product names instead.")),
    },
];

static PROPERTIES: &[BuiltinProperty] = &[
    prop("condition", Bool, None),
    prop("overrideListProperties", Bool, None),
];

static EXPORT: &[BuiltinProperty] = &[prop("prefixMapping", Variant, None)];

static FILE_TAGGER: &[BuiltinProperty] = &[
    CONDITION,
    prop("patterns", StringList, None),
    prop("fileTags", StringList, None),
    prop("priority", Int, Some("0")),
];

static RULE: &[BuiltinProperty] = &[
    CONDITION,
    prop("multiplex", Bool, Some("false")),
    prop("alwaysRun", Bool, Some("false")),
    prop("inputs", StringList, None),
    prop("outputFileTags", StringList, None),
];

static PROBE: &[BuiltinProperty] = &[CONDITION, prop("found", Bool, Some("false"))];

/// Declarations removed from the language, kept for diagnostics
static EXPIRED: &[(ItemType, &str, PropertyType, &str, &str)] = &[(
    ItemType::Group,
    "excludeFiles",
    PathList,
    "2.0",
    "Use 'excludedFiles' instead.",
)];

fn properties(item_type: ItemType) -> &'static [BuiltinProperty] {
    match item_type {
        ItemType::Project => PROJECT,
        ItemType::Product => PRODUCT,
        ItemType::Module => MODULE,
        ItemType::Group => GROUP,
        ItemType::Depends => DEPENDS,
        ItemType::Properties => PROPERTIES,
        ItemType::Export => EXPORT,
        ItemType::FileTagger => FILE_TAGGER,
        ItemType::Rule => RULE,
        ItemType::Probe => PROBE,
        _ => &[],
    }
}

fn to_declaration(p: &BuiltinProperty) -> PropertyDeclaration {
    let decl =
        PropertyDeclaration::new(p.name, p.property_type).with_flags(DeclarationFlags::BUILTIN);
    match p.deprecation {
        Some((version, message)) => decl.deprecated(version, message),
        None => decl,
    }
}

/// Declarations installed on the root item of a builtin type
pub fn declarations(item_type: ItemType) -> Vec<PropertyDeclaration> {
    properties(item_type).iter().map(to_declaration).collect()
}

/// Default bindings (property name, expression text) of a builtin type
pub fn default_bindings(item_type: ItemType) -> impl Iterator<Item = (&'static str, &'static str)> {
    // Properties blocks only carry conditions, never defaults
    let props = if item_type == ItemType::Properties {
        &[][..]
    } else {
        properties(item_type)
    };
    props.iter().filter_map(|p| p.default.map(|d| (p.name, d)))
}

/// Declaration from the expired side table
pub fn expired_declaration(item_type: ItemType, name: &str) -> Option<PropertyDeclaration> {
    EXPIRED
        .iter()
        .find(|(t, n, ..)| *t == item_type && *n == name)
        .map(|(_, n, ty, version, message)| {
            PropertyDeclaration::new(*n, *ty)
                .with_flags(DeclarationFlags::BUILTIN)
                .deprecated(version, message)
        })
}

/// Whether a deprecation has reached its removal version
pub fn is_removed(removal_version: &str) -> bool {
    match (Version::parse(LANGUAGE_VERSION), Version::parse(removal_version)) {
        (Some(current), Some(removal)) => current >= removal,
        _ => false,
    }
}

/// Item types that may appear as children of `parent`
pub fn allowed_children(parent: ItemType) -> &'static [ItemType] {
    use ItemType as T;
    match parent {
        T::Project => &[T::Project, T::Product, T::FileTagger, T::Rule, T::Probe],
        T::Product => &[T::Depends, T::Group, T::FileTagger, T::Export, T::Probe, T::Rule],
        T::Module => &[T::Depends, T::Group, T::FileTagger, T::Rule, T::Probe],
        T::Group => &[T::Group],
        T::Export => &[T::Depends, T::Group, T::FileTagger, T::Rule, T::Probe],
        _ => &[],
    }
}

/// Item types whose own bindings must refer to declared properties
pub fn requires_declared_bindings(item_type: ItemType) -> bool {
    matches!(
        item_type,
        ItemType::Project
            | ItemType::Product
            | ItemType::Module
            | ItemType::Group
            | ItemType::Depends
            | ItemType::Export
            | ItemType::FileTagger
            | ItemType::Rule
            | ItemType::Probe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_blocks_have_no_defaults() {
        assert_eq!(default_bindings(ItemType::Properties).count(), 0);
        assert!(declarations(ItemType::Properties)
            .iter()
            .any(|d| d.name == "overrideListProperties"));
    }

    #[test]
    fn expired_and_deprecated() {
        let expired = expired_declaration(ItemType::Group, "excludeFiles").unwrap();
        assert!(is_removed(&expired.deprecation.unwrap().removal_version));

        let depends = declarations(ItemType::Depends);
        let product_types = depends.iter().find(|d| d.name == "productTypes").unwrap();
        assert!(!is_removed(
            &product_types.deprecation.as_ref().unwrap().removal_version
        ));
    }

    #[test]
    fn child_matrix() {
        assert!(allowed_children(ItemType::Product).contains(&ItemType::Group));
        assert!(!allowed_children(ItemType::Group).contains(&ItemType::Depends));
        assert!(allowed_children(ItemType::Depends).is_empty());
    }
}
