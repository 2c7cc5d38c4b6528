//! Items: the nodes of the declaration tree

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::declaration::PropertyDeclaration;
use crate::file::FileContext;
use crate::location::CodeLocation;
use crate::pool::ItemId;
use crate::value::ValuePtr;
use crate::version::VersionRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Unknown,
    Project,
    Product,
    Module,
    ModuleInstance,
    ModuleInstancePlaceholder,
    ModulePrefix,
    Group,
    Depends,
    Properties,
    Export,
    FileTagger,
    Rule,
    Probe,
    Scope,
}

impl ItemType {
    /// Map a type name as written in a file to a builtin type
    pub fn from_builtin_name(name: &str) -> Option<Self> {
        Some(match name {
            "Project" => ItemType::Project,
            "Product" => ItemType::Product,
            "Module" => ItemType::Module,
            "Group" => ItemType::Group,
            "Depends" => ItemType::Depends,
            "Properties" => ItemType::Properties,
            "Export" => ItemType::Export,
            "FileTagger" => ItemType::FileTagger,
            "Rule" => ItemType::Rule,
            "Probe" => ItemType::Probe,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ItemType::Unknown => "Unknown",
            ItemType::Project => "Project",
            ItemType::Product => "Product",
            ItemType::Module => "Module",
            ItemType::ModuleInstance => "ModuleInstance",
            ItemType::ModuleInstancePlaceholder => "ModuleInstancePlaceholder",
            ItemType::ModulePrefix => "ModulePrefix",
            ItemType::Group => "Group",
            ItemType::Depends => "Depends",
            ItemType::Properties => "Properties",
            ItemType::Export => "Export",
            ItemType::FileTagger => "FileTagger",
            ItemType::Rule => "Rule",
            ItemType::Probe => "Probe",
            ItemType::Scope => "Scope",
        }
    }

    /// Module instances and their not yet instantiated placeholders
    pub fn is_module_instance(self) -> bool {
        matches!(
            self,
            ItemType::ModuleInstance | ItemType::ModuleInstancePlaceholder
        )
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dependency of an item on a module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEdge {
    /// Qualified module name, e.g. `Qt.core`
    pub name: Vec<String>,
    pub item: ItemId,
    pub required: bool,
    pub version_range: VersionRange,
    /// The product this edge was attached for
    pub product: Option<ItemId>,
}

impl ModuleEdge {
    pub fn full_name(&self) -> String {
        self.name.join(".")
    }
}

/// A node of the declaration tree
#[derive(Debug, Clone)]
pub struct Item {
    pub(crate) item_type: ItemType,
    /// Type name as written in the file (or the builtin name)
    pub type_name: String,
    pub location: CodeLocation,
    pub file: Option<Arc<FileContext>>,
    pub id: Option<String>,
    pub prototype: Option<ItemId>,
    pub scope: Option<ItemId>,
    pub outer_item: Option<ItemId>,
    pub parent: Option<ItemId>,
    pub children: Vec<ItemId>,
    pub properties: IndexMap<String, ValuePtr>,
    pub declarations: IndexMap<String, PropertyDeclaration>,
    pub modules: Vec<ModuleEdge>,
}

impl Item {
    pub(crate) fn new(item_type: ItemType) -> Self {
        Self {
            item_type,
            type_name: item_type.name().to_string(),
            location: CodeLocation::default(),
            file: None,
            id: None,
            prototype: None,
            scope: None,
            outer_item: None,
            parent: None,
            children: Vec::new(),
            properties: IndexMap::new(),
            declarations: IndexMap::new(),
            modules: Vec::new(),
        }
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn own_property(&self, name: &str) -> Option<&ValuePtr> {
        self.properties.get(name)
    }

    pub fn has_own_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn own_declaration(&self, name: &str) -> Option<&PropertyDeclaration> {
        self.declarations.get(name)
    }

    pub fn module_edge(&self, name: &[String]) -> Option<&ModuleEdge> {
        self.modules.iter().find(|m| m.name == name)
    }
}
